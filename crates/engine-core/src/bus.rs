//! Device dispatch: routes memory and register operations by id.
//!
//! Pure dispatch plus bounds, identity and access-policy checks; no timing
//! logic lives here. The memory entry points address **bytes**: each byte
//! spans two consecutive nibbles, high nibble first, starting at nibble
//! address `offset * 2`. Every check runs before anything is touched, so a
//! rejected operation leaves the machine unchanged.

use crate::state::MachineState;
use crate::EngineError;

fn check_byte_range(space_nibbles: u32, offset: u32, len: u32) -> Result<(), EngineError> {
    let limit = space_nibbles / 2;
    if u64::from(offset) + u64::from(len) > u64::from(limit) {
        return Err(EngineError::OutOfRange { offset, len, limit });
    }
    Ok(())
}

/// Reads `len` bytes from `memspace` starting at byte `offset`.
///
/// # Errors
///
/// [`EngineError::UnknownMemorySpace`] for an unregistered id,
/// [`EngineError::OutOfRange`] when `offset + len` exceeds the space.
pub fn mem_read(
    state: &MachineState,
    memspace: u32,
    offset: u32,
    len: u32,
) -> Result<Vec<u8>, EngineError> {
    let space = state.space(memspace)?;
    check_byte_range(space.len(), offset, len)?;
    (offset..offset + len)
        .map(|byte_offset| space.get8(byte_offset * 2))
        .collect()
}

/// Writes `data` into `memspace` starting at byte `offset` and records the
/// touched nibble range as dirty.
///
/// # Errors
///
/// [`EngineError::UnknownMemorySpace`] for an unregistered id,
/// [`EngineError::ReadOnlyViolation`] for a normal write to a read-only
/// space, [`EngineError::OutOfRange`] when the data does not fit. A rejected
/// write performs no partial write.
pub fn mem_write(
    state: &mut MachineState,
    memspace: u32,
    offset: u32,
    data: &[u8],
) -> Result<(), EngineError> {
    let space = state.space_mut(memspace)?;
    if space.is_read_only() {
        return Err(EngineError::ReadOnlyViolation(memspace));
    }
    let len = u32::try_from(data.len()).map_err(|_| EngineError::OutOfRange {
        offset,
        len: u32::MAX,
        limit: space.len() / 2,
    })?;
    check_byte_range(space.len(), offset, len)?;
    for (byte_offset, value) in (offset..).zip(data) {
        space.set8(byte_offset * 2, *value)?;
    }
    Ok(())
}

/// Reads a device register.
///
/// # Errors
///
/// [`EngineError::UnknownDevice`] or [`EngineError::UnknownRegister`] when
/// the id pair does not resolve.
pub fn get_register(state: &MachineState, dev_id: u32, reg_id: u32) -> Result<u32, EngineError> {
    state
        .device(dev_id)?
        .get(reg_id)
        .ok_or(EngineError::UnknownRegister { dev_id, reg_id })
}

/// Writes a device register, masking the value to the register's width.
///
/// # Errors
///
/// [`EngineError::UnknownDevice`] or [`EngineError::UnknownRegister`] when
/// the id pair does not resolve.
pub fn set_register(
    state: &mut MachineState,
    dev_id: u32,
    reg_id: u32,
    value: u32,
) -> Result<(), EngineError> {
    state
        .device_mut(dev_id)?
        .set(reg_id, value)
        .ok_or(EngineError::UnknownRegister { dev_id, reg_id })
}

#[cfg(test)]
mod tests {
    use super::{get_register, mem_read, mem_write, set_register};
    use crate::memory::{DirtyRange, RAM_SPACE_ID, ROM_SPACE_ID};
    use crate::state::{MachineState, MachineTopology, CPU_DEVICE_ID, REG_A, REG_E0};
    use crate::EngineError;

    fn machine() -> MachineState {
        MachineState::new(&MachineTopology::default())
    }

    #[test]
    fn bytes_round_trip_through_nibble_pairs() {
        let mut state = machine();
        mem_write(&mut state, RAM_SPACE_ID, 0x10, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(
            mem_read(&state, RAM_SPACE_ID, 0x10, 4).unwrap(),
            vec![0xAA, 0xBB, 0xCC, 0xDD]
        );
        // Byte 0xAA landed as two nibbles at address 0x20.
        let ram = state.space(RAM_SPACE_ID).unwrap();
        assert_eq!(ram.nibble(0x20).unwrap(), 0xA);
        assert_eq!(ram.nibble(0x21).unwrap(), 0xA);
    }

    #[test]
    fn rejected_write_performs_no_partial_write() {
        let mut state = machine();
        // 0x1000 nibbles hold 0x800 bytes; the last three bytes overflow.
        let result = mem_write(&mut state, RAM_SPACE_ID, 0x7FE, &[1, 2, 3]);
        assert!(matches!(
            result,
            Err(EngineError::OutOfRange {
                offset: 0x7FE,
                len: 3,
                limit: 0x800
            })
        ));
        let ram = state.space(RAM_SPACE_ID).unwrap();
        assert!(ram.raw().iter().all(|nibble| *nibble == 0));
        assert!(ram.take_dirty().is_empty());
    }

    #[test]
    fn read_only_space_rejects_normal_writes() {
        let mut state = machine();
        assert!(matches!(
            mem_write(&mut state, ROM_SPACE_ID, 0, &[0x12]),
            Err(EngineError::ReadOnlyViolation(ROM_SPACE_ID))
        ));
        assert!(state
            .space(ROM_SPACE_ID)
            .unwrap()
            .raw()
            .iter()
            .all(|nibble| *nibble == 0));
    }

    #[test]
    fn unknown_ids_are_rejected_at_dispatch() {
        let mut state = machine();
        assert!(matches!(
            mem_read(&state, 7, 0, 1),
            Err(EngineError::UnknownMemorySpace(7))
        ));
        assert!(matches!(
            get_register(&state, 9, 0),
            Err(EngineError::UnknownDevice(9))
        ));
        assert!(matches!(
            set_register(&mut state, CPU_DEVICE_ID, 99, 1),
            Err(EngineError::UnknownRegister {
                dev_id: CPU_DEVICE_ID,
                reg_id: 99
            })
        ));
    }

    #[test]
    fn register_dispatch_reaches_composite_layouts() {
        let mut state = machine();
        set_register(&mut state, CPU_DEVICE_ID, REG_E0, 0xABC).unwrap();
        assert_eq!(get_register(&state, CPU_DEVICE_ID, REG_A).unwrap(), 0xA);
    }

    #[test]
    fn successful_writes_record_dirty_nibble_ranges() {
        let mut state = machine();
        mem_write(&mut state, RAM_SPACE_ID, 0x10, &[0xAA, 0xBB]).unwrap();
        assert_eq!(
            state.space(RAM_SPACE_ID).unwrap().take_dirty(),
            vec![DirtyRange {
                start: 0x20,
                end: 0x23
            }]
        );
    }
}
