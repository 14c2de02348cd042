//! The aggregate machine state and its declarative topology.

use std::collections::BTreeMap;

use crate::memory::{MemorySpace, MASK_12BIT, RAM_SPACE_ID, ROM_SPACE_ID};
use crate::state::registers::{RegisterFile, RegisterSpec, CPU_DEVICE_ID, CPU_REGISTER_LAYOUT};
use crate::EngineError;

/// Default nibble count of the ROM and RAM spaces, covering the full 12-bit
/// address range.
pub const DEFAULT_SPACE_LEN: u32 = 0x1000;
/// Default nibble address of the three-nibble program-counter reset vector.
pub const PC_RESET_VECTOR: u32 = 0xFF9;
/// Default nibble address of the three-nibble stack-pointer reset vector.
pub const SP_RESET_VECTOR: u32 = 0xFFC;

/// Where the program counter and stack pointer are composed from at reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetVector {
    /// Memory space holding both vectors.
    pub space: u32,
    /// Nibble address of the three-nibble PC vector.
    pub pc_addr: u32,
    /// Nibble address of the three-nibble SP vector.
    pub sp_addr: u32,
}

impl Default for ResetVector {
    fn default() -> Self {
        Self {
            space: ROM_SPACE_ID,
            pc_addr: PC_RESET_VECTOR,
            sp_addr: SP_RESET_VECTOR,
        }
    }
}

/// Declarative description of one memory space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceSpec {
    /// Space id used by dispatch.
    pub id: u32,
    /// Length in nibbles, fixed for the lifetime of the machine.
    pub len: u32,
    /// Whether normal writes are rejected.
    pub read_only: bool,
}

/// Declarative description of one device register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Device id used by dispatch.
    pub id: u32,
    /// Register layout, stated as data.
    pub layout: &'static [RegisterSpec],
}

/// The full machine shape: memory spaces, devices and reset vectors.
///
/// The topology is fixed at engine init; snapshots are validated against it
/// on restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineTopology {
    /// Memory spaces to create.
    pub spaces: Vec<SpaceSpec>,
    /// Devices to create.
    pub devices: Vec<DeviceSpec>,
    /// Reset-vector addresses applied by `Reset`.
    pub reset_vector: ResetVector,
}

impl Default for MachineTopology {
    fn default() -> Self {
        Self {
            spaces: vec![
                SpaceSpec {
                    id: ROM_SPACE_ID,
                    len: DEFAULT_SPACE_LEN,
                    read_only: true,
                },
                SpaceSpec {
                    id: RAM_SPACE_ID,
                    len: DEFAULT_SPACE_LEN,
                    read_only: false,
                },
            ],
            devices: vec![DeviceSpec {
                id: CPU_DEVICE_ID,
                layout: CPU_REGISTER_LAYOUT,
            }],
            reset_vector: ResetVector::default(),
        }
    }
}

/// The aggregate of all memory spaces, all register files, the program
/// counter, stack pointer and cycle counter.
///
/// Created once at engine init, mutated only through dispatch calls issued
/// from the scheduler's context, and replaced wholesale by a successful
/// restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    spaces: BTreeMap<u32, MemorySpace>,
    devices: BTreeMap<u32, RegisterFile>,
    pc: u16,
    sp: u16,
    cycle_count: u64,
}

impl MachineState {
    /// Builds a zeroed machine over `topology`.
    #[must_use]
    pub fn new(topology: &MachineTopology) -> Self {
        let spaces = topology
            .spaces
            .iter()
            .map(|spec| (spec.id, MemorySpace::new(spec.len, spec.read_only)))
            .collect();
        let devices = topology
            .devices
            .iter()
            .map(|spec| (spec.id, RegisterFile::new(spec.layout)))
            .collect();
        Self {
            spaces,
            devices,
            pc: 0,
            sp: 0,
            cycle_count: 0,
        }
    }

    /// Resolves a memory space by id.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownMemorySpace`] when no space carries `id`.
    pub fn space(&self, id: u32) -> Result<&MemorySpace, EngineError> {
        self.spaces
            .get(&id)
            .ok_or(EngineError::UnknownMemorySpace(id))
    }

    /// Resolves a memory space by id for writing.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownMemorySpace`] when no space carries `id`.
    pub fn space_mut(&mut self, id: u32) -> Result<&mut MemorySpace, EngineError> {
        self.spaces
            .get_mut(&id)
            .ok_or(EngineError::UnknownMemorySpace(id))
    }

    /// Resolves a device register file by id.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownDevice`] when no device carries `id`.
    pub fn device(&self, id: u32) -> Result<&RegisterFile, EngineError> {
        self.devices.get(&id).ok_or(EngineError::UnknownDevice(id))
    }

    /// Resolves a device register file by id for writing.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownDevice`] when no device carries `id`.
    pub fn device_mut(&mut self, id: u32) -> Result<&mut RegisterFile, EngineError> {
        self.devices
            .get_mut(&id)
            .ok_or(EngineError::UnknownDevice(id))
    }

    /// All memory spaces in ascending id order, the snapshot ordering.
    pub fn spaces(&self) -> impl Iterator<Item = (u32, &MemorySpace)> {
        self.spaces.iter().map(|(id, space)| (*id, space))
    }

    /// All devices in ascending id order, the snapshot ordering.
    pub fn devices(&self) -> impl Iterator<Item = (u32, &RegisterFile)> {
        self.devices.iter().map(|(id, file)| (*id, file))
    }

    /// Current 12-bit program counter.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.pc
    }

    /// Sets the program counter, masked to twelve bits.
    pub const fn set_pc(&mut self, value: u16) {
        self.pc = value & MASK_12BIT;
    }

    /// Current 12-bit stack pointer.
    #[must_use]
    pub const fn sp(&self) -> u16 {
        self.sp
    }

    /// Sets the stack pointer, masked to twelve bits.
    pub const fn set_sp(&mut self, value: u16) {
        self.sp = value & MASK_12BIT;
    }

    /// Cycles executed since init, reset or restore.
    #[must_use]
    pub const fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Overwrites the cycle counter. Used by the restore path.
    pub const fn set_cycle_count(&mut self, value: u64) {
        self.cycle_count = value;
    }

    /// Counts one executed cycle.
    pub const fn advance_cycle(&mut self) {
        self.cycle_count += 1;
    }

    /// Re-derives PC and SP from `vector` and zeroes the cycle counter.
    /// Memory contents and register files are left untouched.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownMemorySpace`] or [`EngineError::OutOfRange`]
    /// when a vector cannot be read; nothing changes on failure.
    pub fn reset(&mut self, vector: &ResetVector) -> Result<(), EngineError> {
        let space = self.space(vector.space)?;
        let pc = space.get12(vector.pc_addr)?;
        let sp = space.get12(vector.sp_addr)?;
        self.pc = pc;
        self.sp = sp;
        self.cycle_count = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MachineState, MachineTopology, ResetVector, DEFAULT_SPACE_LEN};
    use crate::memory::{RAM_SPACE_ID, ROM_SPACE_ID};
    use crate::state::registers::{CPU_DEVICE_ID, REG_E1};
    use crate::EngineError;

    #[test]
    fn default_topology_builds_rom_ram_and_cpu_device() {
        let state = MachineState::new(&MachineTopology::default());
        assert_eq!(state.space(ROM_SPACE_ID).unwrap().len(), DEFAULT_SPACE_LEN);
        assert!(state.space(ROM_SPACE_ID).unwrap().is_read_only());
        assert!(!state.space(RAM_SPACE_ID).unwrap().is_read_only());
        assert!(state.device(CPU_DEVICE_ID).is_ok());
        assert_eq!(state.pc(), 0);
        assert_eq!(state.sp(), 0);
        assert_eq!(state.cycle_count(), 0);
    }

    #[test]
    fn unknown_ids_surface_identity_errors() {
        let mut state = MachineState::new(&MachineTopology::default());
        assert!(matches!(
            state.space(7),
            Err(EngineError::UnknownMemorySpace(7))
        ));
        assert!(matches!(
            state.device_mut(9),
            Err(EngineError::UnknownDevice(9))
        ));
    }

    #[test]
    fn pc_and_sp_mask_to_twelve_bits() {
        let mut state = MachineState::new(&MachineTopology::default());
        state.set_pc(0xFFFF);
        state.set_sp(0xABCD);
        assert_eq!(state.pc(), 0x0FFF);
        assert_eq!(state.sp(), 0x0BCD);
    }

    #[test]
    fn reset_derives_pc_sp_and_zeroes_cycles_only() {
        let mut state = MachineState::new(&MachineTopology::default());
        let rom = state.space_mut(ROM_SPACE_ID).unwrap();
        rom.load(0xFF9, &[0x1, 0x2, 0x3, 0x4, 0x5, 0x6]).unwrap();
        state
            .space_mut(RAM_SPACE_ID)
            .unwrap()
            .set8(0, 0xAB)
            .unwrap();
        state
            .device_mut(CPU_DEVICE_ID)
            .unwrap()
            .set(REG_E1, 0x777)
            .unwrap();
        state.advance_cycle();
        state.advance_cycle();

        state.reset(&ResetVector::default()).unwrap();

        assert_eq!(state.pc(), 0x123);
        assert_eq!(state.sp(), 0x456);
        assert_eq!(state.cycle_count(), 0);
        // Memory and register contents survive a reset.
        assert_eq!(state.space(RAM_SPACE_ID).unwrap().get8(0).unwrap(), 0xAB);
        assert_eq!(
            state.device(CPU_DEVICE_ID).unwrap().get(REG_E1).unwrap(),
            0x777
        );
    }

    #[test]
    fn reset_with_unreadable_vector_changes_nothing() {
        let topology = MachineTopology::default();
        let mut state = MachineState::new(&topology);
        state.set_pc(0x111);
        state.advance_cycle();
        let bad = ResetVector {
            space: ROM_SPACE_ID,
            pc_addr: DEFAULT_SPACE_LEN - 1,
            sp_addr: 0,
        };
        assert!(matches!(
            state.reset(&bad),
            Err(EngineError::OutOfRange { .. })
        ));
        assert_eq!(state.pc(), 0x111);
        assert_eq!(state.cycle_count(), 1);
    }
}
