//! Versioned full-state snapshots.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! [version:u32][space_count:u32]
//!     { [id:u32][len:u32][len nibbles, one per byte] }*
//! [register_count:u32]
//!     { [dev_id:u32][reg_id:u32][value:u32] }*
//! [pc:u32][sp:u32][cycle_count:u64]
//! ```
//!
//! The register table carries atomic registers only; composite registers are
//! derived data. It must name every atomic register of the live topology
//! exactly once. Restore validates the entire snapshot against the live
//! topology before anything is replaced, so a rejected restore leaves the
//! prior machine state fully intact.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::memory::NIBBLE_MASK;
use crate::state::{MachineState, MachineTopology};
use crate::EngineError;

/// Snapshot format version written and accepted by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

const MASK_12BIT_WIDE: u32 = 0x0FFF;

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_count(out: &mut Vec<u8>, count: usize) {
    // Ids are u32, so table sizes always fit.
    put_u32(out, u32::try_from(count).unwrap_or(u32::MAX));
}

/// Serializes `state` into the snapshot wire format.
#[must_use]
pub fn encode(state: &MachineState) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, SNAPSHOT_VERSION);

    put_count(&mut out, state.spaces().count());
    for (id, space) in state.spaces() {
        put_u32(&mut out, id);
        put_u32(&mut out, space.len());
        out.extend_from_slice(space.raw());
    }

    let registers: Vec<(u32, u32, u32)> = state
        .devices()
        .flat_map(|(dev_id, file)| {
            file.atomic_entries()
                .map(move |(reg_id, value)| (dev_id, reg_id, value))
        })
        .collect();
    put_count(&mut out, registers.len());
    for (dev_id, reg_id, value) in registers {
        put_u32(&mut out, dev_id);
        put_u32(&mut out, reg_id);
        put_u32(&mut out, value);
    }

    put_u32(&mut out, u32::from(state.pc()));
    put_u32(&mut out, u32::from(state.sp()));
    put_u64(&mut out, state.cycle_count());
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], EngineError> {
        if self.bytes.len() < count {
            return Err(EngineError::CorruptState("truncated snapshot"));
        }
        let (head, tail) = self.bytes.split_at(count);
        self.bytes = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, EngineError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, EngineError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn read_12bit(reader: &mut Reader<'_>, oversized: &'static str) -> Result<u16, EngineError> {
    let wide = reader.u32()?;
    if wide > MASK_12BIT_WIDE {
        return Err(EngineError::CorruptState(oversized));
    }
    Ok(wide as u16)
}

/// Decodes and fully validates a snapshot against `topology`.
///
/// # Errors
///
/// [`EngineError::CorruptState`] on an unrecognized version, truncation,
/// out-of-range nibble or value, identity mismatch against the topology, or
/// trailing bytes.
pub fn decode(bytes: &[u8], topology: &MachineTopology) -> Result<MachineState, EngineError> {
    let mut reader = Reader::new(bytes);
    if reader.u32()? != SNAPSHOT_VERSION {
        return Err(EngineError::CorruptState("unrecognized snapshot version"));
    }

    let mut state = MachineState::new(topology);

    let space_count = reader.u32()?;
    if space_count as usize != state.spaces().count() {
        return Err(EngineError::CorruptState("memory space count mismatch"));
    }
    for _ in 0..space_count {
        let id = reader.u32()?;
        let len = reader.u32()?;
        let space = state
            .space_mut(id)
            .map_err(|_| EngineError::CorruptState("snapshot names an unknown memory space"))?;
        if space.len() != len {
            return Err(EngineError::CorruptState("memory space length mismatch"));
        }
        let raw = reader.take(len as usize)?;
        if raw.iter().any(|nibble| *nibble > NIBBLE_MASK) {
            return Err(EngineError::CorruptState("nibble value out of range"));
        }
        space.load(0, raw)?;
    }

    let register_count = reader.u32()?;
    let expected: usize = state
        .devices()
        .map(|(_, file)| file.atomic_entries().count())
        .sum();
    if register_count as usize != expected {
        return Err(EngineError::CorruptState("register count mismatch"));
    }
    let mut seen = BTreeSet::new();
    for _ in 0..register_count {
        let dev_id = reader.u32()?;
        let reg_id = reader.u32()?;
        let value = reader.u32()?;
        if !seen.insert((dev_id, reg_id)) {
            return Err(EngineError::CorruptState("duplicate register entry"));
        }
        state
            .device_mut(dev_id)
            .map_err(|_| EngineError::CorruptState("snapshot names an unknown device"))?
            .set_atomic(reg_id, value)
            .ok_or(EngineError::CorruptState(
                "snapshot names an unknown or non-atomic register",
            ))?;
    }

    let pc = read_12bit(&mut reader, "program counter out of range")?;
    let sp = read_12bit(&mut reader, "stack pointer out of range")?;
    state.set_pc(pc);
    state.set_sp(sp);
    let cycles = reader.u64()?;
    state.set_cycle_count(cycles);

    if !reader.is_empty() {
        return Err(EngineError::CorruptState("trailing bytes after snapshot"));
    }
    Ok(state)
}

// `.tmp` is appended to the full file name rather than swapped in for the
// extension, so targets that differ only by extension stage to distinct
// paths.
fn staging_path(path: &Path) -> PathBuf {
    let mut staged = OsString::from(path.as_os_str());
    staged.push(".tmp");
    PathBuf::from(staged)
}

/// Writes a snapshot of `state` to `path`.
///
/// The bytes land in a temporary sibling file first and are renamed into
/// place, so an interrupted save never leaves a truncated snapshot at the
/// target path.
///
/// # Errors
///
/// [`EngineError::Io`] when writing or renaming fails.
pub fn save_state(state: &MachineState, path: &Path) -> Result<(), EngineError> {
    let bytes = encode(state);
    let staged = staging_path(path);
    fs::write(&staged, &bytes)?;
    fs::rename(&staged, path)?;
    Ok(())
}

/// Reads, decodes and fully validates the snapshot at `path` into a fresh
/// machine state. The caller swaps it in atomically on success.
///
/// # Errors
///
/// [`EngineError::Io`] when the file cannot be read,
/// [`EngineError::CorruptState`] on any structural mismatch.
pub fn restore_state(path: &Path, topology: &MachineTopology) -> Result<MachineState, EngineError> {
    let bytes = fs::read(path)?;
    decode(&bytes, topology)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{decode, encode, staging_path, SNAPSHOT_VERSION};
    use crate::memory::RAM_SPACE_ID;
    use crate::state::{MachineState, MachineTopology, CPU_DEVICE_ID, REG_E0, REG_E1};
    use crate::{bus, EngineError};

    /// Byte offset of the `register_count` field for `state`'s layout.
    fn register_table_at(state: &MachineState) -> usize {
        let mut at = 8;
        for (_, space) in state.spaces() {
            at += 8 + space.len() as usize;
        }
        at
    }

    fn scribbled() -> (MachineState, MachineTopology) {
        let topology = MachineTopology::default();
        let mut state = MachineState::new(&topology);
        bus::mem_write(&mut state, RAM_SPACE_ID, 0x10, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        bus::set_register(&mut state, CPU_DEVICE_ID, REG_E0, 0xABC).unwrap();
        bus::set_register(&mut state, CPU_DEVICE_ID, REG_E1, 0x123).unwrap();
        state.set_pc(0x321);
        state.set_sp(0x654);
        state.set_cycle_count(42);
        (state, topology)
    }

    #[test]
    fn encode_starts_with_the_version_tag() {
        let (state, _) = scribbled();
        let bytes = encode(&state);
        assert_eq!(bytes[..4], SNAPSHOT_VERSION.to_le_bytes());
    }

    #[test]
    fn decode_round_trips_to_an_observationally_equal_state() {
        let (state, topology) = scribbled();
        let restored = decode(&encode(&state), &topology).unwrap();
        assert_eq!(restored, state);
        assert_eq!(
            bus::get_register(&restored, CPU_DEVICE_ID, REG_E0).unwrap(),
            0xABC
        );
        assert_eq!(restored.cycle_count(), 42);
    }

    #[test]
    fn unrecognized_versions_are_rejected() {
        let (state, topology) = scribbled();
        let mut bytes = encode(&state);
        bytes[..4].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState("unrecognized snapshot version"))
        ));
    }

    #[test]
    fn truncated_snapshots_are_rejected() {
        let (state, topology) = scribbled();
        let bytes = encode(&state);
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1], &topology),
            Err(EngineError::CorruptState("truncated snapshot"))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let (state, topology) = scribbled();
        let mut bytes = encode(&state);
        bytes.push(0);
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState("trailing bytes after snapshot"))
        ));
    }

    #[test]
    fn out_of_range_nibbles_are_rejected() {
        let (state, topology) = scribbled();
        let mut bytes = encode(&state);
        // First ROM nibble sits right after version, count, id and len.
        bytes[16] = 0x10;
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState("nibble value out of range"))
        ));
    }

    #[test]
    fn unknown_and_composite_register_ids_are_rejected() {
        let (state, topology) = scribbled();
        let table = register_table_at(&state);
        // reg_id of the first table entry follows the count and dev_id.
        let reg_id_at = table + 8;

        let mut bytes = encode(&state);
        bytes[reg_id_at..reg_id_at + 4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState(
                "snapshot names an unknown or non-atomic register"
            ))
        ));

        let mut bytes = encode(&state);
        bytes[reg_id_at..reg_id_at + 4].copy_from_slice(&REG_E0.to_le_bytes());
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState(
                "snapshot names an unknown or non-atomic register"
            ))
        ));
    }

    #[test]
    fn register_count_must_match_the_topology() {
        let (state, topology) = scribbled();
        let table = register_table_at(&state);
        let mut bytes = encode(&state);
        bytes[table..table + 4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState("register count mismatch"))
        ));
    }

    #[test]
    fn duplicate_register_entries_are_rejected() {
        let (state, topology) = scribbled();
        let table = register_table_at(&state);
        let mut bytes = encode(&state);
        // Overwrite the second 12-byte entry with the first; the count still
        // matches, so only the duplicate check can catch the omission.
        bytes.copy_within(table + 4..table + 16, table + 16);
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState("duplicate register entry"))
        ));
    }

    #[test]
    fn staging_paths_keep_the_target_extension_distinct() {
        assert_eq!(
            staging_path(Path::new("/tmp/machine.snap")),
            Path::new("/tmp/machine.snap.tmp")
        );
        assert_ne!(
            staging_path(Path::new("/tmp/machine.snap")),
            staging_path(Path::new("/tmp/machine.bin"))
        );
    }

    #[test]
    fn unknown_space_ids_are_rejected() {
        let (state, topology) = scribbled();
        let mut bytes = encode(&state);
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes, &topology),
            Err(EngineError::CorruptState(
                "snapshot names an unknown memory space"
            ))
        ));
    }
}
