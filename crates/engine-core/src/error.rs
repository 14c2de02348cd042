use std::io;

use thiserror::Error;

/// Boundary error taxonomy surfaced by every engine entry point.
///
/// Failures never partially mutate machine state: a rejected write touches
/// nothing and a rejected restore leaves the prior state fully intact.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An access exceeded the bounds of a memory space.
    ///
    /// `offset`, `len` and `limit` share the unit of the rejected call:
    /// nibbles for the space-level accessors, bytes for the bus entry points.
    #[error("access at offset {offset} with length {len} is out of range (limit {limit})")]
    OutOfRange {
        /// First addressed unit.
        offset: u32,
        /// Number of units addressed.
        len: u32,
        /// Number of addressable units in the space.
        limit: u32,
    },
    /// No memory space is registered under this id.
    #[error("unknown memory space id {0}")]
    UnknownMemorySpace(u32),
    /// No device is registered under this id.
    #[error("unknown device id {0}")]
    UnknownDevice(u32),
    /// The device exists but its layout does not define this register id.
    #[error("unknown register id {reg_id} on device {dev_id}")]
    UnknownRegister {
        /// Device the lookup was dispatched to.
        dev_id: u32,
        /// Register id missing from the device layout.
        reg_id: u32,
    },
    /// A normal write targeted a read-only space. Only the explicit load and
    /// restore paths may populate such a space.
    #[error("memory space {0} is read-only")]
    ReadOnlyViolation(u32),
    /// A snapshot failed structural validation.
    #[error("corrupt or unsupported snapshot: {0}")]
    CorruptState(&'static str),
    /// A command was submitted after the scheduler quit.
    #[error("control channel is closed")]
    ChannelClosed,
    /// Snapshot file or thread i/o failed.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::EngineError;

    #[test]
    fn out_of_range_reports_offending_range() {
        let error = EngineError::OutOfRange {
            offset: 0xFFE,
            len: 3,
            limit: 0x1000,
        };
        assert_eq!(
            error.to_string(),
            "access at offset 4094 with length 3 is out of range (limit 4096)"
        );
    }

    #[test]
    fn identity_errors_name_the_rejected_id() {
        assert_eq!(
            EngineError::UnknownMemorySpace(7).to_string(),
            "unknown memory space id 7"
        );
        assert_eq!(
            EngineError::UnknownRegister {
                dev_id: 0,
                reg_id: 42
            }
            .to_string(),
            "unknown register id 42 on device 0"
        );
    }

    #[test]
    fn io_errors_convert_through_from() {
        let error = EngineError::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(matches!(error, EngineError::Io(_)));
    }
}
