//! Machine state aggregate and register model primitives.

/// The aggregate machine state and its declarative topology.
pub mod machine;
/// Data-driven register files.
pub mod registers;

pub use machine::{
    DeviceSpec, MachineState, MachineTopology, ResetVector, SpaceSpec, DEFAULT_SPACE_LEN,
    PC_RESET_VECTOR, SP_RESET_VECTOR,
};
pub use registers::{
    RegisterFile, RegisterKind, RegisterSpec, SubField, CPU_DEVICE_ID, CPU_REGISTER_LAYOUT, REG_A,
    REG_B, REG_C, REG_E0, REG_E1, REG_E2,
};
