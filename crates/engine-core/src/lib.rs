//! Execution engine for a nibble-addressed machine emulator.
//!
//! The crate owns the machine state (memory spaces, device register files,
//! program counter, stack pointer, cycle counter), routes memory and
//! register traffic through a device-dispatch bus, drives a paced
//! run/stop/step scheduler on its own thread, and persists versioned
//! full-state snapshots. Instruction semantics are deliberately not defined
//! here: decode/execute plugs in through [`TickCapability`].

/// Boundary error taxonomy.
pub mod error;
pub use error::EngineError;

/// Nibble-addressed memory spaces.
pub mod memory;
pub use memory::{
    DirtyRange, MemorySpace, MASK_12BIT, NIBBLE_MASK, RAM_SPACE_ID, ROM_SPACE_ID,
};

/// Machine state aggregate, register files and topology.
pub mod state;
pub use state::{
    DeviceSpec, MachineState, MachineTopology, RegisterFile, RegisterKind, RegisterSpec,
    ResetVector, SpaceSpec, SubField, CPU_DEVICE_ID, CPU_REGISTER_LAYOUT, DEFAULT_SPACE_LEN,
    PC_RESET_VECTOR, REG_A, REG_B, REG_C, REG_E0, REG_E1, REG_E2, SP_RESET_VECTOR,
};

/// Device dispatch bus.
pub mod bus;
pub use bus::{get_register, mem_read, mem_write, set_register};

/// Command plumbing between input sources and the scheduler.
pub mod channel;
pub use channel::{control_channel, Command, CommandSender, ControlChannel, Reply};

/// Execution scheduling and the pluggable decode/execute seam.
pub mod scheduler;
pub use scheduler::{
    ExecutionScheduler, IdleCapability, SchedulerState, TickCapability, TickOutcome,
    DEFAULT_TICK_PERIOD,
};

/// Snapshot persistence.
pub mod persist;
pub use persist::{restore_state, save_state, SNAPSHOT_VERSION};

/// Host-facing control surface.
pub mod api;
pub use api::{Engine, EngineConfig};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
