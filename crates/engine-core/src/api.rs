//! The stable control surface consumed by front ends.
//!
//! [`Engine`] owns the only handle to its machine state, so independent
//! engine instances can coexist in one process. Mutating calls travel to the
//! scheduler thread as commands; non-mutating reads are served directly
//! under a shared read lock, concurrently with the scheduler.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::{control_channel, Command, CommandSender, Reply};
use crate::memory::{DirtyRange, ROM_SPACE_ID};
use crate::scheduler::{
    lock_read, ExecutionScheduler, SchedulerState, TickCapability, DEFAULT_TICK_PERIOD,
};
use crate::state::{MachineState, MachineTopology};
use crate::{bus, EngineError};

/// Configuration handed to [`Engine::init`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Machine shape: memory spaces, devices and reset vectors.
    pub topology: MachineTopology,
    /// Wall-clock period of one Running-state tick.
    pub tick_period: Duration,
    /// Nibble image loaded into the ROM space before the reset vectors are
    /// read. May be shorter than the space; the remainder stays zero.
    pub rom_image: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            topology: MachineTopology::default(),
            tick_period: DEFAULT_TICK_PERIOD,
            rom_image: Vec::new(),
        }
    }
}

/// An owned emulator engine instance.
///
/// Dropping the engine sends `Quit` and joins the scheduler thread.
pub struct Engine {
    shared: Arc<RwLock<MachineState>>,
    sender: CommandSender,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Builds the machine over the configured topology, loads the ROM image,
    /// derives PC and SP from the reset vectors and spawns the scheduler
    /// thread, initially Stopped.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when the ROM image or a reset vector does
    /// not fit its space, [`EngineError::UnknownMemorySpace`] for a topology
    /// without the ROM space while an image was supplied, or
    /// [`EngineError::Io`] when the thread cannot be spawned.
    pub fn init(
        config: EngineConfig,
        capability: Box<dyn TickCapability>,
    ) -> Result<Self, EngineError> {
        let EngineConfig {
            topology,
            tick_period,
            rom_image,
        } = config;
        let mut state = MachineState::new(&topology);
        if !rom_image.is_empty() {
            state.space_mut(ROM_SPACE_ID)?.load(0, &rom_image)?;
        }
        state.reset(&topology.reset_vector)?;

        let shared = Arc::new(RwLock::new(state));
        let running = Arc::new(AtomicBool::new(false));
        let (sender, channel) = control_channel();
        let scheduler = ExecutionScheduler::new(
            Arc::clone(&shared),
            channel,
            capability,
            topology,
            tick_period,
            Arc::clone(&running),
        );
        let worker = thread::Builder::new()
            .name("engine-scheduler".to_owned())
            .spawn(move || scheduler.run_loop())?;
        Ok(Self {
            shared,
            sender,
            running,
            worker: Some(worker),
        })
    }

    /// A fresh producer handle for an independent input source, such as a
    /// keyboard-capture thread or a UI event handler.
    #[must_use]
    pub fn command_sender(&self) -> CommandSender {
        self.sender.clone()
    }

    fn blocking(&self, build: impl FnOnce(Reply) -> Command) -> Result<(), EngineError> {
        let (done, result) = mpsc::channel();
        self.sender.send(build(done))?;
        result.recv().map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enqueues `Run`: the scheduler enters the Running state.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelClosed`] after `quit`.
    pub fn run(&self) -> Result<(), EngineError> {
        self.sender.send(Command::Run)
    }

    /// Enqueues `Stop`: the scheduler leaves the Running state. A no-op when
    /// already Stopped.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelClosed`] after `quit`.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.sender.send(Command::Stop)
    }

    /// Executes exactly `count` cycles, blocking until they complete. The
    /// scheduler returns to the state it held before the call.
    ///
    /// # Errors
    ///
    /// A capability error aborts the remaining cycles and is returned;
    /// [`EngineError::ChannelClosed`] after `quit`.
    pub fn step(&self, count: u32) -> Result<(), EngineError> {
        self.blocking(|done| Command::Step { count, done })
    }

    /// Re-derives PC and SP from the reset vectors and zeroes the cycle
    /// counter, leaving memory and registers untouched. Valid in either
    /// scheduler state.
    ///
    /// # Errors
    ///
    /// Vector read failures are returned; nothing changes on failure.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.blocking(|done| Command::Reset { done })
    }

    /// Writes a versioned snapshot of the full machine state to `path`,
    /// performed on the scheduler's context so it never races a tick.
    ///
    /// # Errors
    ///
    /// [`EngineError::Io`] on file failures.
    pub fn save_state(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(|done| Command::SaveState { path, done })
    }

    /// Replaces the whole machine state from the snapshot at `path`. On any
    /// validation failure the live state is left fully intact.
    ///
    /// # Errors
    ///
    /// [`EngineError::CorruptState`] on structural mismatch,
    /// [`EngineError::Io`] on file failures.
    pub fn restore_state(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(|done| Command::RestoreState { path, done })
    }

    /// Writes `data` into a memory space starting at byte `offset`. The
    /// write happens on the scheduler's context, keeping mutation confined
    /// to the single writer.
    ///
    /// # Errors
    ///
    /// Dispatch errors are returned; a rejected write touches nothing.
    pub fn mem_write(&self, memspace: u32, offset: u32, data: &[u8]) -> Result<(), EngineError> {
        let data = data.to_vec();
        self.blocking(|done| Command::MemWrite {
            memspace,
            offset,
            data,
            done,
        })
    }

    /// Reads `len` bytes from a memory space starting at byte `offset`,
    /// served directly under the read lock.
    ///
    /// # Errors
    ///
    /// Dispatch errors are returned.
    pub fn mem_read(&self, memspace: u32, offset: u32, len: u32) -> Result<Vec<u8>, EngineError> {
        bus::mem_read(&lock_read(&self.shared), memspace, offset, len)
    }

    /// Writes a device register on the scheduler's context, masked to the
    /// register's width.
    ///
    /// # Errors
    ///
    /// Dispatch errors are returned.
    pub fn set_register(&self, dev_id: u32, reg_id: u32, value: u32) -> Result<(), EngineError> {
        self.blocking(|done| Command::SetRegister {
            dev_id,
            reg_id,
            value,
            done,
        })
    }

    /// Reads a device register directly under the read lock.
    ///
    /// # Errors
    ///
    /// Dispatch errors are returned.
    pub fn get_register(&self, dev_id: u32, reg_id: u32) -> Result<u32, EngineError> {
        bus::get_register(&lock_read(&self.shared), dev_id, reg_id)
    }

    /// Current 12-bit program counter.
    #[must_use]
    pub fn pc(&self) -> u16 {
        lock_read(&self.shared).pc()
    }

    /// Current 12-bit stack pointer.
    #[must_use]
    pub fn sp(&self) -> u16 {
        lock_read(&self.shared).sp()
    }

    /// Cycles executed since init, reset or restore.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        lock_read(&self.shared).cycle_count()
    }

    /// Scheduler state as last published by the scheduler thread.
    #[must_use]
    pub fn scheduler_state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Drains the dirty nibble ranges recorded for `memspace` since the last
    /// call. Consumed by presentation layers for modified-cell highlighting.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownMemorySpace`] for an unregistered id.
    pub fn take_dirty(&self, memspace: u32) -> Result<Vec<DirtyRange>, EngineError> {
        Ok(lock_read(&self.shared).space(memspace)?.take_dirty())
    }

    /// Requests engine shutdown. The scheduler loop terminates; subsequent
    /// commands fail with [`EngineError::ChannelClosed`].
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelClosed`] when already shut down.
    pub fn quit(&self) -> Result<(), EngineError> {
        self.sender.send(Command::Quit)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Quit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
