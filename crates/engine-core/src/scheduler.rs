//! The run/stop/step state machine and its paced tick loop.
//!
//! The scheduler is the sole mutator of machine state: every write path runs
//! on its context, either as part of a tick or on behalf of a command. While
//! Stopped it blocks on the control channel and consumes no CPU; while
//! Running it polls commands without blocking and paces ticks to a fixed
//! wall-clock period measured with a monotonic clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::channel::{Command, ControlChannel};
use crate::state::{MachineState, MachineTopology};
use crate::{bus, persist, EngineError};

/// Default wall-clock period of one Running-state tick.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Host-observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulerState {
    /// No ticks execute; the scheduler blocks on the control channel.
    #[default]
    Stopped,
    /// Ticks execute at the configured period.
    Running,
}

/// Result of one decode/execute invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickOutcome {
    /// Keep executing.
    Continue,
    /// The machine halted; the Running loop transitions to Stopped.
    Halt,
}

/// Pluggable decode/execute capability invoked once per tick.
///
/// The engine defines the substrate only; instruction semantics are supplied
/// by implementations of this trait. Each successful invocation advances the
/// cycle counter by one.
pub trait TickCapability: Send {
    /// Executes one machine cycle against `state`.
    ///
    /// # Errors
    ///
    /// An error stops a Running scheduler and is surfaced to `Step` callers;
    /// the cycle it would have executed is not counted.
    fn tick(&mut self, state: &mut MachineState) -> Result<TickOutcome, EngineError>;
}

/// Capability that performs no work and never halts. Useful for driving the
/// substrate before real instruction semantics exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleCapability;

impl TickCapability for IdleCapability {
    fn tick(&mut self, _state: &mut MachineState) -> Result<TickOutcome, EngineError> {
        Ok(TickOutcome::Continue)
    }
}

pub(crate) fn lock_read(shared: &RwLock<MachineState>) -> RwLockReadGuard<'_, MachineState> {
    shared.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock_write(shared: &RwLock<MachineState>) -> RwLockWriteGuard<'_, MachineState> {
    shared.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, PartialEq, Eq)]
enum LoopFlow {
    Continue,
    Quit,
}

/// Owns the Stopped/Running state machine and drives the tick loop.
pub struct ExecutionScheduler {
    shared: Arc<RwLock<MachineState>>,
    channel: ControlChannel,
    capability: Box<dyn TickCapability>,
    topology: MachineTopology,
    tick_period: Duration,
    run_state: SchedulerState,
    running_flag: Arc<AtomicBool>,
}

impl ExecutionScheduler {
    /// Builds a scheduler over shared machine state, initially Stopped.
    ///
    /// `running_flag` mirrors the scheduler state for read-side observers.
    #[must_use]
    pub fn new(
        shared: Arc<RwLock<MachineState>>,
        channel: ControlChannel,
        capability: Box<dyn TickCapability>,
        topology: MachineTopology,
        tick_period: Duration,
        running_flag: Arc<AtomicBool>,
    ) -> Self {
        running_flag.store(false, Ordering::Release);
        Self {
            shared,
            channel,
            capability,
            topology,
            tick_period,
            run_state: SchedulerState::Stopped,
            running_flag,
        }
    }

    /// Consumes the scheduler and processes commands and ticks until `Quit`
    /// arrives or every producer is gone.
    pub fn run_loop(mut self) {
        loop {
            match self.run_state {
                SchedulerState::Stopped => {
                    // Blocks with zero CPU until a command arrives.
                    let Ok(command) = self.channel.recv() else {
                        return;
                    };
                    if self.handle(command) == LoopFlow::Quit {
                        return;
                    }
                }
                SchedulerState::Running => {
                    let tick_started = Instant::now();
                    loop {
                        match self.channel.try_recv() {
                            Ok(Some(command)) => {
                                if self.handle(command) == LoopFlow::Quit {
                                    return;
                                }
                                if self.run_state == SchedulerState::Stopped {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(_) => {
                                self.set_state(SchedulerState::Stopped);
                                return;
                            }
                        }
                    }
                    if self.run_state == SchedulerState::Running {
                        self.tick_once();
                        if let Some(remaining) =
                            self.tick_period.checked_sub(tick_started.elapsed())
                        {
                            spin_sleep::sleep(remaining);
                        }
                    }
                }
            }
        }
    }

    fn set_state(&mut self, next: SchedulerState) {
        self.run_state = next;
        self.running_flag
            .store(next == SchedulerState::Running, Ordering::Release);
    }

    fn handle(&mut self, command: Command) -> LoopFlow {
        match command {
            Command::Run => self.set_state(SchedulerState::Running),
            Command::Stop => self.set_state(SchedulerState::Stopped),
            Command::Step { count, done } => {
                let result = self.step_cycles(count);
                let _ = done.send(result);
            }
            Command::Reset { done } => {
                let vector = self.topology.reset_vector;
                let result = lock_write(&self.shared).reset(&vector);
                let _ = done.send(result);
            }
            Command::SaveState { path, done } => {
                let result = persist::save_state(&lock_read(&self.shared), &path);
                let _ = done.send(result);
            }
            Command::RestoreState { path, done } => {
                let result = persist::restore_state(&path, &self.topology)
                    .map(|fresh| *lock_write(&self.shared) = fresh);
                let _ = done.send(result);
            }
            Command::MemWrite {
                memspace,
                offset,
                data,
                done,
            } => {
                let result = bus::mem_write(&mut lock_write(&self.shared), memspace, offset, &data);
                let _ = done.send(result);
            }
            Command::SetRegister {
                dev_id,
                reg_id,
                value,
                done,
            } => {
                let result =
                    bus::set_register(&mut lock_write(&self.shared), dev_id, reg_id, value);
                let _ = done.send(result);
            }
            Command::Quit => return LoopFlow::Quit,
        }
        LoopFlow::Continue
    }

    /// Executes exactly `count` cycles back to back. The scheduler state is
    /// untouched: a halt report only matters to the Running loop. A
    /// capability error aborts the remaining cycles and forces Stopped.
    fn step_cycles(&mut self, count: u32) -> Result<(), EngineError> {
        for _ in 0..count {
            let mut state = lock_write(&self.shared);
            match self.capability.tick(&mut state) {
                Ok(_) => state.advance_cycle(),
                Err(error) => {
                    drop(state);
                    self.set_state(SchedulerState::Stopped);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn tick_once(&mut self) {
        let mut state = lock_write(&self.shared);
        match self.capability.tick(&mut state) {
            Ok(TickOutcome::Continue) => state.advance_cycle(),
            Ok(TickOutcome::Halt) => {
                state.advance_cycle();
                drop(state);
                self.set_state(SchedulerState::Stopped);
            }
            Err(_) => {
                drop(state);
                self.set_state(SchedulerState::Stopped);
            }
        }
    }
}
