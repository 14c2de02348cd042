//! Thread-safe command plumbing between input sources and the scheduler.
//!
//! An unbounded multi-producer/single-consumer FIFO. Producers are cloned
//! freely across input-capturing threads; the scheduler is the only consumer.
//! Commands are delivered in enqueue order per channel. The blocking receive
//! is what lets a stopped scheduler idle at zero CPU.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::EngineError;

/// Reply slot for commands whose callers block until the scheduler finished.
pub type Reply = Sender<Result<(), EngineError>>;

/// A control command, produced by any input source and consumed exactly
/// once, in arrival order, by the scheduler.
#[derive(Debug)]
pub enum Command {
    /// Enter the Running state.
    Run,
    /// Leave the Running state. A no-op when already Stopped.
    Stop,
    /// Execute exactly `count` cycles synchronously, regardless of the
    /// current state, then return to the state held before the command.
    Step {
        /// Number of cycles to execute.
        count: u32,
        /// Signalled once every cycle completed (or the capability failed).
        done: Reply,
    },
    /// Re-derive PC and SP from the reset vectors and zero the cycle
    /// counter, leaving memory and registers untouched.
    Reset {
        /// Signalled once the reset has been applied or rejected.
        done: Reply,
    },
    /// Serialize a full snapshot to `path` on the scheduler's context.
    SaveState {
        /// Snapshot destination.
        path: PathBuf,
        /// Signalled with the save result.
        done: Reply,
    },
    /// Replace the whole machine state from the snapshot at `path`.
    RestoreState {
        /// Snapshot source.
        path: PathBuf,
        /// Signalled with the restore result.
        done: Reply,
    },
    /// Write bytes into a memory space from the scheduler's context, keeping
    /// mutation confined to the single writer.
    MemWrite {
        /// Target memory space id.
        memspace: u32,
        /// First byte offset.
        offset: u32,
        /// Bytes to write.
        data: Vec<u8>,
        /// Signalled with the write result.
        done: Reply,
    },
    /// Write a device register from the scheduler's context.
    SetRegister {
        /// Target device id.
        dev_id: u32,
        /// Target register id.
        reg_id: u32,
        /// Value to write, masked to the register width.
        value: u32,
        /// Signalled with the write result.
        done: Reply,
    },
    /// Terminate the scheduler loop unconditionally.
    Quit,
}

/// Creates a linked producer/consumer pair.
#[must_use]
pub fn control_channel() -> (CommandSender, ControlChannel) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, ControlChannel { rx })
}

/// Cloneable producer handle feeding the scheduler.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Enqueues one command.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelClosed`] once the scheduler has quit.
    pub fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx.send(command).map_err(|_| EngineError::ChannelClosed)
    }
}

/// Consumer end, owned by the scheduler.
#[derive(Debug)]
pub struct ControlChannel {
    rx: Receiver<Command>,
}

impl ControlChannel {
    /// Blocks the caller until a command arrives.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelClosed`] when every producer is gone.
    pub fn recv(&self) -> Result<Command, EngineError> {
        self.rx.recv().map_err(|_| EngineError::ChannelClosed)
    }

    /// Non-blocking poll used inside the active tick loop, so ticking is not
    /// starved by the absence of new commands.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelClosed`] when every producer is gone.
    pub fn try_recv(&self) -> Result<Option<Command>, EngineError> {
        match self.rx.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EngineError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::{control_channel, Command};
    use crate::EngineError;

    #[test]
    fn commands_arrive_in_enqueue_order() {
        let (sender, channel) = control_channel();
        sender.send(Command::Run).unwrap();
        sender.send(Command::Stop).unwrap();
        sender.send(Command::Quit).unwrap();
        assert!(matches!(channel.recv().unwrap(), Command::Run));
        assert!(matches!(channel.recv().unwrap(), Command::Stop));
        assert!(matches!(channel.recv().unwrap(), Command::Quit));
    }

    #[test]
    fn try_recv_reports_an_empty_queue_without_blocking() {
        let (sender, channel) = control_channel();
        assert!(channel.try_recv().unwrap().is_none());
        sender.send(Command::Run).unwrap();
        assert!(matches!(channel.try_recv().unwrap(), Some(Command::Run)));
    }

    #[test]
    fn cloned_producers_feed_the_same_consumer() {
        let (sender, channel) = control_channel();
        let clones: Vec<_> = (0..4).map(|_| sender.clone()).collect();
        let handles: Vec<_> = clones
            .into_iter()
            .map(|producer| thread::spawn(move || producer.send(Command::Run).unwrap()))
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for _ in 0..4 {
            assert!(matches!(channel.recv().unwrap(), Command::Run));
        }
    }

    #[test]
    fn dropped_consumer_surfaces_channel_closed() {
        let (sender, channel) = control_channel();
        drop(channel);
        assert!(matches!(
            sender.send(Command::Run),
            Err(EngineError::ChannelClosed)
        ));
    }

    #[test]
    fn dropped_producers_surface_channel_closed() {
        let (sender, channel) = control_channel();
        drop(sender);
        assert!(matches!(channel.recv(), Err(EngineError::ChannelClosed)));
        assert!(matches!(
            channel.try_recv(),
            Err(EngineError::ChannelClosed)
        ));
    }
}
