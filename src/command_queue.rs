//! Single-producer/single-consumer command queue (spec §4.5, §6).
//!
//! The controller thread(s) push opcodes; the driver thread drains them
//! inside `Engine::interpret_queue`. This is the *only* channel by which a
//! running engine may be mutated from outside the driver thread (spec §5).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Operations a controller may request of a running or idle engine
/// (spec §6's opcode table).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Opcode {
    /// Stop the engine and release the driver thread.
    Exit,
    /// Begin processing (prepare must have already run).
    Start,
    /// Stop processing without releasing resources.
    Stop,
    /// Select the active chain by index (arg).
    CSelect,
    /// Toggle muting on the selected chain.
    CMute,
    /// Toggle bypass (processing on/off) on the selected chain.
    CBypass,
    /// Select a chain operator within the selected chain by index (arg).
    CopSelect,
    /// Select a parameter on the selected chain operator by index (arg).
    CoppSelect,
    /// Set the selected chain operator parameter to the given value (arg).
    CoppValue,
    /// Seek backward by `arg` seconds.
    Rewind,
    /// Seek forward by `arg` seconds.
    Forward,
    /// Seek to an absolute position, `arg` seconds.
    Setpos,
    /// Seek to an absolute position, `arg` samples.
    SetposLiveSamples,
}

/// A queued command: an opcode plus its single floating-point argument.
/// Index-valued opcodes (`CSelect`, `CopSelect`, `CoppSelect`) encode the
/// index in `arg` via an exact `f64` integer value.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub opcode: Opcode,
    pub arg: f64,
}

struct Inner {
    queue: Mutex<VecDeque<Command>>,
    condvar: Condvar,
}

/// FIFO command queue shared between controller and driver threads.
///
/// Cloning a `CommandQueue` clones the `Arc` handle; all clones share the
/// same underlying queue (spec: "sole controller→engine channel").
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Push a command onto the back of the queue. Called from controller
    /// threads.
    pub fn push_back(&self, command: Command) {
        let mut queue = self.inner.queue.lock().unwrap();
        queue.push_back(command);
        self.inner.condvar.notify_one();
    }

    /// Peek at the command at the front without removing it.
    pub fn front(&self) -> Option<Command> {
        self.inner.queue.lock().unwrap().front().copied()
    }

    /// Remove and return the command at the front, if any.
    pub fn pop_front(&self) -> Option<Command> {
        self.inner.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().unwrap().is_empty()
    }

    /// Block the calling (driver) thread until a command arrives or the
    /// timeout elapses. Mirrors the original engine's
    /// `wait_for_commands(seconds, usecs)`.
    pub fn poll(&self, timeout: Duration) -> bool {
        let queue = self.inner.queue.lock().unwrap();
        if !queue.is_empty() {
            return true;
        }
        let (queue, result) = self
            .inner
            .condvar
            .wait_timeout(queue, timeout)
            .unwrap();
        !result.timed_out() && !queue.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_ordering_preserved() {
        let q = CommandQueue::new();
        q.push_back(Command { opcode: Opcode::Start, arg: 0.0 });
        q.push_back(Command { opcode: Opcode::Stop, arg: 0.0 });
        assert_eq!(q.pop_front().unwrap().opcode, Opcode::Start);
        assert_eq!(q.pop_front().unwrap().opcode, Opcode::Stop);
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn front_does_not_remove() {
        let q = CommandQueue::new();
        q.push_back(Command { opcode: Opcode::Exit, arg: 0.0 });
        assert!(q.front().is_some());
        assert!(!q.is_empty());
    }

    #[test]
    fn poll_returns_immediately_when_nonempty() {
        let q = CommandQueue::new();
        q.push_back(Command { opcode: Opcode::Exit, arg: 0.0 });
        assert!(q.poll(Duration::from_secs(1)));
    }

    #[test]
    fn poll_times_out_when_empty() {
        let q = CommandQueue::new();
        assert!(!q.poll(Duration::from_millis(20)));
    }

    #[test]
    fn poll_wakes_on_push_from_other_thread() {
        let q = CommandQueue::new();
        let q2 = q.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q2.push_back(Command { opcode: Opcode::Stop, arg: 0.0 });
        });
        assert!(q.poll(Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
