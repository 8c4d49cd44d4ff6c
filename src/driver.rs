//! Driver interface: the thing that actually owns the real-time thread and
//! repeatedly calls into an `Engine` (spec §4.6, §5).
//!
//! Grounded in ecasound's `ECA_ENGINE_DEFAULT_DRIVER`/`AUDIO_IO_DEVICE`
//! split: the engine holds the scheduling *logic*, the driver holds the
//! *loop* and any device-specific wait/wake mechanics. This crate ships one
//! driver, `DefaultDriver`, a busy/backoff loop suitable for file-to-file
//! and synthetic-object chainsetups; a callback-driven `cpal` driver would
//! implement the same trait.

use crate::engine::Engine;
use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A driver repeatedly pumps an `Engine` until told to stop or the engine
/// reports it is finished (spec §4.6). `start`/`stop`/`exit` are the
/// driver's own loop controls, distinct from `Engine::command`'s opcodes —
/// they let an embedding (e.g. a host-callback driver) pause or tear down
/// the outer loop itself without going through the engine's command queue,
/// and are safe to call from a thread other than the one running `exec`.
pub trait Driver {
    fn exec(&mut self, engine: &mut Engine, batch_mode: bool) -> Result<(), EngineError>;
    /// Resume calling `engine_iteration` if the loop is currently paused.
    fn start(&self);
    /// Pause the loop between iterations without tearing it down.
    fn stop(&self);
    /// Request the loop exit at the next opportunity.
    fn exit(&self);
}

/// The default driver: a plain loop around `Engine::engine_iteration`,
/// backing off briefly when idle so a non-realtime run doesn't spin a core
/// at 100% between buffers (spec §4.7.1: "exec" drives the whole lifecycle
/// — prepare, run to completion or command-driven stop, cleanup).
pub struct DefaultDriver {
    idle_backoff: Duration,
    paused: Arc<AtomicBool>,
    exit_requested: Arc<AtomicBool>,
}

impl DefaultDriver {
    pub fn new() -> Self {
        Self {
            idle_backoff: Duration::from_micros(200),
            paused: Arc::new(AtomicBool::new(false)),
            exit_requested: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for DefaultDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for DefaultDriver {
    fn exec(&mut self, engine: &mut Engine, batch_mode: bool) -> Result<(), EngineError> {
        engine.prepare_operation()?;
        engine.start_operation()?;

        loop {
            if self.exit_requested.load(Ordering::Acquire) {
                break;
            }
            if self.paused.load(Ordering::Acquire) {
                std::thread::sleep(self.idle_backoff);
                continue;
            }
            let made_progress = engine.engine_iteration()?;
            if engine.should_exit() {
                break;
            }
            if !made_progress && !batch_mode {
                std::thread::sleep(self.idle_backoff);
            }
        }

        engine.cleanup();
        Ok(())
    }

    fn start(&self) {
        self.paused.store(false, Ordering::Release);
    }

    fn stop(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn exit(&self) {
        self.exit_requested.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_object::test_support::{MemoryInput, MemoryOutput};
    use crate::chain::Chain;
    use crate::chainsetup::ChainSetup;
    use crate::engine::Engine;

    #[test]
    fn default_driver_runs_chainsetup_to_completion() {
        let mut setup = ChainSetup::new(32, 44100);
        setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, 256)));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);

        let mut engine = Engine::new(setup);
        let mut driver = DefaultDriver::new();
        driver.exec(&mut engine, true).unwrap();

        assert!(engine.is_finished());
    }

    #[test]
    fn driver_exit_stops_the_loop_without_waiting_on_the_engine() {
        // A looping setup never finishes on its own; only the driver's own
        // exit latch (not an engine command) ends `exec` here.
        let mut setup = ChainSetup::new(4, 44100);
        setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, 1_000_000)));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);
        setup.set_length_in_samples(12);
        setup.set_looping(true);

        let mut engine = Engine::new(setup);
        let mut driver = DefaultDriver::new();
        driver.exit();
        driver.exec(&mut engine, true).unwrap();

        assert!(!engine.is_finished());
    }
}
