//! # chainflow
//!
//! A real-time multitrack audio processing engine: inputs are read,
//! routed through per-chain operator pipelines, mixed, and written to
//! outputs, with a single command queue as the only channel by which a
//! running engine may be controlled from another thread.
//!
//! ## Architecture
//!
//! - [`sample_buffer`]: planar, reusable audio block with an rt-lock
//!   forbidding reallocation on the driver thread.
//! - [`audio_object`]: the `AudioObject` capability set every input/output
//!   implements, including the real-time-only `prepare`/`start`/`stop`
//!   methods (default no-ops for non-realtime kinds) — see [`file_object`],
//!   [`device_object`], and [`proxy_object`] for concrete backends.
//! - [`proxy_server`]: background worker double-buffering slow
//!   (non-realtime) objects so the driver thread never blocks on them.
//! - [`chain`]: an ordered `ChainOperator` pipeline bound to one input and
//!   one output.
//! - [`command_queue`]: the sole controller→engine channel.
//! - [`chainsetup`]: the live, in-memory processing graph an `Engine` runs.
//! - [`engine`] / [`driver`]: the scheduler and the loop that drives it.
//! - [`config`]: persisted engine defaults.
//! - [`monitoring`]: optional per-iteration timing profiler.
//! - [`platform`]: real-time thread scheduling.
//! - [`error`]: structured setup/protocol error kinds.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chainflow::chain::Chain;
//! use chainflow::chainsetup::ChainSetup;
//! use chainflow::driver::{DefaultDriver, Driver};
//! use chainflow::engine::Engine;
//! use chainflow::file_object::WavFileObject;
//!
//! let mut setup = ChainSetup::new(1024, 44100);
//! setup.add_input(Box::new(WavFileObject::open_read("in", "input.wav")));
//! setup.add_output(Box::new(WavFileObject::open_write("out", "output.wav", 2, 44100)));
//! setup.add_chain(Chain::new("c1", 0, 0));
//! setup.set_enabled(true);
//!
//! let mut engine = Engine::new(setup);
//! DefaultDriver::new().exec(&mut engine, true).unwrap();
//! assert!(engine.is_finished());
//! ```

pub mod audio_object;
pub mod chain;
pub mod chainsetup;
pub mod command_queue;
pub mod config;
pub mod device_object;
pub mod driver;
pub mod engine;
pub mod error;
pub mod file_object;
pub mod monitoring;
pub mod platform;
pub mod proxy_object;
pub mod proxy_server;
pub mod sample_buffer;

#[cfg(test)]
pub mod tests;

pub use chainsetup::ChainSetup;
pub use engine::{Engine, EngineStatus};
pub use error::{EngineError, ProtocolViolation, SetupError};
pub use sample_buffer::SampleBuffer;
