//! The `AudioObject` capability set (spec §3, §4.2).
//!
//! An audio object is an input or output endpoint: a real-time device, a
//! file, or a proxied (double-buffered) variant of either. The engine only
//! ever depends on this trait — concrete backends (`wav_object`,
//! `device_object`, `proxy_object`) are grounded collaborators, not part of
//! the scheduler's contract surface.

use crate::error::SetupError;
use crate::sample_buffer::SampleBuffer;

/// Read, write, or both — fixed for the lifetime of an object after `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioObjectMode {
    Read,
    Write,
    ReadWrite,
}

/// Capabilities every audio object must provide (spec §4.2).
///
/// `read_buffer`/`write_buffer` must not error in steady state; end-of-stream
/// is signaled by setting the `finished` flag, observed via `finished()`.
pub trait AudioObject: Send {
    fn label(&self) -> &str;
    fn mode(&self) -> AudioObjectMode;

    /// Downcast support for tests that need to inspect a concrete object's
    /// own state (e.g. `MemoryOutput::captured`) after it has been moved
    /// into a `ChainSetup` as `Box<dyn AudioObject>`.
    fn as_any(&self) -> &dyn std::any::Any;

    fn sample_rate(&self) -> u32;
    fn channels(&self) -> usize;

    /// Frame size in bytes (of the object's native/file representation).
    fn frame_size_bytes(&self) -> usize;

    fn is_open(&self) -> bool;

    /// Open the underlying resource. Distinct `SetupError` kind on failure
    /// (spec §7): errors at open time are never silently swallowed.
    fn open(&mut self) -> Result<(), SetupError>;
    fn close(&mut self);

    /// Read one buffer's worth of samples into `buffer`, honoring
    /// `buffer.length_in_samples()` as the requested frame count. Sets
    /// `finished` rather than erroring at end-of-stream.
    fn read_buffer(&mut self, buffer: &mut SampleBuffer) {
        let _ = buffer;
        unimplemented!("{} does not support read_buffer", self.label())
    }

    /// Write one buffer's worth of samples from `buffer`.
    fn write_buffer(&mut self, buffer: &SampleBuffer) {
        let _ = buffer;
        unimplemented!("{} does not support write_buffer", self.label())
    }

    fn position_in_samples(&self) -> i64;

    /// Set only for objects that know their own extent (typically files).
    fn length_in_samples(&self) -> Option<i64> {
        None
    }

    fn finished(&self) -> bool;

    /// Latency in samples contributed by this object (spec §4.7.8).
    fn latency(&self) -> i64 {
        0
    }

    /// Whether the audio format is fixed after `open` (spec §3). Most
    /// objects lock it; a small number of synthetic/test objects may not.
    fn locked_audio_format(&self) -> bool {
        true
    }

    /// Retune the per-call buffer size. Only meaningful for non-realtime
    /// objects (spec §4.7.5 step 2, partial final read).
    fn set_buffersize(&mut self, _frames: usize) {}

    /// Seek to an absolute sample position. Non-realtime objects implement
    /// this directly; realtime devices generally cannot seek and may treat
    /// this as a no-op.
    fn seek_to_sample(&mut self, _position: i64) {}

    /// Whether this object is tied to a hardware clock whose read/write rate
    /// must not be paced by the engine (spec glossary: "Real-time object").
    fn is_realtime(&self) -> bool {
        false
    }

    /// Real-time-only lifecycle step between `open` and `start` (spec
    /// §4.2). Non-realtime objects never need it; the default is a no-op
    /// rather than a trait split, since `ChainSetup` stores every input and
    /// output as a single `Box<dyn AudioObject>` and must be able to call
    /// this uniformly regardless of kind.
    fn prepare(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    /// Begin the hardware clock (real-time objects only).
    fn start(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    /// Pause the hardware clock (real-time objects only).
    fn stop(&mut self) {}

    /// Number of silent-prefill blocks this object can still accept, or 0 if
    /// prefill is not applicable (spec §4.7.8's `prefill_space > 0` check).
    fn prefill_space(&self) -> usize {
        0
    }

    fn is_running(&self) -> bool {
        false
    }
}
