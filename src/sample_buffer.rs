//! Planar multi-channel audio block (spec §3, §4.1).
//!
//! Mirrors the teacher's `realtime_audio::AudioFrame` in spirit — a
//! pre-allocatable, reusable audio container — but stores samples planar
//! (one contiguous `Vec<f32>` per channel) rather than interleaved, per the
//! data model: "`C` contiguous channel planes of floating-point samples."

use log::warn;

/// A fixed-capacity, variable-length planar audio block.
///
/// Invariants (spec §3):
/// 1. `length_in_samples() <= capacity()`.
/// 2. While `rt_lock` is set, no operation may reallocate planes or grow
///    capacity — only overwrite, reshape within capacity, or mix.
/// 3. Reshaping to a larger channel count while rt-locked is a programmer
///    error, not a runtime-reported failure.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// One contiguous plane per channel, each allocated to `capacity`.
    planes: Vec<Vec<f32>>,
    /// Number of valid samples per plane (`length <= capacity`).
    length: usize,
    /// Allocated samples per plane.
    capacity: usize,
    rt_locked: bool,
}

impl SampleBuffer {
    /// Create a new buffer with `capacity` samples per channel and `channels`
    /// planes, pre-allocated and zeroed.
    pub fn new(capacity: usize, channels: usize) -> Self {
        Self {
            planes: (0..channels).map(|_| vec![0.0; capacity]).collect(),
            length: capacity,
            capacity,
            rt_locked: false,
        }
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn length_in_samples(&self) -> usize {
        self.length
    }

    pub fn is_rt_locked(&self) -> bool {
        self.rt_locked
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.planes[channel][..self.length]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [f32] {
        &mut self.planes[channel][..self.length]
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    /// Set the real-time lock. While set, no operation on this buffer may
    /// reallocate or grow capacity; violating that is a programmer error.
    pub fn set_rt_lock(&mut self, locked: bool) {
        self.rt_locked = locked;
    }

    /// Set the valid length. Never reallocates; the caller must keep
    /// `length <= capacity`.
    ///
    /// # Panics
    /// Panics if `length` exceeds `capacity` — this is an invariant
    /// violation (spec §4.1: "Failures are programmer errors, not
    /// runtime-reported"), not a recoverable condition.
    pub fn set_length(&mut self, length: usize) {
        assert!(
            length <= self.capacity,
            "set_length({length}) exceeds capacity {}",
            self.capacity
        );
        self.length = length;
    }

    pub fn make_silent(&mut self) {
        for plane in &mut self.planes {
            plane[..self.length].fill(0.0);
        }
    }

    /// Reshape to `new_channels` planes. Reuses existing planes where
    /// possible; only allocates when growing, which is forbidden while
    /// rt-locked.
    ///
    /// # Panics
    /// Panics if growth is required while `rt_locked` is set.
    pub fn reshape_channels(&mut self, new_channels: usize) {
        if new_channels == self.planes.len() {
            return;
        }
        if new_channels < self.planes.len() {
            self.planes.truncate(new_channels);
            return;
        }
        assert!(
            !self.rt_locked,
            "reshape_channels({new_channels}) would grow allocation while rt-locked"
        );
        self.planes.resize_with(new_channels, || vec![0.0; self.capacity]);
    }

    /// Copy `other`'s contents into `self`. Channel counts must match after
    /// any caller-side reshape; length is taken from `other`.
    ///
    /// # Panics
    /// Panics on channel mismatch.
    pub fn copy_from(&mut self, other: &SampleBuffer) {
        assert_eq!(
            self.channels(),
            other.channels(),
            "copy_from: channel count mismatch"
        );
        self.length = other.length;
        for (dst, src) in self.planes.iter_mut().zip(other.planes.iter()) {
            dst[..self.length].copy_from_slice(&src[..other.length]);
        }
    }

    /// Sum `other` into `self`, scaled by `1/weight`. Used for fan-in mixing
    /// (spec §4.7.5 step 5): subsequent contributions beyond the first are
    /// added this way.
    ///
    /// # Panics
    /// Panics on channel mismatch or if `weight == 0`.
    pub fn add_weighted(&mut self, other: &SampleBuffer, weight: usize) {
        assert_eq!(
            self.channels(),
            other.channels(),
            "add_weighted: channel count mismatch"
        );
        assert!(weight != 0, "add_weighted: weight must be non-zero");
        let scale = 1.0 / weight as f32;
        let len = self.length.min(other.length);
        for (dst, src) in self.planes.iter_mut().zip(other.planes.iter()) {
            for i in 0..len {
                dst[i] += src[i] * scale;
            }
        }
    }

    /// Scale every sample in place by `1/weight`.
    ///
    /// # Panics
    /// Panics if `weight == 0`.
    pub fn divide_by(&mut self, weight: usize) {
        assert!(weight != 0, "divide_by: weight must be non-zero");
        let scale = 1.0 / weight as f32;
        for plane in &mut self.planes {
            for sample in plane[..self.length].iter_mut() {
                *sample *= scale;
            }
        }
    }
}

impl SampleBuffer {
    /// Construct with an explicit initial length, useful for tests that want
    /// a shorter-than-capacity block without a separate `set_length` call.
    pub fn with_length(capacity: usize, channels: usize, length: usize) -> Self {
        let mut buf = Self::new(capacity, channels);
        buf.set_length(length);
        buf
    }

    /// Warn-and-clamp variant of `reshape_channels` for call sites that
    /// cannot tolerate a panic (defensive boundary, not the audio path).
    pub fn try_reshape_channels(&mut self, new_channels: usize) -> bool {
        if new_channels > self.planes.len() && self.rt_locked {
            warn!(
                "refusing to grow sample buffer from {} to {} channels while rt-locked",
                self.planes.len(),
                new_channels
            );
            return false;
        }
        self.reshape_channels(new_channels);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_zeroed_and_full_length() {
        let buf = SampleBuffer::new(128, 2);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.capacity(), 128);
        assert_eq!(buf.length_in_samples(), 128);
        assert!(buf.plane(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn set_length_never_exceeds_capacity() {
        let mut buf = SampleBuffer::new(64, 1);
        buf.set_length(32);
        assert_eq!(buf.length_in_samples(), 32);
    }

    #[test]
    #[should_panic]
    fn set_length_beyond_capacity_panics() {
        let mut buf = SampleBuffer::new(64, 1);
        buf.set_length(65);
    }

    #[test]
    fn reshape_shrink_never_allocates() {
        let mut buf = SampleBuffer::new(64, 4);
        buf.set_rt_lock(true);
        buf.reshape_channels(2);
        assert_eq!(buf.channels(), 2);
    }

    #[test]
    #[should_panic]
    fn reshape_grow_while_rt_locked_panics() {
        let mut buf = SampleBuffer::new(64, 2);
        buf.set_rt_lock(true);
        buf.reshape_channels(4);
    }

    #[test]
    fn copy_from_matches_contents_and_length() {
        let mut src = SampleBuffer::new(16, 1);
        src.plane_mut(0).fill(1.5);
        src.set_length(8);

        let mut dst = SampleBuffer::new(16, 1);
        dst.copy_from(&src);
        assert_eq!(dst.length_in_samples(), 8);
        assert!(dst.plane(0).iter().all(|&s| s == 1.5));
    }

    #[test]
    fn mix_averaging_law() {
        // output_chain_count == k: sum of k slots each scaled by 1/k.
        let mut a = SampleBuffer::new(4, 1);
        a.plane_mut(0).copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let mut b = SampleBuffer::new(4, 1);
        b.plane_mut(0).copy_from_slice(&[3.0, 3.0, 3.0, 3.0]);

        let mut mix = SampleBuffer::new(4, 1);
        mix.copy_from(&a);
        mix.divide_by(2);
        mix.add_weighted(&b, 2);

        assert!(mix.plane(0).iter().all(|&s| (s - 2.0).abs() < 1e-6));
    }

    #[test]
    fn make_silent_zeroes_only_valid_length() {
        let mut buf = SampleBuffer::new(8, 1);
        buf.plane_mut(0).fill(9.0);
        buf.set_length(4);
        buf.make_silent();
        assert!(buf.plane(0).iter().all(|&s| s == 0.0));
    }
}
