//! Driver-thread-facing handle onto a proxy client's ring buffer
//! (spec §4.3, §4.9, §8: "no non-realtime object accessed on the driver
//! thread when double-buffering is enabled").
//!
//! `ProxiedAudioObject` is what a `ChainSetup` actually stores as an input
//! or output once `Engine::init_chains` wraps a slow object through the
//! `ProxyIoServer`. All of its `read_buffer`/`write_buffer` calls touch only
//! the lock-free ring, never the wrapped file or device.

use crate::audio_object::{AudioObject, AudioObjectMode};
use crate::error::SetupError;
use crate::proxy_server::ClientRing;
use crate::sample_buffer::SampleBuffer;
use ringbuf::traits::{Consumer, Observer, Producer};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub struct ProxiedAudioObject {
    label: String,
    mode: AudioObjectMode,
    channels: usize,
    sample_rate: u32,
    ring: Arc<ClientRing>,
    position: i64,
    open: bool,
}

impl ProxiedAudioObject {
    pub fn new(
        label: &str,
        mode: AudioObjectMode,
        channels: usize,
        sample_rate: u32,
        ring: Arc<ClientRing>,
    ) -> Self {
        Self {
            label: label.to_string(),
            mode,
            channels,
            sample_rate,
            ring,
            position: 0,
            open: false,
        }
    }
}

impl AudioObject for ProxiedAudioObject {
    fn label(&self) -> &str {
        &self.label
    }

    fn mode(&self) -> AudioObjectMode {
        self.mode
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frame_size_bytes(&self) -> usize {
        self.channels * std::mem::size_of::<f32>()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), SetupError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) {
        let mut guard = self.ring.consumer.lock().unwrap();
        let consumer = guard.as_mut().expect("proxied read on a write-mode ring");
        let requested = buffer.length_in_samples();
        let available_frames = consumer.occupied_len() / self.channels;
        let n = requested.min(available_frames);
        buffer.set_length(n);
        buffer.make_silent();
        if n > 0 {
            let mut interleaved = vec![0.0f32; n * self.channels];
            consumer.pop_slice(&mut interleaved);
            for ch in 0..self.channels {
                let plane = buffer.plane_mut(ch);
                for i in 0..n {
                    plane[i] = interleaved[i * self.channels + ch];
                }
            }
        }
        self.position += n as i64;
    }

    fn write_buffer(&mut self, buffer: &SampleBuffer) {
        let mut guard = self.ring.producer.lock().unwrap();
        let producer = guard.as_mut().expect("proxied write on a read-mode ring");
        let n = buffer.length_in_samples();
        let mut interleaved = vec![0.0f32; n * self.channels];
        for ch in 0..self.channels.min(buffer.channels()) {
            let plane = buffer.plane(ch);
            for i in 0..n {
                interleaved[i * self.channels + ch] = plane[i];
            }
        }
        let pushed = producer.push_slice(&interleaved) / self.channels;
        if pushed < n {
            log::warn!(
                "proxy client '{}': ring buffer full, dropped {} of {} frames",
                self.label,
                n - pushed,
                n
            );
        }
        self.position += n as i64;
    }

    fn position_in_samples(&self) -> i64 {
        self.position
    }

    fn finished(&self) -> bool {
        match self.mode {
            AudioObjectMode::Read => {
                self.ring.finished.load(Ordering::Acquire)
                    && self.ring.consumer.lock().unwrap().as_ref().unwrap().is_empty()
            }
            _ => self.ring.finished.load(Ordering::Acquire),
        }
    }

    fn is_realtime(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy_server::ProxyIoServer;
    use crate::audio_object::test_support::MemoryInput;

    #[test]
    fn proxied_read_drains_what_server_produced() {
        let server = ProxyIoServer::new();
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let input = MemoryInput::with_data("wav-in", 1, 44100, data);
        let (_id, ring) = server.register_client(Box::new(input));
        server.start();

        let mut proxied = ProxiedAudioObject::new("wav-in", AudioObjectMode::Read, 1, 44100, ring);
        let mut buf = SampleBuffer::new(16, 1);

        // Give the worker thread a moment to pump ahead.
        std::thread::sleep(std::time::Duration::from_millis(50));
        proxied.read_buffer(&mut buf);
        server.stop();

        assert!(buf.length_in_samples() > 0);
    }
}
