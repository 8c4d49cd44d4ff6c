//! Cross-platform real-time device object (spec §4.9), wrapping a `cpal`
//! stream the way the teacher's `realtime_audio::RealTimeAudioProcessor`
//! does: a lock-free `ringbuf::HeapRb` sits between the audio callback
//! (owned by `cpal`, running on its own thread) and this object's
//! `read_buffer`/`write_buffer`, which are called from the driver thread.

use crate::audio_object::{AudioObject, AudioObjectMode};
use crate::error::SetupError;
use crate::sample_buffer::SampleBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use log::{error, info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

const RING_BLOCKS: usize = 8;

pub struct CpalDeviceObject {
    label: String,
    mode: AudioObjectMode,
    channels: usize,
    sample_rate: u32,
    buffersize: usize,

    device: Option<Device>,
    stream: Option<Stream>,

    producer: Option<Mutex<HeapProd<f32>>>,
    consumer: Option<Mutex<HeapCons<f32>>>,

    running: Arc<AtomicBool>,
    position: Arc<AtomicI64>,
    underrun_latency: i64,
}

impl CpalDeviceObject {
    fn new(label: &str, mode: AudioObjectMode, channels: usize, sample_rate: u32, buffersize: usize) -> Self {
        Self {
            label: label.to_string(),
            mode,
            channels,
            sample_rate,
            buffersize,
            device: None,
            stream: None,
            producer: None,
            consumer: None,
            running: Arc::new(AtomicBool::new(false)),
            position: Arc::new(AtomicI64::new(0)),
            underrun_latency: (buffersize * RING_BLOCKS) as i64,
        }
    }

    pub fn default_input(label: &str, channels: usize, sample_rate: u32, buffersize: usize) -> Self {
        Self::new(label, AudioObjectMode::Read, channels, sample_rate, buffersize)
    }

    pub fn default_output(label: &str, channels: usize, sample_rate: u32, buffersize: usize) -> Self {
        Self::new(label, AudioObjectMode::Write, channels, sample_rate, buffersize)
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels as u16,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.buffersize as u32),
        }
    }
}

impl AudioObject for CpalDeviceObject {
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
        self.device.is_some()
    }

    fn open(&mut self) -> Result<(), SetupError> {
        let host = cpal::default_host();
        let device = match self.mode {
            AudioObjectMode::Read => host.default_input_device(),
            _ => host.default_output_device(),
        }
        .ok_or_else(|| SetupError::OpenFailed {
            label: self.label.clone(),
            reason: "no default audio device available".to_string(),
        })?;
        info!("opened cpal device '{}' for {}", device.name().unwrap_or_default(), self.label);
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        self.device = None;
    }

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) {
        let Some(consumer_lock) = &self.consumer else {
            buffer.set_length(0);
            return;
        };
        let mut consumer = consumer_lock.lock().unwrap();
        let requested = buffer.length_in_samples();
        let available = consumer.occupied_len() / self.channels;
        let n = requested.min(available);
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
        } else {
            warn!("'{}': buffer underrun, no samples available from device callback", self.label);
        }
        self.position.fetch_add(n as i64, Ordering::Relaxed);
    }

    fn write_buffer(&mut self, buffer: &SampleBuffer) {
        let Some(producer_lock) = &self.producer else { return };
        let mut producer = producer_lock.lock().unwrap();
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
            warn!("'{}': output ring full, dropped {} frames", self.label, n - pushed);
        }
        self.position.fetch_add(n as i64, Ordering::Relaxed);
    }

    fn position_in_samples(&self) -> i64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finished(&self) -> bool {
        false
    }

    fn latency(&self) -> i64 {
        self.underrun_latency
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn prepare(&mut self) -> Result<(), SetupError> {
        let device = self.device.as_ref().ok_or_else(|| SetupError::PrepareFailed {
            label: self.label.clone(),
            reason: "prepare called before open".to_string(),
        })?;
        let config = self.stream_config();
        let capacity = self.channels * self.buffersize * RING_BLOCKS;
        let rb = HeapRb::<f32>::new(capacity.max(self.channels));
        let (producer, consumer) = rb.split();

        let err_label = self.label.clone();
        let stream = match self.mode {
            AudioObjectMode::Read => {
                let producer = Arc::new(Mutex::new(producer));
                self.consumer = Some(Mutex::new(consumer));
                let producer_cb = producer.clone();
                device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _| {
                            let mut p = producer_cb.lock().unwrap();
                            let _ = p.push_slice(data);
                        },
                        move |e| error!("cpal input stream error on '{err_label}': {e}"),
                        None,
                    )
                    .map_err(|e| SetupError::PrepareFailed {
                        label: self.label.clone(),
                        reason: e.to_string(),
                    })?
            }
            _ => {
                let consumer = Arc::new(Mutex::new(consumer));
                self.producer = Some(Mutex::new(producer));
                let consumer_cb = consumer.clone();
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _| {
                            let mut c = consumer_cb.lock().unwrap();
                            let got = c.pop_slice(data);
                            for sample in &mut data[got..] {
                                *sample = 0.0;
                            }
                        },
                        move |e| error!("cpal output stream error on '{err_label}': {e}"),
                        None,
                    )
                    .map_err(|e| SetupError::PrepareFailed {
                        label: self.label.clone(),
                        reason: e.to_string(),
                    })?
            }
        };
        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<(), SetupError> {
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| SetupError::PrepareFailed {
                label: self.label.clone(),
                reason: e.to_string(),
            })?;
        }
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.pause();
        }
        self.running.store(false, Ordering::Relaxed);
    }

    fn prefill_space(&self) -> usize {
        match &self.producer {
            Some(p) => p.lock().unwrap().vacant_len() / self.channels.max(1),
            None => 0,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}
