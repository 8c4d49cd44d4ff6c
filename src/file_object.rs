//! WAV file audio object (spec §4.9), wrapping `hound` for non-realtime
//! read/write. One of the two concrete object kinds needed to exercise the
//! engine end to end without a sound card.

use crate::audio_object::{AudioObject, AudioObjectMode};
use crate::error::SetupError;
use crate::sample_buffer::SampleBuffer;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

enum Backend {
    Reader(WavReader<std::io::BufReader<File>>),
    Writer(WavWriter<BufWriter<File>>),
    Closed,
}

pub struct WavFileObject {
    label: String,
    path: PathBuf,
    mode: AudioObjectMode,
    channels: usize,
    sample_rate: u32,
    position: i64,
    length: Option<i64>,
    buffersize: usize,
    finished: bool,
    backend: Backend,
}

impl WavFileObject {
    /// Open an existing file for reading. Channel count and sample rate
    /// come from the file header.
    pub fn open_read(label: &str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            label: label.to_string(),
            path,
            mode: AudioObjectMode::Read,
            channels: 0,
            sample_rate: 0,
            position: 0,
            length: None,
            buffersize: 0,
            finished: false,
            backend: Backend::Closed,
        }
    }

    /// Create (or truncate) a file for writing with the given format.
    pub fn open_write(label: &str, path: impl Into<PathBuf>, channels: usize, sample_rate: u32) -> Self {
        Self {
            label: label.to_string(),
            path: path.into(),
            mode: AudioObjectMode::Write,
            channels,
            sample_rate,
            position: 0,
            length: None,
            buffersize: 0,
            finished: false,
            backend: Backend::Closed,
        }
    }
}

impl AudioObject for WavFileObject {
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
        !matches!(self.backend, Backend::Closed)
    }

    fn open(&mut self) -> Result<(), SetupError> {
        match self.mode {
            AudioObjectMode::Read => {
                let reader = WavReader::open(&self.path).map_err(|e| SetupError::OpenFailed {
                    label: self.label.clone(),
                    reason: e.to_string(),
                })?;
                let spec = reader.spec();
                self.channels = spec.channels as usize;
                self.sample_rate = spec.sample_rate;
                self.length = Some(reader.duration() as i64);
                self.backend = Backend::Reader(reader);
            }
            AudioObjectMode::Write => {
                let spec = WavSpec {
                    channels: self.channels as u16,
                    sample_rate: self.sample_rate,
                    bits_per_sample: 32,
                    sample_format: SampleFormat::Float,
                };
                let writer = WavWriter::create(&self.path, spec).map_err(|e| SetupError::OpenFailed {
                    label: self.label.clone(),
                    reason: e.to_string(),
                })?;
                self.backend = Backend::Writer(writer);
            }
            AudioObjectMode::ReadWrite => {
                return Err(SetupError::InvalidConfiguration(
                    "WavFileObject does not support ReadWrite mode".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Backend::Writer(writer) = std::mem::replace(&mut self.backend, Backend::Closed) {
            if let Err(e) = writer.finalize() {
                log::error!("failed to finalize wav file '{}': {e}", self.label);
            }
        }
    }

    /// Honors `set_buffersize` for the partial-final-read boundary (spec
    /// §4.7.5 step 2): the last call before EOF returns fewer samples than
    /// requested rather than erroring.
    fn read_buffer(&mut self, buffer: &mut SampleBuffer) {
        let Backend::Reader(reader) = &mut self.backend else {
            buffer.set_length(0);
            return;
        };
        let requested = if self.buffersize > 0 {
            self.buffersize
        } else {
            buffer.length_in_samples()
        }
        .min(buffer.capacity());

        let mut samples = reader.samples::<f32>();
        let mut read_frames = 0;
        buffer.set_length(requested);
        buffer.make_silent();
        'frames: for i in 0..requested {
            for ch in 0..self.channels.min(buffer.channels()) {
                match samples.next() {
                    Some(Ok(s)) => buffer.plane_mut(ch)[i] = s,
                    _ => break 'frames,
                }
            }
            read_frames = i + 1;
        }
        buffer.set_length(read_frames);
        self.position += read_frames as i64;
        if read_frames < requested {
            self.finished = true;
        }
    }

    fn write_buffer(&mut self, buffer: &SampleBuffer) {
        let Backend::Writer(writer) = &mut self.backend else {
            return;
        };
        let n = buffer.length_in_samples();
        for i in 0..n {
            for ch in 0..self.channels {
                let sample = if ch < buffer.channels() { buffer.plane(ch)[i] } else { 0.0 };
                if let Err(e) = writer.write_sample(sample) {
                    log::error!("wav write failed for '{}': {e}", self.label);
                    self.finished = true;
                    return;
                }
            }
        }
        self.position += n as i64;
    }

    fn position_in_samples(&self) -> i64 {
        self.position
    }

    fn length_in_samples(&self) -> Option<i64> {
        self.length
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn set_buffersize(&mut self, frames: usize) {
        self.buffersize = frames;
    }

    fn seek_to_sample(&mut self, position: i64) {
        if let Backend::Reader(reader) = &mut self.backend {
            let frame = position.max(0) as u32;
            if reader.seek(frame).is_ok() {
                self.position = position;
                self.finished = false;
            }
        }
    }
}
