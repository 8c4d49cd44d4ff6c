//! Proxy I/O Server: background worker servicing double-buffered clients
//! (spec §4.3), grounded in ecasound's `AUDIO_IO_PROXY_SERVER` and the
//! teacher's `realtime_audio` ring-buffer wiring (`ringbuf::HeapRb` feeding
//! a `cpal` callback from a background thread).
//!
//! A proxy client wraps one non-realtime (or slow) `AudioObject`. The server
//! thread alone ever touches the wrapped object; the driver thread only
//! touches the client's ring buffer through `ProxiedAudioObject`
//! (`proxy_object.rs`), so a slow file/network read never blocks the
//! real-time loop.

use crate::audio_object::{AudioObject, AudioObjectMode};
use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DEFAULT_BUFFERSIZE: usize = 1024;
const DEFAULT_NUM_BUFFERS: usize = 4;

/// Interleaved sample ring, shared between the server worker and a
/// `ProxiedAudioObject` (driver-thread side).
pub(crate) struct ClientRing {
    pub channels: usize,
    pub producer: Mutex<Option<HeapProd<f32>>>,
    pub consumer: Mutex<Option<HeapCons<f32>>>,
    pub finished: AtomicBool,
    pub wake: Condvar,
    pub wake_lock: Mutex<()>,
}

impl ClientRing {
    fn notify(&self) {
        let _g = self.wake_lock.lock().unwrap();
        self.wake.notify_all();
    }
}

struct RegisteredClient {
    label: String,
    mode: AudioObjectMode,
    object: Mutex<Box<dyn AudioObject>>,
    ring: Arc<ClientRing>,
    scratch_frames: usize,
}

/// Handle returned by `register_client`, used by `proxy_object` to build a
/// `ProxiedAudioObject` and by the server to address a specific client.
pub struct ClientId(usize);

/// Notified by the worker thread at the end of every sweep; backs the
/// `wait_for_*` condition waits (spec §4.3). Kept separate from
/// `ProxyIoServer` so the free-standing `service_loop` can hold just the
/// handle it needs rather than the whole server.
#[derive(Default)]
struct SweepSignal {
    condvar: Condvar,
    lock: Mutex<()>,
}

impl SweepSignal {
    fn notify(&self) {
        let _g = self.lock.lock().unwrap();
        self.condvar.notify_all();
    }

    /// Re-check `done` after every sweep notification, up to `timeout`.
    fn wait_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap();
        loop {
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return done();
            }
            let (next_guard, result) = self.condvar.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
            if result.timed_out() {
                return done();
            }
        }
    }
}

/// Background worker that round-robins over registered clients, pumping
/// samples between each client's wrapped `AudioObject` and its ring buffer.
pub struct ProxyIoServer {
    clients: Mutex<Vec<Arc<RegisteredClient>>>,
    running: Arc<AtomicBool>,
    exit: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    buffersize: usize,
    num_buffers: usize,
    sched_priority: Mutex<Option<i32>>,
    sweep: Arc<SweepSignal>,
}

impl ProxyIoServer {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            exit: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            buffersize: DEFAULT_BUFFERSIZE,
            num_buffers: DEFAULT_NUM_BUFFERS,
            sched_priority: Mutex::new(None),
            sweep: Arc::new(SweepSignal::default()),
        }
    }

    /// Configure the per-client ring capacity as `buffersize * num_buffers`
    /// frames. Must be called before `register_client`.
    pub fn set_buffer_defaults(&mut self, buffersize: usize, num_buffers: usize) {
        self.buffersize = buffersize;
        self.num_buffers = num_buffers;
    }

    pub fn set_sched_priority(&self, priority: i32) {
        *self.sched_priority.lock().unwrap() = Some(priority);
    }

    /// Wrap `object` for proxied access. Returns the `ClientId` and the
    /// shared ring used to build a `ProxiedAudioObject`.
    pub fn register_client(
        &self,
        object: Box<dyn AudioObject>,
    ) -> (ClientId, Arc<ClientRing>) {
        let label = object.label().to_string();
        let mode = object.mode();
        let channels = object.channels();
        let capacity = channels * self.buffersize * self.num_buffers;

        let rb = HeapRb::<f32>::new(capacity.max(channels));
        let (producer, consumer) = rb.split();

        let ring = Arc::new(ClientRing {
            channels,
            // Both halves are kept on the shared ring regardless of mode:
            // for an input (Read) client the server writes ahead through
            // `producer` and `ProxiedAudioObject` drains `consumer`; for an
            // output (Write) client the roles swap. See `proxy_object.rs`.
            producer: Mutex::new(Some(producer)),
            consumer: Mutex::new(Some(consumer)),
            finished: AtomicBool::new(false),
            wake: Condvar::new(),
            wake_lock: Mutex::new(()),
        });

        let registered = Arc::new(RegisteredClient {
            label,
            mode,
            object: Mutex::new(object),
            ring: ring.clone(),
            scratch_frames: self.buffersize,
        });

        let mut clients = self.clients.lock().unwrap();
        let id = clients.len();
        clients.push(registered);
        (ClientId(id), ring)
    }

    pub fn unregister_client(&self, id: ClientId) {
        let mut clients = self.clients.lock().unwrap();
        if id.0 < clients.len() {
            clients.remove(id.0);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the background worker thread. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.exit.store(false, Ordering::Release);

        let clients = Arc::new(self.clients.lock().unwrap().clone());
        let running = self.running.clone();
        let exit = self.exit.clone();
        let sweep = self.sweep.clone();
        let priority = *self.sched_priority.lock().unwrap();

        info!("proxy i/o server: starting worker thread for {} clients", clients.len());
        let handle = thread::spawn(move || {
            if let Some(p) = priority {
                crate::platform::set_realtime_priority(p);
            }
            service_loop(clients, exit, sweep.clone());
            running.store(false, Ordering::Release);
            sweep.notify();
        });
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Signal the worker to exit and join it. Blocks until the thread
    /// observes the exit latch and returns.
    pub fn stop(&self) {
        self.exit.store(true, Ordering::Release);
        self.sweep.condvar.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Block until every registered input client's ring reports full (no
    /// more vacancy for the server to write ahead), or `timeout` elapses.
    /// Used by `Engine::prepare_operation` after starting the server, to
    /// wait out the initial prefill sweep before priming real-time outputs.
    pub fn wait_for_full(&self, timeout: Duration) -> bool {
        self.sweep.wait_until(timeout, || self.is_full())
    }

    /// Block until any input client has data available to read, or
    /// `timeout` elapses.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        self.sweep.wait_until(timeout, || {
            let clients = self.clients.lock().unwrap();
            clients.iter().any(|c| match c.mode {
                AudioObjectMode::Read => c
                    .ring
                    .consumer
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|cons| !cons.is_empty())
                    .unwrap_or(false),
                _ => false,
            })
        })
    }

    /// Block until the worker thread has observed the exit latch and is no
    /// longer running, or `timeout` elapses.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        self.sweep.wait_until(timeout, || !self.is_running())
    }

    /// Block until every write-mode client's ring has fully drained to its
    /// underlying object, or `timeout` elapses. Used during teardown so a
    /// buffered file write isn't silently dropped at `stop`.
    pub fn wait_for_flush(&self, timeout: Duration) -> bool {
        self.sweep.wait_until(timeout, || {
            let clients = self.clients.lock().unwrap();
            clients.iter().all(|c| match c.mode {
                AudioObjectMode::Write => c
                    .ring
                    .consumer
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|cons| cons.is_empty())
                    .unwrap_or(true),
                _ => true,
            })
        })
    }

    /// Request every write-mode client's ring to drain, then wait for it.
    /// Equivalent to `wait_for_flush` with a generous fixed timeout, kept as
    /// a separate call for the "lifecycle control" surface the spec names
    /// alongside `start`/`stop` (§4.3).
    pub fn flush(&self) {
        self.wait_for_flush(Duration::from_secs(5));
    }

    /// True if every client's ring is at full occupancy (no room for the
    /// server to write further ahead on input clients).
    pub fn is_full(&self) -> bool {
        let clients = self.clients.lock().unwrap();
        clients.iter().all(|c| match c.mode {
            AudioObjectMode::Read => c
                .ring
                .producer
                .lock()
                .unwrap()
                .as_ref()
                .map(|p| p.is_full())
                .unwrap_or(true),
            _ => true,
        })
    }
}

impl Default for ProxyIoServer {
    fn default() -> Self {
        Self::new()
    }
}

fn service_loop(clients: Arc<Vec<Arc<RegisteredClient>>>, exit: Arc<AtomicBool>, sweep: Arc<SweepSignal>) {
    let mut scratch = crate::sample_buffer::SampleBuffer::new(1, 1);
    loop {
        if exit.load(Ordering::Acquire) {
            debug!("proxy i/o server: exit latch observed, worker stopping");
            return;
        }
        let mut did_work = false;
        for client in clients.iter() {
            match client.mode {
                AudioObjectMode::Read => did_work |= service_input(client, &mut scratch),
                AudioObjectMode::Write => did_work |= service_output(client, &mut scratch),
                AudioObjectMode::ReadWrite => {
                    warn!("proxy client '{}' requested ReadWrite mode, unsupported", client.label);
                }
            }
        }
        sweep.notify();
        if !did_work {
            thread::sleep(Duration::from_millis(2));
        }
    }
}

fn service_input(
    client: &Arc<RegisteredClient>,
    scratch: &mut crate::sample_buffer::SampleBuffer,
) -> bool {
    let mut producer_guard = client.ring.producer.lock().unwrap();
    let Some(producer) = producer_guard.as_mut() else { return false };
    if producer.vacant_len() < client.ring.channels * client.scratch_frames {
        return false;
    }
    if scratch.channels() != client.ring.channels || scratch.capacity() < client.scratch_frames {
        *scratch = crate::sample_buffer::SampleBuffer::new(client.scratch_frames, client.ring.channels);
    }
    let mut object = client.object.lock().unwrap();
    object.read_buffer(scratch);
    let n = scratch.length_in_samples();
    if n == 0 {
        if object.finished() {
            client.ring.finished.store(true, Ordering::Release);
            client.ring.notify();
        }
        return false;
    }
    let mut interleaved = vec![0.0f32; n * client.ring.channels];
    for ch in 0..client.ring.channels {
        let plane = scratch.plane(ch);
        for i in 0..n {
            interleaved[i * client.ring.channels + ch] = plane[i];
        }
    }
    producer.push_slice(&interleaved);
    if object.finished() {
        client.ring.finished.store(true, Ordering::Release);
    }
    client.ring.notify();
    true
}

fn service_output(
    client: &Arc<RegisteredClient>,
    scratch: &mut crate::sample_buffer::SampleBuffer,
) -> bool {
    let mut consumer_guard = client.ring.consumer.lock().unwrap();
    let Some(consumer) = consumer_guard.as_mut() else { return false };
    let available_frames = consumer.occupied_len() / client.ring.channels;
    if available_frames == 0 {
        return false;
    }
    let n = available_frames.min(client.scratch_frames);
    if scratch.channels() != client.ring.channels || scratch.capacity() < n {
        *scratch = crate::sample_buffer::SampleBuffer::new(n.max(client.scratch_frames), client.ring.channels);
    }
    let mut interleaved = vec![0.0f32; n * client.ring.channels];
    consumer.pop_slice(&mut interleaved);
    scratch.set_length(n);
    for ch in 0..client.ring.channels {
        let plane = scratch.plane_mut(ch);
        for i in 0..n {
            plane[i] = interleaved[i * client.ring.channels + ch];
        }
    }
    let mut object = client.object.lock().unwrap();
    object.write_buffer(scratch);
    client.ring.notify();
    true
}
