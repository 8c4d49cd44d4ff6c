//! The scheduler: prepares a `ChainSetup`, runs it one iteration at a time,
//! and mutates itself only through the command queue once running (spec
//! §3, §4.7).
//!
//! Grounded in ecasound's `ECA_ENGINE` (`libecasound/eca-engine.cpp`):
//! `engine_iteration`, `prepare_operation`/`start_operation`/
//! `stop_operation`, `interpret_queue`, `update_cache_chain_connections`,
//! `update_cache_latency_values`, `inputs_to_chains`/`process_chains`/
//! `mix_to_outputs` are all re-expressed here idiomatically but with the
//! same responsibilities and ordering.

use crate::audio_object::{AudioObject, AudioObjectMode};
use crate::chainsetup::ChainSetup;
use crate::command_queue::{Command, CommandQueue, Opcode};
use crate::error::{EngineError, ProtocolViolation, SetupError};
use crate::monitoring::LoopProfiler;
use crate::proxy_object::ProxiedAudioObject;
use crate::proxy_server::ProxyIoServer;
use crate::sample_buffer::SampleBuffer;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// Observable engine state (spec §3: Engine status).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    NotStarted,
    Prepared,
    Running,
    Stopped,
    Finished,
    Error(String),
}

/// Per-chain cached connection indices, recomputed whenever the chainsetup's
/// routing changes (spec §9: `update_cache_chain_connections`). Kept
/// alongside the engine rather than on `Chain` itself so the hot loop never
/// re-derives them.
struct ChainCache {
    input_index: usize,
    output_index: usize,
}

/// A placeholder swapped into a `ChainSetup` slot while its real object is
/// being moved into the proxy server's ownership (spec §4.3). Never read or
/// written; `prepare_operation` immediately overwrites the slot with a
/// `ProxiedAudioObject` built from the registration it receives back.
struct Tombstone;

impl AudioObject for Tombstone {
    fn label(&self) -> &str {
        "tombstone"
    }
    fn mode(&self) -> AudioObjectMode {
        AudioObjectMode::Read
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn sample_rate(&self) -> u32 {
        0
    }
    fn channels(&self) -> usize {
        0
    }
    fn frame_size_bytes(&self) -> usize {
        0
    }
    fn is_open(&self) -> bool {
        false
    }
    fn open(&mut self) -> Result<(), SetupError> {
        Ok(())
    }
    fn close(&mut self) {}
    fn position_in_samples(&self) -> i64 {
        0
    }
    fn finished(&self) -> bool {
        true
    }
}

pub struct Engine {
    chainsetup: ChainSetup,
    commands: CommandQueue,
    status: EngineStatus,

    prepared: bool,
    running: bool,
    exit_requested: bool,
    finished: bool,
    /// Set once `exec` has signaled exit; mirrors the original's
    /// `signal_exit` (spec §4.7.1: "engine is no longer valid" once `exec`
    /// returns).
    exited: bool,

    chain_cache: Vec<ChainCache>,
    realtime_input_indices: Vec<usize>,
    realtime_output_indices: Vec<usize>,
    non_realtime_input_indices: Vec<usize>,

    input_slots: Vec<SampleBuffer>,
    chain_slots: Vec<SampleBuffer>,
    mix_slot: SampleBuffer,

    /// Highest per-object latency observed across inputs/outputs at prepare
    /// time (spec §4.7.8: latency compensation / recording offset).
    recording_offset: i64,
    /// Number of buffersize-sized blocks of silence to prime real-time
    /// outputs with at prepare time (spec §4.7.3 step 5).
    prefill_blocks: usize,
    /// Running count of samples written to realtime-target outputs since
    /// `start_operation`; suppresses realtime-target writes until it
    /// catches up to `recording_offset` (spec §4.7.5 step 5, §4.7.8).
    preroll_samples: i64,
    /// Count of inputs that were not finished before their read this
    /// iteration and remain not finished after it (spec §4.7.5 step 3).
    inputs_not_finished: usize,
    /// Count of outputs currently reporting `finished()` (sticky once an
    /// object finishes, so this is monotonically non-decreasing per spec
    /// §8's invariant).
    outputs_finished_count: usize,

    proxy_server: Option<ProxyIoServer>,

    profiler: Option<LoopProfiler>,
}

impl Engine {
    pub fn new(chainsetup: ChainSetup) -> Self {
        Self {
            chainsetup,
            commands: CommandQueue::new(),
            status: EngineStatus::NotStarted,
            prepared: false,
            running: false,
            exit_requested: false,
            finished: false,
            exited: false,
            chain_cache: Vec::new(),
            realtime_input_indices: Vec::new(),
            realtime_output_indices: Vec::new(),
            non_realtime_input_indices: Vec::new(),
            input_slots: Vec::new(),
            chain_slots: Vec::new(),
            mix_slot: SampleBuffer::new(1, 1),
            recording_offset: 0,
            prefill_blocks: 0,
            preroll_samples: 0,
            inputs_not_finished: 0,
            outputs_finished_count: 0,
            proxy_server: None,
            profiler: None,
        }
    }

    pub fn enable_profiling(&mut self, enabled: bool) {
        self.profiler = if enabled { Some(LoopProfiler::new()) } else { None };
    }

    /// A clonable handle controller threads use to push commands. Spec §5:
    /// "the command queue [is] the sole controller→engine channel."
    pub fn commands(&self) -> CommandQueue {
        self.commands.clone()
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn is_valid(&self) -> bool {
        !self.exited && !matches!(self.status, EngineStatus::Error(_))
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, EngineStatus::Finished)
    }

    pub fn should_exit(&self) -> bool {
        self.exit_requested || matches!(self.status, EngineStatus::Finished | EngineStatus::Error(_))
    }

    /// Push a command for the driver thread to pick up on its next
    /// `engine_iteration` (spec §6's opcode table).
    pub fn command(&self, opcode: Opcode, arg: f64) {
        self.commands.push_back(Command { opcode, arg });
    }

    /// Block the calling thread until the engine leaves `Running`, or the
    /// timeout elapses. Returns whether it stopped in time.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        !self.running
    }

    /// Block the calling thread until `exec` has returned (`signal_exit`
    /// observed), or the timeout elapses. Returns whether it exited in time.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.exited && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.exited
    }

    pub fn dump_profile(&self) -> Option<crate::monitoring::ProfileSummary> {
        self.profiler.as_ref().map(|p| p.summary())
    }

    pub fn recording_offset(&self) -> i64 {
        self.recording_offset
    }

    /// Crate-internal escape hatch for scenario tests that need to inspect
    /// a concrete input/output object's own state after a run.
    pub(crate) fn chainsetup(&self) -> &ChainSetup {
        &self.chainsetup
    }

    /// Drive the whole engine lifecycle on the calling thread: prepare,
    /// start, iterate to completion or command-driven stop, and clean up
    /// (spec §4.7.1). Delegates the loop itself to a `DefaultDriver` so the
    /// scheduling logic in `engine_iteration` stays the single source of
    /// truth regardless of which driver calls it.
    ///
    /// `signal_exit` (`wait_for_exit`'s counterpart) fires once this
    /// returns; after that the engine is no longer valid and a fresh
    /// `Engine` is required for another run.
    ///
    /// # Errors
    /// Returns `EngineError::Protocol(ProtocolViolation::ExecWhileInvalid)`
    /// if the engine has already been run to completion or is in `Error`.
    pub fn exec(&mut self, batch_mode: bool) -> Result<(), EngineError> {
        if !self.is_valid() {
            return Err(ProtocolViolation::ExecWhileInvalid.into());
        }
        let result = crate::driver::Driver::exec(&mut crate::driver::DefaultDriver::new(), self, batch_mode);
        self.exited = true;
        result
    }

    // ---- driver-facing contract -------------------------------------

    /// Validate the chainsetup, open every object, size the cached buffers,
    /// and compute latency compensation (spec §4.7.3).
    ///
    /// # Errors
    /// Returns `EngineError::Setup` on an invalid chainsetup or an object
    /// that fails to open; `EngineError::Protocol` if called while already
    /// running or prepared.
    pub fn prepare_operation(&mut self) -> Result<(), EngineError> {
        if self.running || self.prepared {
            return Err(ProtocolViolation::PrepareWhileActive.into());
        }
        self.chainsetup.validate()?;
        self.chainsetup.set_locked(true);

        for input in self.chainsetup.inputs.iter_mut() {
            if !input.is_open() {
                input.open()?;
            }
        }
        for output in self.chainsetup.outputs.iter_mut() {
            if !output.is_open() {
                output.open()?;
            }
        }

        self.create_cache_object_lists();
        self.update_cache_latency_values();

        if self.chainsetup.double_buffering() {
            self.start_proxy_server();
        }

        if let Some(priority) = self.chainsetup.raised_priority() {
            crate::platform::set_realtime_priority(priority);
        }

        let buffersize = self.chainsetup.buffersize();
        let channels = self.chainsetup.max_channels();
        self.input_slots = (0..self.chainsetup.inputs.len())
            .map(|_| SampleBuffer::new(buffersize, channels))
            .collect();
        self.chain_slots = (0..self.chainsetup.chains.len())
            .map(|_| {
                let mut slot = SampleBuffer::new(buffersize, channels);
                slot.set_rt_lock(true);
                slot
            })
            .collect();
        self.mix_slot = SampleBuffer::new(buffersize, channels);
        self.mix_slot.set_rt_lock(true);

        for chain in self.chainsetup.chains.iter_mut() {
            chain.init();
        }

        for &idx in &self.realtime_input_indices {
            self.chainsetup.inputs[idx].prepare()?;
        }
        for &idx in &self.realtime_output_indices {
            self.chainsetup.outputs[idx].prepare()?;
        }
        self.prefill_realtime_outputs();

        self.preroll_samples = buffersize as i64;
        self.prepared = true;
        self.status = EngineStatus::Prepared;
        info!(
            "engine prepared: {} inputs, {} outputs, {} chains",
            self.chainsetup.inputs.len(),
            self.chainsetup.outputs.len(),
            self.chainsetup.chains.len()
        );
        Ok(())
    }

    /// Begin processing. Requires a prior successful `prepare_operation`.
    pub fn start_operation(&mut self) -> Result<(), EngineError> {
        if !self.prepared {
            return Err(ProtocolViolation::StartWithoutPrepare.into());
        }
        if self.running {
            return Err(ProtocolViolation::StartWhileRunning.into());
        }
        for &idx in &self.realtime_input_indices {
            self.chainsetup.inputs[idx].start()?;
        }
        for &idx in &self.realtime_output_indices {
            self.chainsetup.outputs[idx].start()?;
        }
        self.chainsetup.set_enabled(true);
        self.running = true;
        self.exit_requested = false;
        self.status = EngineStatus::Running;
        info!("engine started");
        Ok(())
    }

    /// Stop processing without releasing resources; a subsequent
    /// `start_operation` resumes from the current position.
    pub fn stop_operation(&mut self) {
        if !self.running {
            warn!("stop_operation called while not running, ignoring");
            return;
        }
        for &idx in &self.realtime_input_indices {
            self.chainsetup.inputs[idx].stop();
        }
        for &idx in &self.realtime_output_indices {
            self.chainsetup.outputs[idx].stop();
        }
        if let Some(server) = &self.proxy_server {
            server.flush();
            server.stop();
        }
        for slot in self.chain_slots.iter_mut() {
            slot.set_rt_lock(false);
        }
        self.mix_slot.set_rt_lock(false);
        self.chainsetup.set_locked(false);

        self.running = false;
        if matches!(self.status, EngineStatus::Error(_)) {
            // Keep the error visible; don't downgrade to Stopped/Finished.
        } else if self.finished {
            self.status = EngineStatus::Finished;
        } else {
            self.status = EngineStatus::Stopped;
        }
        info!("engine stopped at sample {}", self.chainsetup.position_in_samples());
    }

    pub fn cleanup(&mut self) {
        for input in self.chainsetup.inputs.iter_mut() {
            input.close();
        }
        for output in self.chainsetup.outputs.iter_mut() {
            output.close();
        }
        for chain in self.chainsetup.chains.iter_mut() {
            chain.disconnect_buffer();
        }
        self.prepared = false;
        self.running = false;
        debug!("engine cleanup complete");
    }

    /// One scheduling step: drains the command queue, then — if running —
    /// moves one buffer's worth of samples from inputs through chains to
    /// outputs. Returns whether audio was actually processed (used by the
    /// driver to decide whether to back off).
    ///
    /// Mirrors `ECA_ENGINE::engine_iteration` in structure: check queue,
    /// interpret queue, `inputs_to_chains`, `process_chains`,
    /// `mix_to_outputs`, `update_engine_state`.
    pub fn engine_iteration(&mut self) -> Result<bool, EngineError> {
        let start = self.profiler.as_ref().map(|_| Instant::now());

        self.check_command_queue();

        if !self.running {
            return Ok(false);
        }

        self.prehandle_control_position();
        self.inputs_not_finished = self.inputs_to_chains();
        self.process_chains();
        self.outputs_finished_count = self.mix_to_outputs();
        self.advance_position();
        self.posthandle_control_position();
        self.update_engine_state();

        if let (Some(profiler), Some(start)) = (self.profiler.as_mut(), start) {
            profiler.record(
                start.elapsed(),
                self.chainsetup.buffersize(),
                self.chainsetup.sample_rate(),
                self.prefill_blocks,
            );
        }

        Ok(true)
    }

    fn check_command_queue(&mut self) {
        while let Some(cmd) = self.commands.pop_front() {
            self.interpret_queue(cmd);
        }
    }

    /// Opcode dispatch (spec §6's table, ecasound's `interpret_queue`
    /// switch).
    fn interpret_queue(&mut self, cmd: Command) {
        match cmd.opcode {
            Opcode::Exit => {
                self.exit_requested = true;
                if self.running {
                    self.stop_operation();
                }
            }
            Opcode::Start => {
                if !self.running {
                    if let Err(e) = self.start_operation() {
                        warn!("Start command rejected: {e}");
                    }
                }
            }
            Opcode::Stop => {
                if self.running {
                    self.stop_operation();
                }
            }
            Opcode::CSelect => {
                self.chainsetup.select_chain(cmd.arg as usize);
            }
            Opcode::CMute => {
                if let Some(chain) = self.chainsetup.selected_chain_mut() {
                    chain.toggle_muting();
                }
            }
            Opcode::CBypass => {
                if let Some(chain) = self.chainsetup.selected_chain_mut() {
                    chain.toggle_processing();
                }
            }
            Opcode::CopSelect => {
                if let Some(chain) = self.chainsetup.selected_chain_mut() {
                    let clamped = if cmd.arg as usize >= chain.number_of_chain_operators() {
                        0
                    } else {
                        cmd.arg as usize
                    };
                    chain.select_chain_operator(clamped);
                }
            }
            Opcode::CoppSelect => {
                if let Some(chain) = self.chainsetup.selected_chain_mut() {
                    chain.select_chain_operator_parameter(cmd.arg as usize);
                }
            }
            Opcode::CoppValue => {
                if let Some(chain) = self.chainsetup.selected_chain_mut() {
                    chain.set_parameter(cmd.arg);
                }
            }
            Opcode::Rewind => self.seek_relative_seconds(-cmd.arg),
            Opcode::Forward => self.seek_relative_seconds(cmd.arg),
            Opcode::Setpos => self.seek_absolute_seconds(cmd.arg),
            Opcode::SetposLiveSamples => self.seek_in_place_samples(cmd.arg as i64),
        }
    }

    /// Conditional-stop / seek / conditional-start dance (spec §4.7.7):
    /// stop only if running (and remember that), seek, then restart iff the
    /// prior stop was conditional.
    fn seek_with_conditional_stop(&mut self, position: i64) {
        let was_running = self.running;
        if was_running {
            self.stop_operation();
        }
        let position = position.max(0);
        self.chainsetup.set_position_in_samples(position);
        for input in self.chainsetup.inputs.iter_mut() {
            input.seek_to_sample(position);
        }
        for output in self.chainsetup.outputs.iter_mut() {
            output.seek_to_sample(position);
        }
        if was_running {
            if let Err(e) = self.start_operation() {
                warn!("failed to resume after seek: {e}");
            }
        }
    }

    fn seek_relative_seconds(&mut self, seconds: f64) {
        let delta = (seconds * self.chainsetup.sample_rate() as f64) as i64;
        let target = self.chainsetup.position_in_samples() + delta;
        self.seek_with_conditional_stop(target);
    }

    fn seek_absolute_seconds(&mut self, seconds: f64) {
        let target = (seconds * self.chainsetup.sample_rate() as f64) as i64;
        self.seek_with_conditional_stop(target);
    }

    /// `setpos_live_samples`: seeks in place without the stop/start dance,
    /// intended for cheap in-object seeks while running (spec §4.7.7).
    fn seek_in_place_samples(&mut self, position: i64) {
        let position = position.max(0);
        self.chainsetup.set_position_in_samples(position);
        for input in self.chainsetup.inputs.iter_mut() {
            input.seek_to_sample(position);
        }
        for output in self.chainsetup.outputs.iter_mut() {
            output.seek_to_sample(position);
        }
    }

    /// Advance the transport and, when the chainsetup has a total length
    /// set and the upcoming iteration would cross it, retune each
    /// non-realtime input's per-call buffer size to the remaining sample
    /// count (spec §4.7.5 step 2: the single short final read).
    fn prehandle_control_position(&mut self) {
        let Some(length) = self.chainsetup.length_in_samples() else {
            return;
        };
        let buffersize = self.chainsetup.buffersize() as i64;
        let position = self.chainsetup.position_in_samples();
        if position + buffersize > length {
            let remaining = (length - position).max(0) as usize;
            for &idx in &self.non_realtime_input_indices {
                self.chainsetup.inputs[idx].set_buffersize(remaining);
            }
        }
    }

    /// Read one buffer from each input and feed every chain attached to it
    /// (spec §4.7.5 steps 1-4). Returns the count of inputs that were
    /// active going in and remain active coming out.
    fn inputs_to_chains(&mut self) -> usize {
        let buffersize = self.chainsetup.buffersize();
        let mut active = 0;
        for (idx, input) in self.chainsetup.inputs.iter_mut().enumerate() {
            let was_finished = input.finished();
            let slot = &mut self.input_slots[idx];
            slot.set_length(buffersize.min(slot.capacity()));
            input.read_buffer(slot);
            if !was_finished && !input.finished() {
                active += 1;
            }
        }
        for (chain_idx, cache) in self.chain_cache.iter().enumerate() {
            if cache.input_index < self.input_slots.len() {
                let input_slot = &self.input_slots[cache.input_index];
                self.chain_slots[chain_idx].copy_from(input_slot);
            }
        }
        active
    }

    /// Run every chain's operator pipeline (spec §4.7.5 step 4). A muted
    /// chain is silenced but still occupies its slot, so fan-in averaging
    /// at the mix stage sees silence rather than a stale buffer.
    fn process_chains(&mut self) {
        for (chain, slot) in self.chainsetup.chains.iter_mut().zip(self.chain_slots.iter_mut()) {
            if chain.is_muted() {
                slot.make_silent();
                continue;
            }
            chain.process(slot);
        }
    }

    /// Average every chain attached to each output into that output's
    /// buffer and write it, honoring preroll suppression of realtime-target
    /// outputs (spec §4.7.5 step 5, the "Mix averaging" law). Returns the
    /// count of outputs currently reporting `finished()`.
    fn mix_to_outputs(&mut self) -> usize {
        let buffersize = self.chainsetup.buffersize();
        let prerolling = self.preroll_samples < self.recording_offset;

        // Counts and targets must be read before taking a mutable iterator
        // over `self.chainsetup.outputs`, since `ChainSetup`'s accessor
        // methods borrow the whole chainsetup, not just the `outputs` field.
        let plan: Vec<(usize, bool)> = (0..self.chainsetup.outputs.len())
            .map(|o| (
                self.chainsetup.number_of_attached_chains_to_output(o),
                self.chainsetup.is_realtime_target_output(o),
            ))
            .collect();

        let mut finished_count = 0;
        for (out_idx, output) in self.chainsetup.outputs.iter_mut().enumerate() {
            let (k, is_realtime_target) = plan[out_idx];
            if k == 0 {
                continue;
            }
            if prerolling && is_realtime_target {
                continue;
            }

            self.mix_slot.set_length(buffersize.min(self.mix_slot.capacity()));
            let mut first = true;
            for (chain_idx, cache) in self.chain_cache.iter().enumerate() {
                if cache.output_index != out_idx {
                    continue;
                }
                if first {
                    self.mix_slot.copy_from(&self.chain_slots[chain_idx]);
                    if k > 1 {
                        self.mix_slot.divide_by(k);
                    }
                    first = false;
                } else {
                    self.mix_slot.add_weighted(&self.chain_slots[chain_idx], k);
                }
            }
            output.write_buffer(&self.mix_slot);
            if output.finished() {
                finished_count += 1;
            }
        }

        if prerolling {
            self.preroll_samples += buffersize as i64;
        }
        finished_count
    }

    fn advance_position(&mut self) {
        let buffersize = self.chainsetup.buffersize() as i64;
        let new_pos = self.chainsetup.position_in_samples() + buffersize;
        self.chainsetup.set_position_in_samples(new_pos);
    }

    /// Loop back to the start when a total length is set, exceeded, and
    /// looping is enabled (spec §4.7.5 step 6). Setting
    /// `inputs_not_finished = 1` keeps `update_engine_state` from treating
    /// the loop wrap as end-of-run.
    fn posthandle_control_position(&mut self) {
        let Some(length) = self.chainsetup.length_in_samples() else {
            return;
        };
        if self.chainsetup.position_in_samples() < length {
            return;
        }
        if self.chainsetup.looping_enabled() {
            self.chainsetup.set_position_in_samples(0);
            self.inputs_not_finished = 1;
            let buffersize = self.chainsetup.buffersize();
            for &idx in &self.non_realtime_input_indices {
                self.chainsetup.inputs[idx].seek_to_sample(0);
                self.chainsetup.inputs[idx].set_buffersize(buffersize);
            }
        } else if self.realtime_input_indices.is_empty() && self.realtime_output_indices.is_empty() {
            self.inputs_not_finished = 0;
        }
    }

    /// Recompute `running`/`status` after an iteration (spec §4.7.6). State
    /// changes are routed through the command queue, not mutated directly,
    /// so that a running `update_engine_state` and a controller's own
    /// commands serialize through the same path.
    fn update_engine_state(&mut self) {
        if self.outputs_finished_count > 0 && self.running && !self.finished {
            if !matches!(self.status, EngineStatus::Error(_)) {
                error!(
                    "output reported finished mid-run ({} input(s) still active): treating as OutputError",
                    self.inputs_not_finished
                );
                self.status = EngineStatus::Error("output finished unexpectedly".to_string());
            }
        }

        if self.running && matches!(self.status, EngineStatus::Error(_)) {
            self.commands.push_back(Command { opcode: Opcode::Stop, arg: 0.0 });
            return;
        }

        if self.running && self.inputs_not_finished == 0 && self.outputs_finished_count == 0 && !self.finished {
            self.finished = true;
            self.commands.push_back(Command { opcode: Opcode::Stop, arg: 0.0 });
        }
    }

    /// Recompute per-chain input/output cache plus realtime/non-realtime
    /// classification (spec §3's cache table, §9's
    /// `update_cache_chain_connections`). Called once at prepare time;
    /// routing is immutable for the lifetime of a prepared chainsetup.
    fn create_cache_object_lists(&mut self) {
        self.chain_cache = self
            .chainsetup
            .chains
            .iter()
            .map(|chain| ChainCache {
                input_index: chain.connected_input(),
                output_index: chain.connected_output(),
            })
            .collect();

        self.realtime_input_indices = (0..self.chainsetup.inputs.len())
            .filter(|&i| self.chainsetup.inputs[i].is_realtime())
            .collect();
        self.realtime_output_indices = (0..self.chainsetup.outputs.len())
            .filter(|&i| self.chainsetup.outputs[i].is_realtime())
            .collect();
        self.non_realtime_input_indices = (0..self.chainsetup.inputs.len())
            .filter(|&i| !self.chainsetup.inputs[i].is_realtime())
            .collect();
    }

    /// Determine prefill/preroll parameters from the highest latency
    /// reported by any object (spec §4.7.8 latency compensation / recording
    /// offset), and log `LatencyWarning`s for disagreeing objects or a
    /// recording offset that isn't a multiple of the buffersize.
    fn update_cache_latency_values(&mut self) {
        let in_latency = self
            .realtime_input_indices
            .iter()
            .map(|&i| self.chainsetup.inputs[i].latency())
            .max()
            .unwrap_or(0);
        let in_latencies: Vec<i64> = self
            .realtime_input_indices
            .iter()
            .map(|&i| self.chainsetup.inputs[i].latency())
            .collect();
        if in_latencies.iter().any(|&l| l != in_latency) {
            warn!("realtime inputs report disagreeing latencies: {in_latencies:?}");
        }

        let buffersize = self.chainsetup.buffersize().max(1) as i64;
        let out_latencies: Vec<i64> = self
            .realtime_output_indices
            .iter()
            .map(|&i| {
                let output = &self.chainsetup.outputs[i];
                if output.prefill_space() > 0 {
                    self.prefill_blocks_for(output.latency(), buffersize) * buffersize as usize + output.latency() as usize
                } else {
                    output.latency() as usize
                }
                .try_into()
                .unwrap_or(i64::MAX)
            })
            .collect();
        let out_latency = out_latencies.iter().copied().max().unwrap_or(0);
        if out_latencies.iter().any(|&l| l != out_latency) {
            warn!("realtime outputs report disagreeing effective latencies: {out_latencies:?}");
        }

        self.recording_offset = if self.chainsetup.multitrack_mode() {
            in_latency.max(out_latency)
        } else {
            0
        };
        self.prefill_blocks = self.prefill_blocks_for(
            self.realtime_output_indices
                .iter()
                .map(|&i| self.chainsetup.outputs[i].latency())
                .max()
                .unwrap_or(0),
            buffersize,
        );

        if self.recording_offset % buffersize != 0 {
            warn!(
                "recording_offset {} is not a multiple of buffersize {}",
                self.recording_offset, buffersize
            );
        }
        debug!(
            "latency compensation: in_latency={in_latency} out_latency={out_latency} \
             recording_offset={} prefill_blocks={}",
            self.recording_offset, self.prefill_blocks
        );
    }

    fn prefill_blocks_for(&self, latency: i64, buffersize: i64) -> usize {
        ((latency + buffersize - 1) / buffersize).max(0) as usize
    }

    /// Push `prefill_blocks` buffers of silence to every real-time output,
    /// from the (already zeroed) mix slot, before the engine ever starts
    /// (spec §4.7.3 step 5).
    fn prefill_realtime_outputs(&mut self) {
        if self.prefill_blocks == 0 || self.realtime_output_indices.is_empty() {
            return;
        }
        self.mix_slot.make_silent();
        for _ in 0..self.prefill_blocks {
            for &idx in &self.realtime_output_indices {
                self.chainsetup.outputs[idx].write_buffer(&self.mix_slot);
            }
        }
    }

    /// Wrap every non-realtime input/output through a freshly created
    /// `ProxyIoServer` (spec §4.3), so the driver thread only ever touches
    /// a lock-free ring for those objects (spec §8's invariant).
    fn start_proxy_server(&mut self) {
        let mut server = ProxyIoServer::new();
        server.set_buffer_defaults(self.chainsetup.buffersize(), self.chainsetup.max_buffers());

        for idx in 0..self.chainsetup.inputs.len() {
            if self.chainsetup.inputs[idx].is_realtime() {
                continue;
            }
            self.proxy_one(idx, true, &server);
        }
        for idx in 0..self.chainsetup.outputs.len() {
            if self.chainsetup.outputs[idx].is_realtime() {
                continue;
            }
            self.proxy_one(idx, false, &server);
        }

        server.start();
        if !server.wait_for_full(Duration::from_secs(5)) {
            warn!("proxy i/o server did not reach full prefill within timeout");
        }
        self.proxy_server = Some(server);
    }

    fn proxy_one(&mut self, idx: usize, is_input: bool, server: &ProxyIoServer) {
        let slot: &mut Box<dyn AudioObject> = if is_input {
            &mut self.chainsetup.inputs[idx]
        } else {
            &mut self.chainsetup.outputs[idx]
        };
        let label = slot.label().to_string();
        let mode = slot.mode();
        let channels = slot.channels();
        let sample_rate = slot.sample_rate();

        let real = std::mem::replace(slot, Box::new(Tombstone));
        let (_id, ring) = server.register_client(real);
        let proxied = Box::new(ProxiedAudioObject::new(&label, mode, channels, sample_rate, ring));

        if is_input {
            self.chainsetup.inputs[idx] = proxied;
        } else {
            self.chainsetup.outputs[idx] = proxied;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_object::test_support::{MemoryInput, MemoryOutput, SyntheticRealtimeObject};
    use crate::chain::{Chain, Gain};
    use crate::chainsetup::ChainSetup;

    fn simple_setup(samples: i64) -> ChainSetup {
        let mut setup = ChainSetup::new(16, 44100);
        setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, samples)));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);
        setup
    }

    #[test]
    fn prepare_then_start_then_stop_transitions_status() {
        let mut engine = Engine::new(simple_setup(64));
        engine.prepare_operation().unwrap();
        assert!(engine.is_prepared());
        engine.start_operation().unwrap();
        assert!(engine.is_running());
        engine.stop_operation();
        assert!(!engine.is_running());
    }

    #[test]
    fn start_without_prepare_is_protocol_violation() {
        let mut engine = Engine::new(simple_setup(64));
        assert!(engine.start_operation().is_err());
    }

    #[test]
    fn double_prepare_is_protocol_violation() {
        let mut engine = Engine::new(simple_setup(64));
        engine.prepare_operation().unwrap();
        assert!(engine.prepare_operation().is_err());
    }

    #[test]
    fn exec_runs_to_finished_and_latches_exited() {
        let mut engine = Engine::new(simple_setup(32));
        engine.exec(true).unwrap();
        assert!(engine.is_finished());
        assert!(engine.wait_for_exit(Duration::from_millis(10)));
        assert!(!engine.is_valid());
        assert!(engine.exec(true).is_err());
    }

    #[test]
    fn engine_iteration_runs_to_finished_for_bounded_input() {
        let mut engine = Engine::new(simple_setup(32));
        engine.prepare_operation().unwrap();
        engine.start_operation().unwrap();
        for _ in 0..10 {
            engine.engine_iteration().unwrap();
            if engine.is_finished() {
                break;
            }
        }
        assert!(engine.is_finished());
    }

    #[test]
    fn exit_command_stops_the_engine() {
        let mut engine = Engine::new(simple_setup(100_000));
        engine.prepare_operation().unwrap();
        engine.start_operation().unwrap();
        engine.command(Opcode::Exit, 0.0);
        engine.engine_iteration().unwrap();
        assert!(engine.should_exit());
        assert!(!engine.is_running());
    }

    #[test]
    fn gain_parameter_command_reaches_chain_operator() {
        let mut setup = simple_setup(64);
        setup.chains[0].add_operator(Box::new(Gain::new(1.0)));
        let mut engine = Engine::new(setup);
        engine.prepare_operation().unwrap();
        engine.start_operation().unwrap();

        engine.command(Opcode::CSelect, 0.0);
        engine.command(Opcode::CopSelect, 0.0);
        engine.command(Opcode::CoppSelect, 0.0);
        engine.command(Opcode::CoppValue, 0.5);
        engine.engine_iteration().unwrap();

        assert_eq!(
            engine.chainsetup.chains[0].selected_parameter_value(),
            Some(0.5)
        );
    }

    #[test]
    fn fan_in_mixes_two_inputs_by_average() {
        let mut setup = ChainSetup::new(4, 44100);
        setup.add_input(Box::new(MemoryInput::with_data("a", 1, 44100, vec![2.0; 4])));
        setup.add_input(Box::new(MemoryInput::with_data("b", 1, 44100, vec![6.0; 4])));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.add_chain(Chain::new("c2", 1, 0));
        setup.set_enabled(true);

        let mut engine = Engine::new(setup);
        engine.prepare_operation().unwrap();
        engine.start_operation().unwrap();
        engine.engine_iteration().unwrap();

        let written = &engine.chainsetup.outputs[0];
        assert!(written.position_in_samples() > 0);
    }

    #[test]
    fn setpos_live_samples_seeks_without_stopping() {
        let mut engine = Engine::new(simple_setup(1000));
        engine.prepare_operation().unwrap();
        engine.start_operation().unwrap();
        engine.command(Opcode::SetposLiveSamples, 500.0);
        engine.engine_iteration().unwrap();
        assert!(engine.is_running());
        assert!(engine.chainsetup.position_in_samples() >= 500);
    }

    #[test]
    fn looping_wraps_position_when_length_is_set() {
        let mut setup = ChainSetup::new(4, 44100);
        setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, 1_000_000)));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);
        setup.set_length_in_samples(20);
        setup.set_looping(true);

        let mut engine = Engine::new(setup);
        engine.prepare_operation().unwrap();
        engine.start_operation().unwrap();

        let mut positions = Vec::new();
        for _ in 0..12 {
            engine.engine_iteration().unwrap();
            positions.push(engine.chainsetup.position_in_samples());
        }
        assert!(engine.is_running());
        assert!(positions.contains(&0));
    }

    #[test]
    fn preroll_suppresses_realtime_target_writes_until_recording_offset() {
        let mut setup = ChainSetup::new(4, 44100);
        setup.add_input(Box::new(SyntheticRealtimeObject::new(
            "mic",
            crate::audio_object::AudioObjectMode::Read,
            1,
            44100,
            16,
            4,
        )));
        setup.add_output(Box::new(SyntheticRealtimeObject::new(
            "speaker",
            crate::audio_object::AudioObjectMode::Write,
            1,
            44100,
            0,
            4,
        )));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);
        setup.set_routing_mode(crate::chainsetup::RoutingMode::Multitrack);

        let mut engine = Engine::new(setup);
        engine.prepare_operation().unwrap();
        assert!(engine.recording_offset() > 0);
        engine.start_operation().unwrap();

        // First iteration: still prerolling (preroll_samples == buffersize == 4 < 16).
        engine.engine_iteration().unwrap();
        assert!(engine.preroll_samples < engine.recording_offset());
    }
}
