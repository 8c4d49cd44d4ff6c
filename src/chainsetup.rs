//! The live, in-memory processing graph an `Engine` executes (spec §3, §4.6,
//! §4.7). Distinct from the persisted `EngineConfig` (§0.3): a chainsetup is
//! built once per run from a config plus a concrete list of inputs, outputs,
//! and chains.

use crate::audio_object::AudioObject;
use crate::chain::Chain;
use crate::error::SetupError;

/// Whether every chain connects exactly one input to one output (spec
/// glossary: multitrack mode implies per-chain independent input/output
/// pairs rather than a single shared bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    SingleBus,
    Multitrack,
}

/// The live processing graph: inputs, outputs, chains, and the engine-wide
/// settings that govern how they're driven (spec §3's Chainsetup fields).
pub struct ChainSetup {
    pub(crate) inputs: Vec<Box<dyn AudioObject>>,
    pub(crate) outputs: Vec<Box<dyn AudioObject>>,
    pub(crate) chains: Vec<Chain>,

    buffersize: usize,
    sample_rate: u32,
    looping: bool,
    length_set: Option<i64>,
    routing_mode: RoutingMode,
    double_buffering: bool,
    max_buffers: usize,
    raised_priority: Option<i32>,

    enabled: bool,
    locked: bool,
    position: i64,

    selected_chain: usize,
}

impl ChainSetup {
    pub fn new(buffersize: usize, sample_rate: u32) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            chains: Vec::new(),
            buffersize,
            sample_rate,
            looping: false,
            length_set: None,
            routing_mode: RoutingMode::SingleBus,
            double_buffering: false,
            max_buffers: 4,
            raised_priority: None,
            enabled: false,
            locked: false,
            position: 0,
            selected_chain: 0,
        }
    }

    pub fn add_input(&mut self, object: Box<dyn AudioObject>) -> usize {
        self.inputs.push(object);
        self.inputs.len() - 1
    }

    pub fn add_output(&mut self, object: Box<dyn AudioObject>) -> usize {
        self.outputs.push(object);
        self.outputs.len() - 1
    }

    pub fn add_chain(&mut self, chain: Chain) -> usize {
        self.chains.push(chain);
        self.chains.len() - 1
    }

    pub fn buffersize(&self) -> usize {
        self.buffersize
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn looping_enabled(&self) -> bool {
        self.looping
    }

    pub fn set_length_in_samples(&mut self, length: i64) {
        self.length_set = Some(length);
    }

    pub fn length_set(&self) -> bool {
        self.length_set.is_some()
    }

    pub fn length_in_samples(&self) -> Option<i64> {
        self.length_set
    }

    pub fn set_routing_mode(&mut self, mode: RoutingMode) {
        self.routing_mode = mode;
    }

    pub fn multitrack_mode(&self) -> bool {
        self.routing_mode == RoutingMode::Multitrack
    }

    pub fn set_double_buffering(&mut self, enabled: bool, max_buffers: usize) {
        self.double_buffering = enabled;
        self.max_buffers = max_buffers;
    }

    pub fn double_buffering(&self) -> bool {
        self.double_buffering
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    pub fn request_priority(&mut self, priority: i32) {
        self.raised_priority = Some(priority);
    }

    pub fn raised_priority(&self) -> Option<i32> {
        self.raised_priority
    }

    pub fn select_chain(&mut self, index: usize) {
        self.selected_chain = index;
    }

    pub fn selected_chain_mut(&mut self) -> Option<&mut Chain> {
        self.chains.get_mut(self.selected_chain)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn position_in_samples(&self) -> i64 {
        self.position
    }

    pub fn set_position_in_samples(&mut self, position: i64) {
        self.position = position;
    }

    /// Number of chains whose `connected_input` equals `index` (spec §4.7.5
    /// step 4: a shared input feeds every chain attached to it).
    pub fn number_of_attached_chains_to_input(&self, index: usize) -> usize {
        self.chains.iter().filter(|c| c.connected_input() == index).count()
    }

    /// Number of chains whose `connected_output` equals `index` (spec
    /// §4.7.5 step 5: fan-in mixing averages over this count).
    pub fn number_of_attached_chains_to_output(&self, index: usize) -> usize {
        self.chains.iter().filter(|c| c.connected_output() == index).count()
    }

    pub fn is_realtime_target_output(&self, index: usize) -> bool {
        self.outputs.get(index).map(|o| o.is_realtime()).unwrap_or(false)
    }

    /// True once position has reached (and the chainsetup is not looping
    /// past) the configured length, or every input reports finished.
    pub fn is_over(&self) -> bool {
        if let Some(len) = self.length_set {
            if !self.looping && self.position >= len {
                return true;
            }
        }
        !self.inputs.is_empty() && self.inputs.iter().all(|i| i.finished())
    }

    /// Validate structural invariants before the engine may prepare this
    /// chainsetup (spec §4.7.3: `prepare_operation` preconditions).
    pub fn validate(&self) -> Result<(), SetupError> {
        if !self.enabled {
            return Err(SetupError::ChainsetupNotEnabled);
        }
        if self.chains.is_empty() {
            return Err(SetupError::NoChains);
        }
        for (idx, chain) in self.chains.iter().enumerate() {
            if chain.connected_input() >= self.inputs.len() {
                return Err(SetupError::UnknownInput {
                    chain: idx,
                    index: chain.connected_input(),
                });
            }
            if chain.connected_output() >= self.outputs.len() {
                return Err(SetupError::UnknownOutput {
                    chain: idx,
                    index: chain.connected_output(),
                });
            }
        }
        Ok(())
    }

    /// The largest channel count across every input and output, used to
    /// pre-size the engine's mix slot once at init (spec §9: eliminates an
    /// audio-path allocation).
    pub fn max_channels(&self) -> usize {
        self.inputs
            .iter()
            .map(|i| i.channels())
            .chain(self.outputs.iter().map(|o| o.channels()))
            .max()
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_object::test_support::{MemoryInput, MemoryOutput};

    fn setup_with_one_chain() -> ChainSetup {
        let mut setup = ChainSetup::new(64, 44100);
        setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, 1000)));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);
        setup
    }

    #[test]
    fn validate_passes_for_well_formed_setup() {
        assert!(setup_with_one_chain().validate().is_ok());
    }

    #[test]
    fn validate_rejects_disabled_setup() {
        let mut setup = setup_with_one_chain();
        setup.set_enabled(false);
        assert!(matches!(setup.validate(), Err(SetupError::ChainsetupNotEnabled)));
    }

    #[test]
    fn validate_rejects_unknown_output() {
        let mut setup = ChainSetup::new(64, 44100);
        setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, 1000)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.set_enabled(true);
        assert!(matches!(
            setup.validate(),
            Err(SetupError::UnknownOutput { chain: 0, index: 0 })
        ));
    }

    #[test]
    fn fan_in_count_matches_shared_output() {
        let mut setup = ChainSetup::new(64, 44100);
        setup.add_input(Box::new(MemoryInput::silence("a", 1, 44100, 100)));
        setup.add_input(Box::new(MemoryInput::silence("b", 1, 44100, 100)));
        setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
        setup.add_chain(Chain::new("c1", 0, 0));
        setup.add_chain(Chain::new("c2", 1, 0));
        assert_eq!(setup.number_of_attached_chains_to_output(0), 2);
    }
}
