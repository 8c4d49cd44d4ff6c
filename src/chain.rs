//! Ordered DSP operator pipeline bound to one input and one output
//! (spec §3, §4.4).

use crate::sample_buffer::SampleBuffer;

/// A single DSP operator within a chain. Operates on the chain's shared
/// buffer in place.
///
/// Grounded in the teacher's `jitter_buffer`/`monitoring` pattern of small,
/// independently testable processing units, generalized to the spec's
/// operator/parameter model rather than copying any single teacher type.
pub trait ChainOperator: Send {
    fn label(&self) -> &str;

    fn number_of_parameters(&self) -> usize;
    fn parameter_name(&self, index: usize) -> &str;
    fn get_parameter(&self, index: usize) -> f64;
    fn set_parameter(&mut self, index: usize, value: f64);

    /// Process `buffer` in place, honoring its current `length_in_samples()`.
    fn process(&mut self, buffer: &mut SampleBuffer);
}

/// A linear gain operator, included as the one built-in operator needed to
/// exercise chain parameter selection end to end (spec §1: "effect plugins
/// beyond the single built-in `Gain` chain operator used for testing").
pub struct Gain {
    factor: f64,
}

impl Gain {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl ChainOperator for Gain {
    fn label(&self) -> &str {
        "Gain"
    }

    fn number_of_parameters(&self) -> usize {
        1
    }

    fn parameter_name(&self, _index: usize) -> &str {
        "factor"
    }

    fn get_parameter(&self, _index: usize) -> f64 {
        self.factor
    }

    fn set_parameter(&mut self, _index: usize, value: f64) {
        self.factor = value;
    }

    fn process(&mut self, buffer: &mut SampleBuffer) {
        let factor = self.factor as f32;
        for ch in 0..buffer.channels() {
            for sample in buffer.plane_mut(ch).iter_mut() {
                *sample *= factor;
            }
        }
    }
}

/// An ordered pipeline of `ChainOperator`s bound to one input index and one
/// output index (spec §3: Chain attributes).
pub struct Chain {
    label: String,
    operators: Vec<Box<dyn ChainOperator>>,
    connected_input: usize,
    connected_output: usize,
    muted: bool,
    processing: bool,
    initialized: bool,
    selected_operator: usize,
    selected_parameter: usize,
}

impl Chain {
    pub fn new(label: &str, connected_input: usize, connected_output: usize) -> Self {
        Self {
            label: label.to_string(),
            operators: Vec::new(),
            connected_input,
            connected_output,
            muted: false,
            processing: true,
            initialized: false,
            selected_operator: 0,
            selected_parameter: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn add_operator(&mut self, operator: Box<dyn ChainOperator>) {
        self.operators.push(operator);
    }

    pub fn number_of_chain_operators(&self) -> usize {
        self.operators.len()
    }

    pub fn connected_input(&self) -> usize {
        self.connected_input
    }

    pub fn connected_output(&self) -> usize {
        self.connected_output
    }

    pub fn disconnect_buffer(&mut self) {
        self.initialized = false;
    }

    pub fn init(&mut self) {
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn toggle_muting(&mut self) {
        self.muted = !self.muted;
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn toggle_processing(&mut self) {
        self.processing = !self.processing;
    }

    pub fn select_chain_operator(&mut self, index: usize) {
        self.selected_operator = index;
    }

    pub fn select_chain_operator_parameter(&mut self, index: usize) {
        self.selected_parameter = index;
    }

    pub fn set_parameter(&mut self, value: f64) {
        if let Some(op) = self.operators.get_mut(self.selected_operator) {
            op.set_parameter(self.selected_parameter, value);
        }
    }

    pub fn selected_parameter_value(&self) -> Option<f64> {
        self.operators
            .get(self.selected_operator)
            .map(|op| op.get_parameter(self.selected_parameter))
    }

    /// Run every operator over `buffer` in place, unless bypassed
    /// (`!is_processing()`). Muting is applied by the engine at the mix
    /// stage, not here (spec §4.7.5: "chains marked muted contribute
    /// silence").
    pub fn process(&mut self, buffer: &mut SampleBuffer) {
        if !self.processing {
            return;
        }
        for op in &mut self.operators {
            op.process(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_scales_every_sample() {
        let mut buf = SampleBuffer::new(4, 1);
        buf.plane_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let mut chain = Chain::new("c1", 0, 0);
        chain.add_operator(Box::new(Gain::new(2.0)));
        chain.process(&mut buf);
        assert_eq!(buf.plane(0), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn bypassed_chain_does_not_process() {
        let mut buf = SampleBuffer::new(4, 1);
        buf.plane_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let mut chain = Chain::new("c1", 0, 0);
        chain.add_operator(Box::new(Gain::new(2.0)));
        chain.toggle_processing();
        chain.process(&mut buf);
        assert_eq!(buf.plane(0), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn parameter_selection_routes_to_operator() {
        let mut chain = Chain::new("c1", 0, 0);
        chain.add_operator(Box::new(Gain::new(1.0)));
        chain.select_chain_operator(0);
        chain.select_chain_operator_parameter(0);
        chain.set_parameter(3.0);
        assert_eq!(chain.selected_parameter_value(), Some(3.0));
    }

    #[test]
    fn muting_and_processing_toggle() {
        let mut chain = Chain::new("c1", 0, 0);
        assert!(!chain.is_muted());
        chain.toggle_muting();
        assert!(chain.is_muted());
        assert!(chain.is_processing());
        chain.toggle_processing();
        assert!(!chain.is_processing());
    }
}
