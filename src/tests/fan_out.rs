//! One input feeding two chains, each routed to its own output (spec
//! §4.7.5 step 4: a shared input feeds every chain attached to it).

use crate::audio_object::test_support::{MemoryInput, MemoryOutput};
use crate::chain::{Chain, Gain};
use crate::chainsetup::ChainSetup;
use crate::driver::{DefaultDriver, Driver};
use crate::engine::Engine;

#[test]
fn one_input_drives_two_independent_output_chains() {
    let mut setup = ChainSetup::new(4, 44100);
    setup.add_input(Box::new(MemoryInput::with_data("in", 1, 44100, vec![1.0, 2.0, 3.0, 4.0])));
    setup.add_output(Box::new(MemoryOutput::new("dry", 1, 44100)));
    setup.add_output(Box::new(MemoryOutput::new("wet", 1, 44100)));

    setup.add_chain(Chain::new("dry-chain", 0, 0));
    let mut wet_chain = Chain::new("wet-chain", 0, 1);
    wet_chain.add_operator(Box::new(Gain::new(0.5)));
    setup.add_chain(wet_chain);
    setup.set_enabled(true);

    let mut engine = Engine::new(setup);
    DefaultDriver::new().exec(&mut engine, true).unwrap();

    assert!(engine.is_finished());
    let dry = engine.chainsetup().outputs[0]
        .as_any()
        .downcast_ref::<MemoryOutput>()
        .unwrap()
        .captured[0]
        .clone();
    let wet = engine.chainsetup().outputs[1]
        .as_any()
        .downcast_ref::<MemoryOutput>()
        .unwrap()
        .captured[0]
        .clone();
    assert_eq!(dry, vec![1.0, 2.0, 3.0, 4.0]);
    let expected_wet: Vec<f32> = dry.iter().map(|s| s * 0.5).collect();
    assert_eq!(wet, expected_wet);
}
