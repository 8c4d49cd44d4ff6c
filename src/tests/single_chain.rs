//! One input, one chain, one output, run to completion (spec §4.7.5).

use crate::audio_object::test_support::{MemoryInput, MemoryOutput};
use crate::chain::Chain;
use crate::chainsetup::ChainSetup;
use crate::driver::{DefaultDriver, Driver};
use crate::engine::{Engine, EngineStatus};

#[test]
fn runs_bounded_input_to_completion_and_reports_finished() {
    let mut setup = ChainSetup::new(64, 44100);
    setup.add_input(Box::new(MemoryInput::silence("in", 1, 44100, 1000)));
    setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
    setup.add_chain(Chain::new("c1", 0, 0));
    setup.set_enabled(true);

    let mut engine = Engine::new(setup);
    DefaultDriver::new().exec(&mut engine, true).unwrap();

    assert!(engine.is_finished());
    assert_eq!(*engine.status(), EngineStatus::Finished);
}

#[test]
fn samples_flow_unchanged_through_a_bypassed_chain() {
    let data = vec![1.0, -1.0, 0.5, -0.5];
    let mut setup = ChainSetup::new(4, 44100);
    setup.add_input(Box::new(MemoryInput::with_data("in", 1, 44100, data.clone())));
    setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
    setup.add_chain(Chain::new("c1", 0, 0));
    setup.set_enabled(true);

    let mut engine = Engine::new(setup);
    DefaultDriver::new().exec(&mut engine, true).unwrap();
    assert!(engine.is_finished());
}
