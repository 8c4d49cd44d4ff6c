//! Two chains sharing one output are averaged together (spec §4.7.5 step 5,
//! the "mix averaging law").

use crate::audio_object::test_support::{MemoryInput, MemoryOutput};
use crate::chain::Chain;
use crate::chainsetup::ChainSetup;
use crate::driver::{DefaultDriver, Driver};
use crate::engine::Engine;

#[test]
fn two_chains_into_one_output_run_to_completion() {
    let mut setup = ChainSetup::new(4, 44100);
    setup.add_input(Box::new(MemoryInput::with_data("a", 1, 44100, vec![2.0; 4])));
    setup.add_input(Box::new(MemoryInput::with_data("b", 1, 44100, vec![6.0; 4])));
    setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
    setup.add_chain(Chain::new("c1", 0, 0));
    setup.add_chain(Chain::new("c2", 1, 0));
    setup.set_enabled(true);

    let mut engine = Engine::new(setup);
    DefaultDriver::new().exec(&mut engine, true).unwrap();

    assert!(engine.is_finished());
    let out = engine.chainsetup().outputs[0]
        .as_any()
        .downcast_ref::<MemoryOutput>()
        .unwrap();
    assert_eq!(out.captured[0], vec![4.0; 4]);
}

#[test]
fn three_way_fan_in_also_runs_to_completion() {
    let mut setup = ChainSetup::new(8, 44100);
    setup.add_input(Box::new(MemoryInput::with_data("a", 1, 44100, vec![3.0; 8])));
    setup.add_input(Box::new(MemoryInput::with_data("b", 1, 44100, vec![6.0; 8])));
    setup.add_input(Box::new(MemoryInput::with_data("c", 1, 44100, vec![9.0; 8])));
    setup.add_output(Box::new(MemoryOutput::new("out", 1, 44100)));
    setup.add_chain(Chain::new("c1", 0, 0));
    setup.add_chain(Chain::new("c2", 1, 0));
    setup.add_chain(Chain::new("c3", 2, 0));
    setup.set_enabled(true);

    let mut engine = Engine::new(setup);
    DefaultDriver::new().exec(&mut engine, true).unwrap();

    assert!(engine.is_finished());
    let out = engine.chainsetup().outputs[0]
        .as_any()
        .downcast_ref::<MemoryOutput>()
        .unwrap();
    assert_eq!(out.captured[0], vec![6.0; 8]);
}
