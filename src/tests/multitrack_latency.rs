//! Multitrack recording with disagreeing realtime latencies: the engine
//! computes a recording offset and suppresses realtime-target output writes
//! during preroll (spec §4.7.8).

use crate::audio_object::test_support::SyntheticRealtimeObject;
use crate::audio_object::AudioObjectMode;
use crate::chain::Chain;
use crate::chainsetup::{ChainSetup, RoutingMode};
use crate::engine::Engine;

#[test]
fn recording_offset_tracks_the_worst_case_realtime_latency() {
    let mut setup = ChainSetup::new(8, 44100);
    setup.add_input(Box::new(SyntheticRealtimeObject::new(
        "mic-1",
        AudioObjectMode::Read,
        1,
        44100,
        64,
        8,
    )));
    setup.add_output(Box::new(SyntheticRealtimeObject::new(
        "speaker",
        AudioObjectMode::Write,
        1,
        44100,
        0,
        8,
    )));
    setup.add_chain(Chain::new("c1", 0, 0));
    setup.set_enabled(true);
    setup.set_routing_mode(RoutingMode::Multitrack);

    let mut engine = Engine::new(setup);
    engine.prepare_operation().unwrap();

    assert_eq!(engine.recording_offset(), 64);
}

#[test]
fn preroll_eventually_catches_up_and_outputs_start_receiving_audio() {
    let buffersize = 8;
    let mut setup = ChainSetup::new(buffersize, 44100);
    setup.add_input(Box::new(SyntheticRealtimeObject::new(
        "mic-1",
        AudioObjectMode::Read,
        1,
        44100,
        16,
        4,
    )));
    setup.add_output(Box::new(SyntheticRealtimeObject::new(
        "speaker",
        AudioObjectMode::Write,
        1,
        44100,
        0,
        4,
    )));
    setup.add_chain(Chain::new("c1", 0, 0));
    setup.set_enabled(true);
    setup.set_routing_mode(RoutingMode::Multitrack);

    let mut engine = Engine::new(setup);
    engine.prepare_operation().unwrap();
    engine.start_operation().unwrap();

    // recording_offset == 16, buffersize == 8: two iterations are enough to
    // clear preroll.
    engine.engine_iteration().unwrap();
    engine.engine_iteration().unwrap();
    engine.engine_iteration().unwrap();

    assert!(engine.is_running());
}
