use anyhow::{Context, Result};
use chainflow::chain::Chain;
use chainflow::chainsetup::ChainSetup;
use chainflow::command_queue::Opcode;
use chainflow::config::ConfigManager;
use chainflow::driver::{DefaultDriver, Driver};
use chainflow::engine::Engine;
use chainflow::file_object::WavFileObject;
use clap::Parser;
use log::info;

/// Minimal non-interactive entry point: build a chainsetup from a small set
/// of flags, run it to completion (or until Ctrl-C), report status. The
/// interactive command parser and terminal UI are out of scope for this
/// crate — this binary exists only to exercise the engine end to end.
#[derive(Parser, Debug)]
#[command(name = "chainflow", about = "Real-time multitrack audio processing engine")]
struct Cli {
    /// Input WAV file path.
    #[arg(long)]
    input: String,

    /// Output WAV file path.
    #[arg(long)]
    output: String,

    /// Frames per buffer.
    #[arg(long, default_value_t = 1024)]
    buffersize: usize,

    /// Sample rate in Hz.
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Loop the input indefinitely instead of stopping at end of file.
    #[arg(long, default_value_t = false)]
    looping: bool,

    /// Run as fast as possible instead of pacing to real time.
    #[arg(long, default_value_t = true)]
    batch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config_manager = ConfigManager::new().context("failed to load engine config")?;
    let defaults = config_manager.get_config().clone();

    let mut setup = ChainSetup::new(cli.buffersize, cli.sample_rate);
    setup.add_input(Box::new(WavFileObject::open_read("input", &cli.input)));
    setup.add_output(Box::new(WavFileObject::open_write(
        "output",
        &cli.output,
        2,
        cli.sample_rate,
    )));
    setup.add_chain(Chain::new("main", 0, 0));
    setup.set_looping(cli.looping);
    setup.set_enabled(true);
    if let Some(priority) = defaults.raised_priority {
        setup.request_priority(priority);
    }

    let mut engine = Engine::new(setup);
    engine.enable_profiling(defaults.profiling_enabled);
    let commands = engine.commands();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, requesting engine exit");
            commands.push_back(chainflow::command_queue::Command {
                opcode: Opcode::Exit,
                arg: 0.0,
            });
        }
    });

    let mut driver = DefaultDriver::new();
    driver.exec(&mut engine, cli.batch)?;

    if let Some(summary) = engine.dump_profile() {
        info!(
            "profile: {} faster, {} within bounds, {} slower ({} past prefill cushion); avg {:?}",
            summary.faster_than_realtime,
            summary.within_bounds,
            summary.slower_than_realtime,
            summary.prefill_exceeded,
            summary.average
        );
    }

    config_manager.update_config(defaults);
    config_manager.save_config().ok();

    Ok(())
}
