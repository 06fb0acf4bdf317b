pub mod clap_args;
pub mod config;
pub mod emulator;
pub mod process_control;
pub mod test_runner;

use anyhow::Context;
use clap_args::Args;
use config::StressConfig;
use emulator::Emulator;
use process_control::Redirect;
use std::time::Duration;
use tracing::{debug, info};

/// Boots the emulator, runs the test under each stress configuration (or
/// once, unloaded) and tears the emulator down again.
pub async fn run(args: Args) -> anyhow::Result<()> {
    // read before anything is spawned so a bad config cannot leak an emulator
    let configs = if args.no_stress {
        vec![]
    } else {
        StressConfig::load_default()?
    };

    std::fs::create_dir_all(&args.output_folder).with_context(|| {
        format!(
            "Failed to create output folder: {}",
            args.output_folder.display()
        )
    })?;

    let emulator = Emulator::start(&args.avd, Redirect::Null).await?;
    debug!("emulator process id: {:?}", emulator.pid());

    let outcome = execute(&args, &configs, &emulator).await;
    let stopped = emulator.stop().await;
    outcome?;
    stopped
}

async fn execute(
    args: &Args,
    configs: &[StressConfig],
    emulator: &Emulator,
) -> anyhow::Result<()> {
    emulator
        .wait_until_booted(Duration::from_secs(args.boot_timeout))
        .await?;

    if args.no_stress {
        println!("> running test without load");
        test_runner::run_once(
            &args.test_script,
            &args.output_folder.join(test_runner::NO_STRESS_FILE_NAME),
        )
        .await
    } else {
        info!("running {} stress configurations", configs.len());
        test_runner::run_with_stress(&args.test_script, &args.output_folder, configs).await
    }
}
