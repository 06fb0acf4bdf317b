use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Name of the Android virtual device to boot
    pub avd: String,

    /// Test command to run once the device is up, e.g. "./run-tests.sh --suite smoke"
    pub test_script: String,

    /// Run the test once without any load generation
    #[arg(long)]
    pub no_stress: bool,

    /// Folder the per-run output files are written to
    #[arg(short, long, default_value = "./output")]
    pub output_folder: PathBuf,

    /// Seconds to wait for the emulator to finish booting
    #[arg(long, default_value_t = 300)]
    pub boot_timeout: u64,

    /// Verbose mode (-v, --verbose)
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
