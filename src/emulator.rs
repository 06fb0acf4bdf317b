use crate::process_control::{launch, parse_command, LaunchMode, ProcessGuard, Redirect};
use anyhow::{bail, Context};
use colored::Colorize;
use std::{
    env,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// Property adb reports as "1" once Android has finished booting.
const BOOT_PROP: &str = "sys.boot_completed";

/// The first boot poll happens after this long; the interval then doubles.
const BOOT_POLL_INITIAL: Duration = Duration::from_secs(2);

/// Ceiling for the poll interval backoff.
const BOOT_POLL_CAP: Duration = Duration::from_secs(10);

/// How long the emulator gets to exit by itself after `adb emu kill` before
/// it is terminated directly.
const EMU_EXIT_WAIT: Duration = Duration::from_secs(10);

fn emulator_bin() -> String {
    env::var("EMUSTRESS_EMULATOR_BIN").unwrap_or_else(|_| "emulator".into())
}

fn adb_bin() -> String {
    env::var("EMUSTRESS_ADB_BIN").unwrap_or_else(|_| "adb".into())
}

fn emulator_command(avd: &str) -> String {
    format!(
        "{} -avd {} -no-boot-anim -no-snapshot",
        emulator_bin(),
        avd
    )
}

/// A running emulator instance.
///
/// [`Emulator::stop`] tears down the adb bridge and confirms the emulator
/// process is gone; dropping an unstopped instance performs the same teardown
/// best-effort, so an early error return cannot leak a running emulator.
pub struct Emulator {
    avd: String,
    guard: Option<ProcessGuard>,
}

impl Emulator {
    /// Boots the named virtual device, with boot animation and snapshots
    /// disabled, and starts the adb server.
    pub async fn start(avd: &str, redirect: Redirect) -> anyhow::Result<Emulator> {
        let command = emulator_command(avd);

        println!("> starting emulator {}", avd.green());
        debug!("emulator command: {}", command);
        let guard = launch(&command, LaunchMode::SpawnTracked(redirect))
            .await?
            .into_handle()?;
        let emulator = Emulator {
            avd: avd.to_string(),
            guard: Some(guard),
        };

        // bring up the bridge server; it daemonizes itself and its output
        // is irrelevant
        launch(
            &format!("{} start-server", adb_bin()),
            LaunchMode::Spawn(Redirect::Null),
        )
        .await?;

        Ok(emulator)
    }

    /// OS pid of the emulator process, while it is tracked.
    pub fn pid(&self) -> Option<u32> {
        self.guard.as_ref().and_then(|guard| guard.pid())
    }

    /// Blocks until the device reports boot completion or `timeout` elapses.
    ///
    /// Polls the boot property with an interval starting at 2s and capped at
    /// 10s. Anything other than the literal "1" (including the empty output
    /// of a bridge that is not ready yet) keeps the loop going.
    pub async fn wait_until_booted(&self, timeout: Duration) -> anyhow::Result<()> {
        println!("> waiting for {} to boot", self.avd.green());

        let deadline = Instant::now() + timeout;
        let mut interval = BOOT_POLL_INITIAL;
        loop {
            tokio::time::sleep(interval).await;

            let value = launch(
                &format!("{} shell getprop {}", adb_bin(), BOOT_PROP),
                LaunchMode::Capture,
            )
            .await?
            .into_stdout()?;

            if value == "1" {
                println!("boot completed");
                info!("{} reported {} = 1", self.avd, BOOT_PROP);
                return Ok(());
            }

            debug!("{} = {:?}, still waiting", BOOT_PROP, value);
            if Instant::now() >= deadline {
                bail!(
                    "Emulator {} failed to boot within {}s",
                    self.avd,
                    timeout.as_secs()
                );
            }
            interval = (interval * 2).min(BOOT_POLL_CAP);
        }
    }

    /// Kills the running device and the adb server, then waits for the
    /// emulator process itself to go away.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        println!("> stopping emulator {}", self.avd.green());
        self.kill_bridge();

        if let Some(mut guard) = self.guard.take() {
            if !guard.wait_exit(EMU_EXIT_WAIT)? {
                warn!("emulator still running after 'emu kill', terminating it directly");
            }
            guard.stop()?;
        }
        Ok(())
    }

    // Both bridge commands are best-effort; the process guard is the backstop
    // for the emulator itself.
    fn kill_bridge(&self) {
        let adb = adb_bin();
        for command in [format!("{} emu kill", adb), format!("{} kill-server", adb)] {
            debug!("running {}", command);
            if let Err(err) = run_silenced(&command) {
                warn!("Failed to run {}\n{}", command, err);
            }
        }
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        // stop() already ran if the guard is gone
        if self.guard.is_some() {
            self.kill_bridge();
        }
    }
}

// Synchronous variant usable from Drop. Output is discarded.
fn run_silenced(command: &str) -> anyhow::Result<()> {
    let words = parse_command(command)?;
    std::process::Command::new(&words[0])
        .args(&words[1..])
        .output()
        .map(|_| ())
        .with_context(|| format!("Failed to run command: {}", command))
}
