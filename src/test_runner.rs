use crate::{
    config::StressConfig,
    process_control::{launch, parse_command, LaunchMode, Redirect},
};
use anyhow::Context;
use colored::Colorize;
use std::{
    fs::File,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tracing::{debug, warn};

/// Output file written by a run without load generation.
pub const NO_STRESS_FILE_NAME: &str = "no-stress.txt";

/// Lead time given to stress-ng to reach its configured load before the
/// measured test starts.
const RAMP_UP: Duration = Duration::from_secs(1);

/// Runs the test once per configuration, in slice order, writing the i-th
/// run's output to `<output_folder>/<i>.txt`.
pub async fn run_with_stress(
    test_command: &str,
    output_folder: &Path,
    configs: &[StressConfig],
) -> anyhow::Result<()> {
    if configs.is_empty() {
        warn!("the configuration file contains no stress configurations, nothing to run");
    }

    let total = configs.len();
    for (index, config) in configs.iter().enumerate() {
        println!(
            "> running configuration {} of {}",
            (index + 1).to_string().green(),
            total
        );
        let output_file = output_folder.join(format!("{}.txt", index));
        run_under_load(test_command, &output_file, config).await?;
    }
    Ok(())
}

/// Runs the test once with a stress-ng instance loading the device for the
/// duration of the run. The generator is terminated whether or not the run
/// succeeds; a run error takes precedence over a termination error.
pub async fn run_under_load(
    test_command: &str,
    output_file: &Path,
    config: &StressConfig,
) -> anyhow::Result<()> {
    let generator_command = config.stress_ng_command();
    debug!("load generator command: {}", generator_command);
    let generator = launch(&generator_command, LaunchMode::SpawnTracked(Redirect::Null))
        .await?
        .into_handle()?;

    tokio::time::sleep(RAMP_UP).await;

    let outcome = run_once(test_command, output_file).await;
    let stopped = generator.stop();
    outcome?;
    stopped
}

/// Runs the test command once, from the script's own directory, with stdout
/// captured into `output_file` (created or truncated).
///
/// The script's exit status does not influence the result; a failing test
/// still leaves its output file behind. Only failures to set the run up
/// (unparseable command, unresolvable script, unwritable output file) are
/// errors.
pub async fn run_once(test_command: &str, output_file: &Path) -> anyhow::Result<()> {
    let words = parse_command(test_command)?;
    let script = resolve_script(&words[0])?;
    let working_dir = script
        .parent()
        .with_context(|| format!("Test script has no parent directory: {}", script.display()))?;
    ensure_executable(&script)?;

    let out = File::create(output_file)
        .with_context(|| format!("Failed to create output file: {}", output_file.display()))?;

    debug!(
        "running {} from {}",
        script.display(),
        working_dir.display()
    );
    let status = tokio::process::Command::new(&script)
        .args(&words[1..])
        .current_dir(working_dir)
        .stdout(Stdio::from(out))
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("Failed to run test script: {}", script.display()))?;

    // deliberately not inspected further; the run's value is its output file
    debug!("test script exited with {}", status);
    Ok(())
}

// Absolute path of the script as named, without touching the filesystem.
fn resolve_script(script: &str) -> anyhow::Result<PathBuf> {
    std::path::absolute(script)
        .with_context(|| format!("Failed to resolve test script path: {}", script))
}

#[cfg(target_family = "unix")]
fn ensure_executable(script: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(script)
        .with_context(|| format!("Test script not found: {}", script.display()))?;
    let mut permissions = metadata.permissions();
    if permissions.mode() & 0o111 == 0 {
        permissions.set_mode(permissions.mode() | 0o111);
        std::fs::set_permissions(script, permissions).with_context(|| {
            format!("Failed to mark test script executable: {}", script.display())
        })?;
    }
    Ok(())
}

#[cfg(not(target_family = "unix"))]
fn ensure_executable(script: &Path) -> anyhow::Result<()> {
    std::fs::metadata(script)
        .map(|_| ())
        .with_context(|| format!("Test script not found: {}", script.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_script_keeps_absolute_paths() -> anyhow::Result<()> {
        let resolved = resolve_script("/usr/local/bin/run.sh")?;
        assert_eq!(resolved, PathBuf::from("/usr/local/bin/run.sh"));
        Ok(())
    }

    #[cfg(target_family = "unix")]
    mod unix {
        use super::*;
        use nanoid::nanoid;
        use std::fs;

        fn scratch_dir() -> PathBuf {
            let dir = std::env::temp_dir().join(format!("emustress-test-{}", nanoid!()));
            fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            path
        }

        #[tokio::test]
        async fn writes_stdout_to_the_output_file() -> anyhow::Result<()> {
            let dir = scratch_dir();
            let script = write_script(&dir, "run.sh", "echo hello from the test");
            let output_file = dir.join("out.txt");

            run_once(script.to_str().unwrap(), &output_file).await?;

            assert_eq!(fs::read_to_string(&output_file)?, "hello from the test\n");
            fs::remove_dir_all(&dir)?;
            Ok(())
        }

        #[tokio::test]
        async fn truncates_stale_output() -> anyhow::Result<()> {
            let dir = scratch_dir();
            let script = write_script(&dir, "run.sh", "echo fresh");
            let output_file = dir.join("out.txt");
            fs::write(&output_file, "stale content from an earlier run\n")?;

            run_once(script.to_str().unwrap(), &output_file).await?;

            assert_eq!(fs::read_to_string(&output_file)?, "fresh\n");
            fs::remove_dir_all(&dir)?;
            Ok(())
        }

        #[tokio::test]
        async fn runs_from_the_script_parent_directory() -> anyhow::Result<()> {
            let dir = scratch_dir();
            let script = write_script(&dir, "run.sh", "pwd");
            let output_file = dir.join("out.txt");

            run_once(script.to_str().unwrap(), &output_file).await?;

            let reported = PathBuf::from(fs::read_to_string(&output_file)?.trim());
            assert_eq!(reported.canonicalize()?, dir.canonicalize()?);
            fs::remove_dir_all(&dir)?;
            Ok(())
        }

        #[tokio::test]
        async fn quoted_arguments_stay_single_arguments() -> anyhow::Result<()> {
            let dir = scratch_dir();
            let script = write_script(&dir, "run.sh", "echo \"$#:$1\"");
            let output_file = dir.join("out.txt");
            let command = format!("{} 'a b c'", script.display());

            run_once(&command, &output_file).await?;

            assert_eq!(fs::read_to_string(&output_file)?, "1:a b c\n");
            fs::remove_dir_all(&dir)?;
            Ok(())
        }

        #[tokio::test]
        async fn a_script_without_the_execute_bit_is_made_runnable() -> anyhow::Result<()> {
            use std::os::unix::fs::PermissionsExt;

            let dir = scratch_dir();
            let script = write_script(&dir, "run.sh", "echo ran anyway");
            fs::set_permissions(&script, fs::Permissions::from_mode(0o644))?;
            let output_file = dir.join("out.txt");

            run_once(script.to_str().unwrap(), &output_file).await?;

            assert_eq!(fs::read_to_string(&output_file)?, "ran anyway\n");
            fs::remove_dir_all(&dir)?;
            Ok(())
        }

        #[tokio::test]
        async fn a_failing_script_still_produces_its_output() -> anyhow::Result<()> {
            let dir = scratch_dir();
            let script = write_script(&dir, "run.sh", "echo partial\nexit 7");
            let output_file = dir.join("out.txt");

            run_once(script.to_str().unwrap(), &output_file).await?;

            assert_eq!(fs::read_to_string(&output_file)?, "partial\n");
            fs::remove_dir_all(&dir)?;
            Ok(())
        }

        #[tokio::test]
        async fn a_missing_script_is_an_error() {
            let dir = scratch_dir();
            let output_file = dir.join("out.txt");

            let result = run_once("/definitely/not/a/script.sh", &output_file).await;

            assert!(result.is_err());
            fs::remove_dir_all(&dir).unwrap();
        }
    }
}
