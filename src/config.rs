use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Name of the configuration file, read from the directory containing the
/// emustress executable.
pub const CONFIG_FILE_NAME: &str = "stressConfigurations.json";

fn stress_ng_bin() -> String {
    env::var("EMUSTRESS_STRESS_NG_BIN").unwrap_or_else(|_| "stress-ng".into())
}

/// One stress-ng load shape: how many CPU and memory workers to run and how
/// hard each of them pushes. `vm_bytes` is a percentage of available memory,
/// not a byte count.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressConfig {
    pub cpu_workers: u32,
    pub cpu_load: u32,
    pub vm_workers: u32,
    pub vm_bytes: u32,
}

impl StressConfig {
    /// Loads the configuration list from the fixed-name file sitting next to
    /// the executable.
    pub fn load_default() -> anyhow::Result<Vec<StressConfig>> {
        Self::try_from_path(&default_path()?)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<Vec<StressConfig>> {
        let config_str = fs::read_to_string(path).with_context(|| {
            format!("Unable to read stress configurations from {}", path.display())
        })?;
        Self::try_from_str(&config_str)
    }

    pub fn try_from_str(config_str: &str) -> anyhow::Result<Vec<StressConfig>> {
        serde_json::from_str::<Vec<StressConfig>>(config_str)
            .map_err(|e| anyhow::anyhow!("JSON parsing error: {}", e))
    }

    /// The stress-ng invocation generating this load shape.
    pub fn stress_ng_command(&self) -> String {
        format!(
            "{} --cpu {} --cpu-load {} --vm {} --vm-bytes {}%",
            stress_ng_bin(),
            self.cpu_workers,
            self.cpu_load,
            self.vm_workers,
            self.vm_bytes
        )
    }
}

/// Path of the configuration file: fixed name, colocated with the program.
pub fn default_path() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe().context("Unable to locate the running executable")?;
    let dir = exe
        .parent()
        .context("Executable has no parent directory")?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn can_load_config_file() -> anyhow::Result<()> {
        let configs =
            StressConfig::try_from_path(Path::new("./fixtures/stressConfigurations.success.json"))?;

        assert_eq!(configs.len(), 2);
        assert_eq!(
            configs[0],
            StressConfig {
                cpu_workers: 2,
                cpu_load: 50,
                vm_workers: 1,
                vm_bytes: 75
            }
        );
        assert_eq!(
            configs[1],
            StressConfig {
                cpu_workers: 4,
                cpu_load: 90,
                vm_workers: 2,
                vm_bytes: 50
            }
        );
        Ok(())
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(StressConfig::try_from_str("not json").is_err());
        assert!(StressConfig::try_from_str(r#"{"cpuWorkers": 1}"#).is_err());
    }

    #[test]
    fn an_empty_list_is_legal() -> anyhow::Result<()> {
        let configs = StressConfig::try_from_str("[]")?;
        assert!(configs.is_empty());
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = StressConfig::try_from_path(Path::new("./fixtures/does-not-exist.json"));
        assert!(result.is_err());
    }

    #[test]
    fn stress_ng_command_embeds_all_four_values() {
        let config = StressConfig {
            cpu_workers: 2,
            cpu_load: 50,
            vm_workers: 1,
            vm_bytes: 75,
        };

        assert_eq!(
            config.stress_ng_command(),
            "stress-ng --cpu 2 --cpu-load 50 --vm 1 --vm-bytes 75%"
        );
    }

    #[test]
    fn default_path_is_colocated_with_the_executable() -> anyhow::Result<()> {
        let path = default_path()?;
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some(CONFIG_FILE_NAME)
        );
        Ok(())
    }
}
