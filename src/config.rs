use anyhow::{Context, Result, bail};
use declarative::{PropertyTable, RetryPolicy, RunOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG: &str = "nuage.toml";

/// Upper bound for `engine.jobs`
const MAX_JOBS: usize = 64;

// ============================================================================
// nuage.toml
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NuageConfig {
    pub stack: StackConfig,
    pub engine: EngineConfig,
    pub state: StateConfig,
    pub scripts: ScriptsConfig,
    /// Resource kind -> properties whose change forces replacement.
    /// Entries replace the built-in list for that kind.
    pub policy: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// State is kept per stack name
    pub name: String,
    /// Name of the development environment, prefixed to its resources
    pub environment: String,
    /// Repository the build pipeline builds from
    pub repository: String,
    /// Branch, tag or commit to build
    pub version: Option<String>,
    pub region: String,
    /// Account the IAM policies are scoped to
    pub account_id: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            environment: "example".to_string(),
            repository: "https://github.com/cloudspeak/brew-install-efs-poc.git".to_string(),
            version: None,
            region: "eu-west-1".to_string(),
            account_id: "123456789012".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Provider operations in flight at once
    pub jobs: usize,
    /// Stop dispatching after this many seconds (0 = no limit)
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout_secs: 0,
            retry_attempts: 3,
            retry_base_delay_ms: 2000,
            retry_backoff: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Defaults to ~/.local/state/nuage
    pub directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Directory holding mount_efs.sh, install_brew.sh and install_pip.sh
    pub directory: String,
    pub sudo: bool,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            directory: "bin".to_string(),
            sudo: true,
        }
    }
}

impl NuageConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("stack.name", &self.stack.name),
            ("stack.environment", &self.stack.environment),
        ] {
            if value.is_empty() {
                bail!("{field} must not be empty");
            }
            if value.contains('/') || value.chars().any(char::is_whitespace) {
                bail!("{field} {value:?} must not contain '/' or whitespace");
            }
        }
        if self.stack.repository.trim().is_empty() {
            bail!("stack.repository must not be empty");
        }
        if self.stack.region.is_empty() {
            bail!("stack.region must not be empty");
        }
        let account = &self.stack.account_id;
        if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
            bail!("stack.account_id must be 12 digits");
        }
        if self.engine.jobs == 0 || self.engine.jobs > MAX_JOBS {
            bail!("engine.jobs must be between 1 and {MAX_JOBS}");
        }
        if self.engine.retry_attempts == 0 {
            bail!("engine.retry_attempts must be at least 1");
        }
        if self.engine.retry_backoff < 1.0 {
            bail!("engine.retry_backoff must be at least 1.0");
        }
        if let Some((kind, _)) = self.policy.iter().find(|(kind, _)| kind.is_empty()) {
            bail!("policy has an empty resource kind {kind:?}");
        }
        Ok(())
    }

    /// Directory holding per-stack state documents
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state.directory {
            Some(dir) => Ok(expand(dir)),
            None => {
                let home = dirs::home_dir().context("Could not determine home directory")?;
                Ok(home.join(".local").join("state").join("nuage"))
            }
        }
    }

    pub fn scripts_dir(&self) -> PathBuf {
        expand(&self.scripts.directory)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.engine.retry_attempts,
            Duration::from_millis(self.engine.retry_base_delay_ms),
            self.engine.retry_backoff,
        )
    }

    /// Run options, with command-line overrides applied
    pub fn run_options(&self, jobs: Option<usize>, timeout_secs: Option<u64>) -> RunOptions {
        let timeout_secs = timeout_secs.unwrap_or(self.engine.timeout_secs);
        RunOptions {
            concurrency: jobs.unwrap_or(self.engine.jobs).clamp(1, MAX_JOBS),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            retry: self.retry_policy(),
        }
    }

    /// Built-in replacement table with `policy` overrides applied
    pub fn property_table(&self, builtin: PropertyTable) -> PropertyTable {
        let mut table = builtin;
        for (kind, properties) in &self.policy {
            table.set_replace(kind, properties.iter().map(String::as_str));
        }
        table
    }
}

/// Resolve the config path given on the command line
pub fn config_path(arg: Option<&str>) -> PathBuf {
    expand(arg.unwrap_or(DEFAULT_CONFIG))
}

fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}
