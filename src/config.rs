//! Project configuration loaded from `.tracemend/config.toml`.
//!
//! Every field is optional in the file; anything missing keeps its default.
//! A missing file means all defaults. A file that does not parse is an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".tracemend";
pub const CONFIG_FILE: &str = "config.toml";

/// Overrides `sandbox.timeout_secs`.
pub const ENV_SANDBOX_TIMEOUT: &str = "TRACEMEND_SANDBOX_TIMEOUT";
/// Overrides `repair.max_attempts`.
pub const ENV_MAX_ATTEMPTS: &str = "TRACEMEND_MAX_ATTEMPTS";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TracemendConfig {
    pub sandbox: SandboxSettings,
    pub repair: RepairSettings,
    pub reasoning: ReasoningSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxSettings {
    pub timeout_secs: u64,
    pub max_steps: usize,
    /// Program and arguments of the runner child; empty means the current
    /// executable with the hidden runner subcommand.
    pub runner: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_steps: crate::trace::MAX_TRACE_STEPS,
            runner: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairSettings {
    pub max_attempts: u32,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            max_attempts: crate::orchestrator::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningBackend {
    /// An external CLI reading the prompt on stdin.
    Command,
    /// An OpenAI-compatible chat completions endpoint.
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningSettings {
    pub backend: ReasoningBackend,
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub retry: RetrySettings,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            backend: ReasoningBackend::Command,
            command: ["claude", "--print", "--output-format", "json"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_secs: 300,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Raw TOML structure for `.tracemend/config.toml`
#[derive(Debug, Deserialize)]
struct ConfigToml {
    sandbox: Option<SandboxSection>,
    repair: Option<RepairSection>,
    reasoning: Option<ReasoningSection>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    timeout_secs: Option<u64>,
    max_steps: Option<usize>,
    runner: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RepairSection {
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReasoningSection {
    backend: Option<ReasoningBackend>,
    command: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    retry: Option<RetrySection>,
}

#[derive(Debug, Deserialize)]
struct RetrySection {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    backoff_factor: Option<f64>,
    max_delay_ms: Option<u64>,
}

impl TracemendConfig {
    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load the file (if any) and apply environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = Self::load_file(project_dir)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load `.tracemend/config.toml` from the project directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load_file(project_dir: &Path) -> Result<Self> {
        let config_path = Self::path(project_dir);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let raw: ConfigToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(section) = raw.sandbox {
            if let Some(timeout_secs) = section.timeout_secs {
                config.sandbox.timeout_secs = timeout_secs;
            }
            if let Some(max_steps) = section.max_steps {
                config.sandbox.max_steps = max_steps;
            }
            if let Some(runner) = section.runner {
                config.sandbox.runner = runner;
            }
        }
        if let Some(section) = raw.repair
            && let Some(max_attempts) = section.max_attempts
        {
            config.repair.max_attempts = max_attempts;
        }
        if let Some(section) = raw.reasoning {
            config.reasoning.merge(section);
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRACEMEND_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SANDBOX_TIMEOUT) {
            self.sandbox.timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SANDBOX_TIMEOUT} must be a number of seconds, got '{raw}'"))?;
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            self.repair.max_attempts = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_ATTEMPTS} must be a positive integer, got '{raw}'"))?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.repair.max_attempts == 0 {
            bail!("repair.max_attempts must be at least 1");
        }
        if self.sandbox.timeout_secs == 0 {
            bail!("sandbox.timeout_secs must be at least 1");
        }
        if self.reasoning.backend == ReasoningBackend::Command && self.reasoning.command.is_empty() {
            bail!("reasoning.command must name a program when backend = \"command\"");
        }
        if self.reasoning.retry.max_attempts == 0 {
            bail!("reasoning.retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Write the default configuration, refusing to overwrite unless `force`.
    pub fn write_default(project_dir: &Path, force: bool) -> Result<PathBuf> {
        let config_path = Self::path(project_dir);
        if config_path.exists() && !force {
            bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }
        let dir = project_dir.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        std::fs::write(&config_path, Self::default().to_toml()?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(config_path)
    }
}

impl ReasoningSettings {
    fn merge(&mut self, section: ReasoningSection) {
        if let Some(backend) = section.backend {
            self.backend = backend;
        }
        if let Some(command) = section.command {
            self.command = command;
        }
        if let Some(timeout_secs) = section.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if let Some(base_url) = section.base_url {
            self.base_url = base_url;
        }
        if let Some(model) = section.model {
            self.model = model;
        }
        if let Some(api_key_env) = section.api_key_env {
            self.api_key_env = api_key_env;
        }
        if let Some(retry) = section.retry {
            if let Some(max_attempts) = retry.max_attempts {
                self.retry.max_attempts = max_attempts;
            }
            if let Some(initial_delay_ms) = retry.initial_delay_ms {
                self.retry.initial_delay_ms = initial_delay_ms;
            }
            if let Some(backoff_factor) = retry.backoff_factor {
                self.retry.backoff_factor = backoff_factor;
            }
            if let Some(max_delay_ms) = retry.max_delay_ms {
                self.retry.max_delay_ms = max_delay_ms;
            }
        }
    }
}
