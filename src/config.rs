use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::matrix::{MatrixEntry, KEY_DELIMITER};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub server: ServerConfig,
    pub tunnel: TunnelConfig,
    pub github: GitHubConfig,
    pub runner: RunnerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TunnelConfig {
    /// Public base URL that forwards to the local server.
    pub public_url: String,
    #[serde(default = "default_true")]
    pub probe: bool,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_git_ref")]
    pub git_ref: String,
}

// Manual Debug impl to avoid leaking the access token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("git_ref", &self.git_ref)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_num_runs")]
    pub num_runs: u32,
    #[serde(default = "default_callback_header")]
    pub callback_header: String,
    /// Unset means wait for callbacks indefinitely.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub matrix: Vec<MatrixEntry>,
    #[serde(default)]
    pub test_plans: Vec<String>,
}

impl RunnerConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsensusConfig {
    #[serde(default = "default_true")]
    pub check_incomplete: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            check_incomplete: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_git_ref() -> String {
    "main".to_string()
}

fn default_num_runs() -> u32 {
    1
}

fn default_callback_header() -> String {
    "x-correlation-key".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(
                config::File::with_name("consensus-runner")
                    .required(false),
            );
        }

        // Environment variable overrides with CONSENSUS_RUNNER_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("CONSENSUS_RUNNER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// Check the runner settings. Call after any command-line overrides.
    pub fn validate(&self) -> Result<()> {
        let runner = &self.runner;

        if runner.num_runs == 0 {
            return Err(AppError::Config("runner.num_runs must be at least 1".to_string()));
        }
        if runner.run_timeout_secs == Some(0) {
            return Err(AppError::Config(
                "runner.run_timeout_secs must be at least 1 when set".to_string(),
            ));
        }
        if runner.matrix.is_empty() {
            return Err(AppError::Config("runner.matrix is empty".to_string()));
        }
        if runner.test_plans.is_empty() {
            return Err(AppError::Config("runner.test_plans is empty".to_string()));
        }
        if axum::http::HeaderName::from_bytes(runner.callback_header.as_bytes()).is_err() {
            return Err(AppError::Config(format!(
                "Invalid callback header name: {}",
                runner.callback_header
            )));
        }

        let fields = runner
            .matrix
            .iter()
            .flat_map(|entry| {
                std::iter::once(&entry.workflow_id).chain(entry.browsers.iter())
            })
            .chain(runner.test_plans.iter());
        for field in fields {
            if field.is_empty() || field.contains(KEY_DELIMITER) {
                return Err(AppError::Config(format!(
                    "Matrix value {field:?} is empty or contains '{KEY_DELIMITER}'"
                )));
            }
        }

        // Repeated values would enumerate the same combination twice and
        // make two runs compete for one correlation key.
        find_duplicate(runner.test_plans.iter(), "runner.test_plans")?;
        find_duplicate(
            runner.matrix.iter().map(|entry| &entry.workflow_id),
            "runner.matrix workflow_id",
        )?;
        for entry in &runner.matrix {
            find_duplicate(
                entry.browsers.iter(),
                &format!("browsers of {}", entry.workflow_id),
            )?;
        }

        Ok(())
    }

    /// URL the remote job posts result batches and the terminal signal to.
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.tunnel.public_url.trim_end_matches('/'))
    }

    /// URL the remote job posts progress updates to.
    pub fn status_url(&self) -> String {
        format!("{}/status", self.tunnel.public_url.trim_end_matches('/'))
    }
}

fn find_duplicate<'a>(values: impl Iterator<Item = &'a String>, what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(AppError::Config(format!("Duplicate value {value:?} in {what}")));
        }
    }
    Ok(())
}

#[cfg(test)]
impl AppConfig {
    /// Configuration used across unit tests.
    pub(crate) fn sample() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(tests::SAMPLE, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
