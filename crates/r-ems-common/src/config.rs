//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and tracing setup for messaging services."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use r_ems_messaging::{SocketOptions, Topology};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_file_enabled() -> bool {
    false
}

/// Configuration of a messaging process: named sockets plus logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub sockets: IndexMap<String, SocketConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`MessagingConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedMessagingConfig {
    pub config: MessagingConfig,
    pub source: PathBuf,
}

impl MessagingConfig {
    pub const ENV_CONFIG_PATH: &str = "R_EMS_CONFIG";

    /// Load configuration from disk, respecting the `R_EMS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedMessagingConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedMessagingConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedMessagingConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Load and validate a specific file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<MessagingConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a socket definition by name.
    pub fn socket(&self, name: &str) -> Option<&SocketConfig> {
        self.sockets.get(name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.sockets.is_empty() {
            return Err(anyhow!("configuration must declare at least one socket"));
        }
        for (name, socket) in &self.sockets {
            socket.validate(name)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for MessagingConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: MessagingConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// One `[sockets.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    pub topology: Topology,
    #[serde(flatten)]
    pub options: SocketOptions,
}

impl SocketConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        self.options
            .validate()
            .with_context(|| format!("socket '{}' has invalid options", name))?;
        if self.options.listen.is_empty() && self.options.dial.is_empty() {
            return Err(anyhow!(
                "socket '{}' must listen on or dial at least one address",
                name
            ));
        }
        if !self.options.topics.is_empty() && self.topology != Topology::Sub {
            return Err(anyhow!(
                "socket '{}' declares topics but is a {} socket",
                name,
                self.topology
            ));
        }
        Ok(())
    }

    /// Options for opening the socket, labelled with the table name unless
    /// the table sets its own.
    pub fn socket_options(&self, name: &str) -> SocketOptions {
        let mut options = self.options.clone();
        if options.name.is_none() {
            options.name = Some(name.to_owned());
        }
        options
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Also write a daily rolling JSON file under `directory`.
    #[serde(default = "default_file_enabled")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: default_file_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const SAMPLE: &str = r#"
        [logging]
        format = "structured-json"

        [sockets.node0]
        topology = "surveyor"
        listen = "inproc://survey"
        survey_time = 100

        [sockets.node1]
        topology = "sub"
        dial = ["tcp://127.0.0.1:5555"]
        topics = ["grid/"]
        recv_timeout = "infinite"
    "#;

    #[test]
    fn parses_socket_tables_in_order() {
        let config: MessagingConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        let names: Vec<_> = config.sockets.keys().cloned().collect();
        assert_eq!(names, vec!["node0", "node1"]);

        let node0 = config.socket("node0").unwrap();
        assert_eq!(node0.topology, Topology::Surveyor);
        assert_eq!(node0.options.survey_time, Duration::from_millis(100));
        assert_eq!(
            node0.socket_options("node0").name.as_deref(),
            Some("node0")
        );

        let node1 = config.socket("node1").unwrap();
        assert_eq!(node1.options.recv_timeout, None);
        assert_eq!(node1.options.topics, vec!["grid/".to_owned()]);
    }

    #[test]
    fn rejects_socket_without_addresses() {
        let err = "[sockets.idle]\ntopology = \"bus\"\n"
            .parse::<MessagingConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("idle"));
    }

    #[test]
    fn rejects_topics_on_non_subscriber() {
        let err = "[sockets.p]\ntopology = \"pub\"\nlisten = \"inproc://p\"\ntopics = [\"a\"]\n"
            .parse::<MessagingConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("topics"));
    }

    #[test]
    fn rejects_empty_config() {
        assert!("".parse::<MessagingConfig>().is_err());
    }
}
