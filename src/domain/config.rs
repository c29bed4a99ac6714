use serde::{Deserialize, Serialize};
use std::time::Duration;

/// GattPool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GattPoolConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Tool subprocess configuration
    #[serde(default)]
    pub tool: ToolConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Number of tool sessions kept by the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Deadline applied by the CLI to a whole device operation
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// How the gatttool subprocess is launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable to spawn
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; must put the tool in interactive mode
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// How long to wait for the child to exit after its output closes
    #[serde(default = "default_exit_grace")]
    pub exit_grace_ms: u64,
}

impl ToolConfig {
    /// Build a tool configuration for an arbitrary program
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            exit_grace_ms: default_exit_grace(),
        }
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

impl GlobalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_timeout() -> u64 {
    10000
}

fn default_program() -> String {
    "gatttool".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-I".to_string()]
}

fn default_exit_grace() -> u64 {
    200
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            exit_grace_ms: default_exit_grace(),
        }
    }
}
