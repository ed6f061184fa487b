use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Scheme used to reach the dashboard server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(format!("unsupported protocol '{}' (expected http or https)", other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSettings {
    /// Explicit browser executable. Auto-detected when absent.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default)]
    pub headed: bool,
    #[serde(default)]
    pub no_sandbox: bool,
    /// Bounds browser startup, every CDP command and the wait for the page load event.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            binary: None,
            headed: false,
            no_sandbox: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Everything one capture run needs. Resolved once at startup.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub dashboard_id: String,
    /// Pre-encoded query fragment such as `var-env=prod&var-host=a`.
    #[serde(default)]
    pub variables: String,
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    /// Seconds to let client-side rendering settle after the load event.
    #[serde(default = "default_wait_time")]
    pub wait_time: u64,
    #[serde(default)]
    pub browser: BrowserSettings,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_output_file() -> PathBuf {
    PathBuf::from("output.pdf")
}

fn default_wait_time() -> u64 {
    10
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: Protocol::default(),
            api_token: String::new(),
            prefix: String::new(),
            dashboard_id: String::new(),
            variables: String::new(),
            output_file: default_output_file(),
            wait_time: default_wait_time(),
            browser: BrowserSettings::default(),
        }
    }
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.api_token.is_empty() { "" } else { "***" };
        f.debug_struct("CaptureConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("api_token", &token)
            .field("prefix", &self.prefix)
            .field("dashboard_id", &self.dashboard_id)
            .field("variables", &self.variables)
            .field("output_file", &self.output_file)
            .field("wait_time", &self.wait_time)
            .field("browser", &self.browser)
            .finish()
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub api_token: Option<String>,
    pub prefix: Option<String>,
    pub dashboard_id: Option<String>,
    pub variables: Option<String>,
    pub output_file: Option<PathBuf>,
    pub wait_time: Option<u64>,
    pub browser_binary: Option<PathBuf>,
    pub headed: bool,
    pub no_sandbox: bool,
    pub timeout_secs: Option<u64>,
}

impl CaptureConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: CaptureConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(protocol) = overrides.protocol {
            self.protocol = protocol;
        }
        if let Some(token) = overrides.api_token {
            self.api_token = token;
        }
        if let Some(prefix) = overrides.prefix {
            self.prefix = prefix;
        }
        if let Some(id) = overrides.dashboard_id {
            self.dashboard_id = id;
        }
        if let Some(variables) = overrides.variables {
            self.variables = variables;
        }
        if let Some(output) = overrides.output_file {
            self.output_file = output;
        }
        if let Some(wait) = overrides.wait_time {
            self.wait_time = wait;
        }
        if let Some(binary) = overrides.browser_binary {
            self.browser.binary = Some(binary);
        }
        // Flags can only switch these on.
        self.browser.headed |= overrides.headed;
        self.browser.no_sandbox |= overrides.no_sandbox;
        if let Some(timeout) = overrides.timeout_secs {
            self.browser.timeout_secs = timeout;
        }
    }

    /// Rejects values that can never produce a capture. An empty dashboard id
    /// is allowed through and only warned about.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be between 1 and 65535".into()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.output_file.as_os_str().is_empty() {
            return Err(Error::Config("output file must not be empty".into()));
        }
        if self.browser.timeout_secs == 0 {
            return Err(Error::Config("timeout must be at least one second".into()));
        }
        if self.dashboard_id.is_empty() {
            tracing::warn!("No dashboard id configured; the capture will target an empty dashboard path");
        }
        Ok(())
    }
}
