//! VitalImage configuration. Settings are layered: built-in defaults, then an
//! optional TOML file, then `VITALIMAGE_*` environment variables

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables that override file settings
pub const ENV_PREFIX: &str = "VITALIMAGE";

/// Name of the downloadable report file
pub const REPORT_FILE_NAME: &str = "vitalimage_analysis_report.txt";

#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address the web server binds to
    pub host: String,
    pub port: u16,

    /// Base URL of the generative model API
    pub api_base: String,

    /// Model name, with or without the `models/` prefix
    pub model: String,

    /// Local file holding the API key
    pub api_key_file: PathBuf,

    /// Inline API key. Takes precedence over `api_key_file`
    pub api_key: Option<String>,

    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,

    pub request_timeout_secs: u64,

    /// Default tracing filter, used when `RUST_LOG` is unset
    pub log: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "0.0.0.0".to_string(),
            port: 8501,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key_file: PathBuf::from("api_key.txt"),
            api_key: None,
            max_upload_bytes: 20 * 1024 * 1024,
            request_timeout_secs: 120,
            log: "info,actix_web=info".to_string(),
        }
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key_file", &self.api_key_file)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("log", &self.log)
            .finish()
    }
}

impl Settings {
    /// Build the settings from the defaults, the optional config file, and the
    /// environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_sources(
            file,
            Some(Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    /// Layer the defaults, the optional file and the optional environment
    fn from_sources(file: Option<&Path>, env: Option<Environment>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Settings::default()).context("failed to encode default settings")?,
        );

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        if let Some(env) = env {
            builder = builder.add_source(env);
        }

        let settings: Settings = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be greater than zero"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        Ok(())
    }

    /// Resolve the API credential: the inline key if set, otherwise the
    /// trimmed contents of `api_key_file`
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                return Ok(key.to_string());
            }
        }

        let key = std::fs::read_to_string(&self.api_key_file).with_context(|| {
            format!("failed to read api key file {}", self.api_key_file.display())
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!(
                "api key file {} is empty",
                self.api_key_file.display()
            ));
        }
        Ok(key.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The full `generateContent` URL for the configured model
    pub fn endpoint(&self) -> String {
        let model = self.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!(
            "{}/{}:generateContent",
            self.api_base.trim().trim_end_matches('/'),
            model_path
        )
    }
}
