//! Configuration for conversation sessions
//!
//! Values merge in layers, lowest precedence first: built-in defaults, the
//! TOML config file, environment variables. CLI flags override on top via
//! clap's `env` integration in the binary.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Default conversational speech model
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-preview-native-audio-dialog";

/// Default voice identifier
pub const DEFAULT_VOICE: &str = "Puck";

/// Configuration for a conversation session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target model identifier
    pub model: String,

    /// Voice identifier for synthesized speech
    pub voice: String,

    /// Optional system instruction sent with setup
    pub system_instruction: Option<String>,

    /// Proxy endpoint; when set, credentials are injected by the proxy and
    /// never appear on the channel
    pub proxy: Option<String>,

    /// API key embedded in the connection URL when no proxy is configured
    pub api_key: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: None,
            proxy: None,
            api_key: None,
        }
    }
}

/// On-disk configuration file shape
///
/// The API key deliberately has no file field; credentials stay in the
/// environment or behind the proxy.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    model: Option<String>,
    voice: Option<String>,
    system_instruction: Option<String>,
    proxy: Option<String>,
}

impl SessionConfig {
    /// Load configuration from the default file location and environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Load configuration from an explicit file path and the environment
    ///
    /// A missing file is not an error; the file layer is simply skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = fs::read_to_string(path)?;
                let file: ConfigFile = toml::from_str(&raw)?;
                config.apply_file(file);
                tracing::debug!(path = %path.display(), "loaded config file");
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(voice) = file.voice {
            self.voice = voice;
        }
        if file.system_instruction.is_some() {
            self.system_instruction = file.system_instruction;
        }
        if file.proxy.is_some() {
            self.proxy = file.proxy;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("CONFAB_MODEL") {
            self.model = model;
        }
        if let Ok(voice) = std::env::var("CONFAB_VOICE") {
            self.voice = voice;
        }
        if let Ok(prompt) = std::env::var("CONFAB_SYSTEM_PROMPT") {
            self.system_instruction = Some(prompt);
        }
        if let Ok(proxy) = std::env::var("CONFAB_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.api_key = Some(key);
        }
    }
}

/// Default config file path (`<config dir>/confab/config.toml`)
fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "omni", "confab")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
