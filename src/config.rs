use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LiveError, Result};

const fn default_input_sample_rate() -> u32 {
    16000
}

const fn default_output_sample_rate() -> u32 {
    24000
}

const fn default_frame_samples() -> usize {
    4096
}

fn default_model() -> String {
    "models/gemini-2.5-flash-native-audio-preview-12-2025".to_string()
}

fn default_voice() -> String {
    "Kore".to_string()
}

fn default_system_instruction() -> String {
    "Your name is Bolo. You are an expert on Indian culture, languages and geography. \
     Be warm, respectful and helpful, speak clearly, and greet people with \
     \"Namaste\"."
        .to_string()
}

const fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/\
     google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
        .to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

const fn default_connect_timeout_secs() -> u64 {
    15
}

const fn default_max_lines() -> usize {
    11
}

fn default_user_label() -> String {
    "You".to_string()
}

fn default_model_label() -> String {
    "Bolo".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub transcript: TranscriptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Input device name; the host default when unset.
    pub device: Option<String>,

    /// Output device name; the host default when unset.
    pub output_device: Option<String>,

    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,

    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            output_device: None,
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            frame_samples: default_frame_samples(),
        }
    }
}

/// What to do when the transport reports a non-terminal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log the error and keep streaming until the transport closes.
    #[default]
    Continue,
    /// Tear the session down immediately.
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    #[serde(default = "default_true")]
    pub input_transcription: bool,

    #[serde(default = "default_true")]
    pub output_transcription: bool,

    #[serde(default)]
    pub on_transport_error: ErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            voice: default_voice(),
            system_instruction: default_system_instruction(),
            input_transcription: true,
            output_transcription: true,
            on_transport_error: ErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    pub api_key: Option<String>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            api_key_env: default_api_key_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TransportConfig {
    /// The API key from the config file, falling back to `api_key_env`.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key
            && !key.is_empty()
        {
            return Ok(key.clone());
        }

        std::env::var(&self.api_key_env).map_err(|_| {
            LiveError::Config(format!(
                "no API key: set transport.api_key or the {} environment variable",
                self.api_key_env
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    #[serde(default = "default_user_label")]
    pub user_label: String,

    #[serde(default = "default_model_label")]
    pub model_label: String,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            user_label: default_user_label(),
            model_label: default_model_label(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LiveError::Config(format!(
                "config file not found: {}; run `bolo init` or use --config to specify a path",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LiveError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            LiveError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.audio.frame_samples == 0 {
            return Err(LiveError::Config(
                "audio.frame_samples must be greater than zero".to_string(),
            ));
        }
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(LiveError::Config(
                "audio sample rates must be greater than zero".to_string(),
            ));
        }
        if self.transcript.max_lines == 0 {
            return Err(LiveError::Config(
                "transcript.max_lines must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("bolo/config.yaml")
    }

    /// Write `audio.<key>` into the config file at `path`, creating the file
    /// if needed and leaving every other setting untouched.
    pub fn set_audio_device(path: &Path, key: &str, name: &str) -> Result<()> {
        use serde_yaml_ng::{Mapping, Value};

        let mut root = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                LiveError::Config(format!(
                    "failed to read config file {}: {e}",
                    path.display()
                ))
            })?;
            match serde_yaml_ng::from_str::<Value>(&contents) {
                Ok(Value::Mapping(m)) => m,
                Ok(Value::Null) => Mapping::new(),
                Ok(_) => {
                    return Err(LiveError::Config(format!(
                        "config file {} is not a mapping",
                        path.display()
                    )));
                }
                Err(e) => {
                    return Err(LiveError::Config(format!(
                        "failed to parse config file {}: {e}",
                        path.display()
                    )));
                }
            }
        } else {
            Mapping::new()
        };

        let audio = root
            .entry(Value::String("audio".to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()))
            .as_mapping_mut()
            .ok_or_else(|| LiveError::Config("audio section is not a mapping".to_string()))?;
        audio.insert(
            Value::String(key.to_string()),
            Value::String(name.to_string()),
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml_ng::to_string(&Value::Mapping(root))
            .map_err(|e| LiveError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, yaml).map_err(|e| {
            LiveError::Config(format!(
                "failed to write config file {}: {e}",
                path.display()
            ))
        })
    }
}
