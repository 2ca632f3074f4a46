use serde::Deserialize;
use std::path::PathBuf;
use yolo_detection::config::{LabelsConfig, ModelConfig, Validatable};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    #[default]
    Auto,
    Dshow,
    V4l2,
    Avfoundation,
    Any,
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    #[serde(default)]
    pub backend: CameraBackend,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_warmup_reads")]
    pub warmup_reads: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

fn default_warmup_reads() -> u32 {
    5
}

fn default_max_consecutive_failures() -> u32 {
    10
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct SessionConfig {
    pub window_title: String,
    pub snapshot_dir: PathBuf,
    pub snapshot_prefix: String,
    pub key_poll_ms: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_title: "Physics Equipment Detection".into(),
            snapshot_dir: PathBuf::from("."),
            snapshot_prefix: "detection_frame".into(),
            key_poll_ms: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("WD")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config.validate().map_err(config::ConfigError::Message)?;

    Ok(config)
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.labels.validate()
    }
}
