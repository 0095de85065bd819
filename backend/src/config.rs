use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::pipeline::batch::FailurePolicy;

const DEFAULT_MODEL_CONFIG: &str = "config/model.yaml";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Failed to read model config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse model config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Unsupported model config: {0}")]
    Unsupported(String),
}

/// Deployment settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_address: String,
    pub debug: bool,
    pub upload_folder: PathBuf,
    pub results_csv: PathBuf,
    pub model_path: PathBuf,
    pub model_config: Option<PathBuf>,
    pub static_dir: PathBuf,
    pub batch_policy: FailurePolicy,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            debug: false,
            upload_folder: PathBuf::from("uploads"),
            results_csv: PathBuf::from("results.csv"),
            model_path: PathBuf::from("malaria_model.pt"),
            model_config: None,
            static_dir: PathBuf::from("static"),
            batch_policy: FailurePolicy::FailFast,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source, so tests do not
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let model_config = match lookup("MODEL_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_MODEL_CONFIG)).filter(|path| path.exists()),
        };

        Ok(Self {
            port: parse_var(&lookup, "PORT", defaults.port)?,
            bind_address: lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            debug: match lookup("DEBUG") {
                Some(value) => parse_flag("DEBUG", &value)?,
                None => defaults.debug,
            },
            upload_folder: lookup("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_folder),
            results_csv: lookup("RESULTS_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_csv),
            model_path: lookup("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            model_config,
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            batch_policy: parse_var(&lookup, "BATCH_POLICY", defaults.batch_policy)?,
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub version: f32,
    pub image: ImageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub size: Vec<u32>,
    pub channels: u32,
    pub preprocessing: PreprocessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub resize_method: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            version: 1.0,
            image: ImageConfig {
                size: vec![64, 64],
                channels: 3,
                preprocessing: PreprocessingConfig {
                    resize_method: "nearest".to_string(),
                },
            },
        }
    }
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig = serde_yaml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.image.channels != 3 {
            return Err(ConfigError::Unsupported(format!(
                "expected 3 input channels, got {}",
                self.image.channels
            )));
        }
        match self.image.size.as_slice() {
            [width, height] if *width > 0 && *height > 0 => {}
            other => {
                return Err(ConfigError::Unsupported(format!(
                    "image size must be [width, height], got {:?}",
                    other
                )));
            }
        }
        self.resize_filter()?;
        Ok(())
    }

    /// Spatial size as `(width, height)`.
    pub fn input_size(&self) -> (u32, u32) {
        match self.image.size.as_slice() {
            [width, height] => (*width, *height),
            _ => (64, 64),
        }
    }

    pub fn resize_filter(&self) -> Result<FilterType, ConfigError> {
        match self.image.preprocessing.resize_method.as_str() {
            "nearest" => Ok(FilterType::Nearest),
            "triangle" | "bilinear" => Ok(FilterType::Triangle),
            "catmull_rom" | "bicubic" => Ok(FilterType::CatmullRom),
            "gaussian" => Ok(FilterType::Gaussian),
            "lanczos3" => Ok(FilterType::Lanczos3),
            other => Err(ConfigError::Unsupported(format!(
                "unknown resize method '{}'",
                other
            ))),
        }
    }
}
