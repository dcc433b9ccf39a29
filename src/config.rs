use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::env;
use std::fmt;
use tracing_subscriber::EnvFilter;

/// Precision of scaled rows, centroids and distances.
pub type Number = f64;

pub const EPSILON: f64 = 1e-12;

/// Upper bound on rows accepted by a single batch request.
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Deserialize)]
pub struct ClusterConfig {
    pub source: Option<String>,
    pub model_format: Option<String>,
    pub model_path: Option<String>,
    pub scaler_path: Option<String>,
    pub features_path: Option<String>,
    pub model_url: Option<String>,
    pub scaler_params_url: Option<String>,
    pub feature_names_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub fetch_timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
}

impl ClusterConfig {
    /// Deserializes every layer at once. A value that does not parse into its
    /// field's type is an error rather than a silent default.
    pub fn try_from(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Centroid artifact exported as JSON.
    KMeans,
    /// ONNX export, only usable with the `onnx` feature.
    Onnx,
}

impl ModelFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "kmeans" => Ok(Self::KMeans),
            "onnx" => Ok(Self::Onnx),
            other => anyhow::bail!("Unknown model format '{}' (expected 'kmeans' or 'onnx')", other),
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KMeans => write!(f, "kmeans"),
            Self::Onnx => write!(f, "onnx"),
        }
    }
}

/// Where the three model artifacts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Local {
        model_path: String,
        scaler_path: String,
        features_path: String,
    },
    Remote {
        model_url: String,
        scaler_params_url: String,
        feature_names_url: String,
        timeout_secs: u64,
    },
}

impl ArtifactSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Remote { .. } => "remote",
        }
    }
}

pub struct State {
    pub source: ArtifactSource,
    pub model_format: ModelFormat,
    pub host: String,
    pub port: u16,
    pub verbose: bool,
}

impl State {
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("socio_cluster").required(false))
            .add_source(Environment::with_prefix("SOCIO_CLUSTER").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let cluster_config =
            ClusterConfig::try_from(config).context("Invalid configuration value")?;
        Self::from_config(cluster_config)
    }

    pub fn from_config(cluster_config: ClusterConfig) -> Result<Self> {
        Self::from_config_with(cluster_config, |key| env::var(key).ok())
    }

    /// Resolves the configuration, asking `lookup` for the legacy
    /// `*_BLOB_URL` variables when a remote URL is not configured.
    pub fn from_config_with<F>(cluster_config: ClusterConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = cluster_config.source.unwrap_or_else(|| "local".to_string());

        let model_format = cluster_config
            .model_format
            .as_deref()
            .map(ModelFormat::parse)
            .transpose()?
            .unwrap_or(ModelFormat::KMeans);

        let source = match source.to_ascii_lowercase().as_str() {
            "local" => ArtifactSource::Local {
                model_path: cluster_config
                    .model_path
                    .unwrap_or_else(|| "models/kmeans.json".to_string()),
                scaler_path: cluster_config
                    .scaler_path
                    .unwrap_or_else(|| "models/scaler_params.json".to_string()),
                features_path: cluster_config
                    .features_path
                    .unwrap_or_else(|| "models/feature_names.txt".to_string()),
            },
            "remote" => ArtifactSource::Remote {
                model_url: cluster_config
                    .model_url
                    .or_else(|| lookup("MODEL_BLOB_URL"))
                    .context("MODEL_BLOB_URL not set in config or environment")?,
                scaler_params_url: cluster_config
                    .scaler_params_url
                    .or_else(|| lookup("SCALER_PARAMS_BLOB_URL"))
                    .context("SCALER_PARAMS_BLOB_URL not set in config or environment")?,
                feature_names_url: cluster_config
                    .feature_names_url
                    .or_else(|| lookup("FEATURE_NAMES_BLOB_URL"))
                    .context("FEATURE_NAMES_BLOB_URL not set in config or environment")?,
                timeout_secs: cluster_config.fetch_timeout_secs.unwrap_or(30),
            },
            other => anyhow::bail!("Unknown artifact source '{}' (expected 'local' or 'remote')", other),
        };

        Ok(Self {
            source,
            model_format,
            host: cluster_config.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: cluster_config.port.unwrap_or(8000),
            verbose: cluster_config.verbose.unwrap_or(false),
        })
    }

    pub fn print_config(&self) {
        println!("source={}", self.source.label());
        println!("model_format={}", self.model_format);
        match &self.source {
            ArtifactSource::Local {
                model_path,
                scaler_path,
                features_path,
            } => {
                println!("model_path={}", model_path);
                println!("scaler_path={}", scaler_path);
                println!("features_path={}", features_path);
            }
            ArtifactSource::Remote {
                model_url,
                scaler_params_url,
                feature_names_url,
                timeout_secs,
            } => {
                println!("model_url={}", model_url);
                println!("scaler_params_url={}", scaler_params_url);
                println!("feature_names_url={}", feature_names_url);
                println!("fetch_timeout_secs={}", timeout_secs);
            }
        }
        println!("host={}", self.host);
        println!("port={}", self.port);
        println!("verbose={}", self.verbose);
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
