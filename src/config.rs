use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call the API from a browser
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "openai", "ollama", "lmstudio" or "openai-compatible"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Total generation attempts, including the first one
    pub max_generation_attempts: u32,
    pub max_schema_tables: usize,
    pub max_columns_per_table: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub row_cap: usize,
    pub timeout_secs: u64,
    pub pool_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VisualizationConfig {
    pub category_threshold: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// DuckDB file mirroring the ledger; memory-only when unset
    pub path: Option<String>,
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub sandbox: SandboxConfig,
    pub visualization: VisualizationConfig,
    pub history: HistoryConfig,
    pub connections: Vec<ConnectionConfig>,
    pub data_dir: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for data storage
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/askdash/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // ASKDASH__LLM__API_KEY and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("ASKDASH")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Message(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.pipeline.max_generation_attempts == 0 {
            return Err(ConfigError::Message(
                "pipeline.max_generation_attempts must be at least 1".to_string(),
            ));
        }
        if self.sandbox.row_cap == 0 {
            return Err(ConfigError::Message("sandbox.row_cap must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            api_url: None,
            temperature: 0.1,
            max_tokens: 1000,
            timeout_secs: 60,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: 2,
            max_schema_tables: 50,
            max_columns_per_table: 40,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            row_cap: 1000,
            timeout_secs: 30,
            pool_size: 4,
        }
    }
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            category_threshold: crate::pipeline::visualize::DEFAULT_CATEGORY_THRESHOLD,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_limit: 50,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            sandbox: SandboxConfig::default(),
            visualization: VisualizationConfig::default(),
            history: HistoryConfig::default(),
            connections: Vec::new(),
            data_dir: "data".to_string(),
        }
    }
}
