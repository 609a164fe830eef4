use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::code_edit::EDITABLE_EXTENSIONS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generator_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_utility_model")]
    pub utility_model: String,
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generator_retries")]
    pub max_retries: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_generator_url(),
            default_model: default_model(),
            utility_model: default_utility_model(),
            models: default_models(),
            timeout_secs: default_generator_timeout(),
            max_retries: default_generator_retries(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_generator_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_utility_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}
fn default_models() -> Vec<String> {
    vec![
        "gemini-2.5-flash".to_string(),
        "gemini-2.5-pro".to_string(),
        "gemini-2.5-flash-lite".to_string(),
    ]
}
fn default_generator_timeout() -> u64 {
    60
}
fn default_generator_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloudConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_cloud_retries")]
    pub max_retries: u32,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_cloud_timeout(),
            max_retries: default_cloud_retries(),
        }
    }
}

fn default_cloud_timeout() -> u64 {
    30
}
fn default_cloud_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_rewrite_min_chars")]
    pub rewrite_min_chars: usize,
    #[serde(default = "default_local_snippet_chars")]
    pub local_snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            rewrite_min_chars: default_rewrite_min_chars(),
            local_snippet_chars: default_local_snippet_chars(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_rrf_k() -> f64 {
    crate::fusion::DEFAULT_RRF_K
}
fn default_rewrite_min_chars() -> usize {
    12
}
fn default_local_snippet_chars() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    EDITABLE_EXTENSIONS
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}
fn default_max_file_bytes() -> u64 {
    512 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default = "default_code_generation")]
    pub code_generation: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            code_generation: default_code_generation(),
        }
    }
}

fn default_code_generation() -> bool {
    true
}

impl Config {
    /// All-defaults configuration for running without a config file.
    pub fn minimal() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            cloud: CloudConfig::default(),
            retrieval: RetrievalConfig::default(),
            storage: StorageConfig::default(),
            dataset: DatasetConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(config.retrieval.rrf_k > 0.0) {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }

    if !config
        .generator
        .models
        .iter()
        .any(|m| m == &config.generator.default_model)
    {
        anyhow::bail!(
            "generator.models must include generator.default_model ('{}')",
            config.generator.default_model
        );
    }

    if let Some(url) = &config.cloud.base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("cloud.base_url must be an http(s) URL, got '{}'", url);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.top_k, 10);
        assert!((config.retrieval.rrf_k - 60.0).abs() < f64::EPSILON);
        assert!(config.cloud.base_url.is_none());
        assert!(config.features.code_generation);
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let config: Config = toml::from_str("[retrieval]\ntop_k = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_default_model() {
        let config: Config = toml::from_str(
            "[generator]\ndefault_model = \"other\"\nmodels = [\"gemini-2.5-flash\"]\n",
        )
        .unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("default_model"));
    }

    #[test]
    fn test_rejects_non_http_cloud_url() {
        let config: Config = toml::from_str("[cloud]\nbase_url = \"ftp://x\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = toml::from_str(include_str!("../config/gw.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.dataset.exclude_globs, vec!["**/dist/**".to_string()]);
        assert!(config.dataset.include_globs.iter().any(|g| g == "**/*.rs"));
    }

    #[test]
    fn test_include_globs_cover_editable_extensions() {
        let config = Config::minimal();
        assert!(config
            .dataset
            .include_globs
            .iter()
            .any(|g| g == "**/*.md"));
    }
}
