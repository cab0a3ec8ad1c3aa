use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Best-match similarity at or above which a reference unit counts as covered.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.4;

/// Units shorter than this (in characters, after cleaning) are dropped.
pub const DEFAULT_MIN_UNIT_CHARS: usize = 5;

pub const DEFAULT_MAX_TOP_MATCHES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignConfig {
    pub embedding: EmbeddingConfig,
    pub segmentation: SegmentationConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_dir: PathBuf,
    pub model_name: String,
    pub dimension: usize,
    /// Token budget per unit; longer units are truncated before inference.
    pub max_length: usize,
    pub cache_size: usize,
    pub auto_download: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub min_unit_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub match_threshold: f32,
    pub max_top_matches: usize,
    /// Decimal places kept on each emitted similarity
    pub similarity_decimals: u32,
    /// Decimal places kept on the overall score
    pub score_decimals: u32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_unit_chars: DEFAULT_MIN_UNIT_CHARS,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_top_matches: DEFAULT_MAX_TOP_MATCHES,
            similarity_decimals: 3,
            score_decimals: 2,
        }
    }
}

impl EmbeddingConfig {
    /// Directory holding the ONNX export and tokenizer of the configured model.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }
}

impl AlignConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.embedding.max_length == 0 {
            return Err("embedding.max_length must be > 0".into());
        }
        if self.embedding.model_name.trim().is_empty() {
            return Err("embedding.model_name must not be empty".into());
        }
        if self.segmentation.min_unit_chars == 0 {
            return Err("segmentation.min_unit_chars must be > 0".into());
        }
        if !(-1.0..=1.0).contains(&self.matching.match_threshold) {
            return Err("matching.match_threshold must be in [-1.0, 1.0]".into());
        }
        if self.matching.max_top_matches == 0 {
            return Err("matching.max_top_matches must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let mut value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        let mut merged = serde_json::to_value(Self::default())
            .map_err(|e| format!("Failed to encode default config: {}", e))?;
        merge_json(&mut merged, value.take());
        let config: Self = serde_json::from_value(merged)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        let model_dir = if Path::new("models").exists() {
            PathBuf::from("models")
        } else if let Ok(env_path) = std::env::var("MODEL_PATH") {
            PathBuf::from(env_path)
        } else {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("jdfit")
                .join("models")
        };

        Self {
            embedding: EmbeddingConfig {
                model_dir,
                model_name: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                max_length: 256,
                cache_size: 1000,
                auto_download: true,
            },
            segmentation: SegmentationConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}
