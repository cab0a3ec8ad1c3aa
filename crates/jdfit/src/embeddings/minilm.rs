use anyhow::{anyhow, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::EmbeddingModel;
use crate::config::EmbeddingConfig;
use crate::search::l2_normalize;

const MAX_BATCH_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct MiniLmConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

impl MiniLmConfig {
    /// Locate the ONNX export and tokenizer inside a sentence-transformers model directory.
    pub fn from_model_dir(model_dir: &Path, config: &EmbeddingConfig) -> Option<Self> {
        let candidates = [
            model_dir.join("model.onnx"),
            model_dir.join("onnx").join("model.onnx"),
            model_dir.join("model_O4.onnx"),
        ];
        let model_path = candidates.into_iter().find(|p| p.exists())?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return None;
        }

        Some(Self {
            model_path,
            tokenizer_path,
            dimension: config.dimension,
            max_length: config.max_length,
            cache_size: config.cache_size,
        })
    }
}

/// Sentence embeddings from an ONNX export of a MiniLM sentence-transformer.
///
/// Token states are mean-pooled over the attention mask and L2-normalized.
pub struct MiniLmEmbeddings {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    config: MiniLmConfig,
    cache: Option<Mutex<lru::LruCache<String, Vec<f32>>>>,
}

/// Token ids, attention mask and segment ids for one unit, already truncated.
struct EncodedUnit {
    ids: Vec<i64>,
    mask: Vec<i64>,
    type_ids: Vec<i64>,
}

impl MiniLmEmbeddings {
    pub fn new(config: MiniLmConfig) -> Result<Self> {
        let _ = ort::init().with_name("jdfit_embeddings").commit();

        if !config.model_path.exists() {
            return Err(anyhow!(
                "Model file not found at: {}",
                config.model_path.display()
            ));
        }

        let mut tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {:?}", e))?;
        truncate_at(&mut tokenizer, config.max_length)?;

        let model_bytes = std::fs::read(&config.model_path)
            .map_err(|e| anyhow!("Failed to read model: {:?}", e))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow!("Intra threads: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        let cache = NonZeroUsize::new(config.cache_size)
            .map(|size| Mutex::new(lru::LruCache::new(size)));

        tracing::info!(
            model = %config.model_path.display(),
            dimension = config.dimension,
            "Loaded sentence embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            config,
            cache,
        })
    }

    fn encode(&self, text: &str) -> Result<EncodedUnit> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;

        let widen = |xs: &[u32]| xs.iter().map(|&x| x as i64).collect::<Vec<_>>();

        Ok(EncodedUnit {
            ids: widen(encoding.get_ids()),
            mask: widen(encoding.get_attention_mask()),
            type_ids: widen(encoding.get_type_ids()),
        })
    }

    fn cached(&self, text: &str) -> Option<Vec<f32>> {
        self.cache.as_ref()?.lock().get(text).cloned()
    }

    fn remember(&self, text: &str, embedding: &[f32]) {
        if let Some(cache) = &self.cache {
            cache.lock().put(text.to_string(), embedding.to_vec());
        }
    }

    /// Run one padded batch through the model.
    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let encoded = texts
            .iter()
            .map(|t| self.encode(t))
            .collect::<Result<Vec<_>>>()?;

        let batch_size = encoded.len();
        let padded_len = encoded.iter().map(|e| e.ids.len()).max().unwrap_or(0).max(1);

        let mut ids_flat = Vec::with_capacity(batch_size * padded_len);
        let mut mask_flat = Vec::with_capacity(batch_size * padded_len);
        let mut type_flat = Vec::with_capacity(batch_size * padded_len);

        for unit in &encoded {
            ids_flat.extend_from_slice(&unit.ids);
            mask_flat.extend_from_slice(&unit.mask);
            type_flat.extend_from_slice(&unit.type_ids);
            for _ in unit.ids.len()..padded_len {
                ids_flat.push(0i64);
                mask_flat.push(0i64);
                type_flat.push(0i64);
            }
        }

        let shape = vec![batch_size, padded_len];
        let input_ids = Value::from_array((shape.clone(), ids_flat))
            .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
        let attention_mask = Value::from_array((shape.clone(), mask_flat.clone()))
            .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;
        let token_type_ids = Value::from_array((shape, type_flat))
            .map_err(|e| anyhow!("token_type_ids tensor: {:?}", e))?;

        let inputs = ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| anyhow!("Batch inference failed: {:?}", e))?;

        let mut embeddings = Vec::with_capacity(batch_size);

        // Some exports ship a pooled output; otherwise pool token states ourselves
        let has_sentence_embedding = outputs
            .iter()
            .any(|(name, _)| name == "sentence_embedding");

        if has_sentence_embedding {
            let (shape, data) = outputs["sentence_embedding"]
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("Failed to extract sentence_embedding: {:?}", e))?;
            let hidden_dim = shape[1] as usize;
            check_width(self.config.dimension, hidden_dim)?;
            for sample_idx in 0..batch_size {
                let offset = sample_idx * hidden_dim;
                let mut embedding = data[offset..offset + hidden_dim].to_vec();
                l2_normalize(&mut embedding);
                embeddings.push(embedding);
            }
            return Ok(embeddings);
        }

        let output_name = outputs
            .iter()
            .find(|(name, _)| *name == "last_hidden_state" || *name == "token_embeddings")
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| anyhow!("Model produced no token embeddings output"))?;

        let (shape, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract output '{}': {:?}", output_name, e))?;

        let seq_len = shape[1] as usize;
        let hidden_dim = shape[2] as usize;
        check_width(self.config.dimension, hidden_dim)?;

        for sample_idx in 0..batch_size {
            let mask = &mask_flat[sample_idx * padded_len..(sample_idx + 1) * padded_len];
            let sample_offset = sample_idx * seq_len * hidden_dim;
            embeddings.push(mean_pool(
                &data[sample_offset..sample_offset + seq_len * hidden_dim],
                mask,
                hidden_dim,
            ));
        }

        Ok(embeddings)
    }
}

/// The model's output width must match the configured embedding dimension.
/// Truncate inside the tokenizer so [CLS]/[SEP] survive on long units.
fn truncate_at(tokenizer: &mut tokenizers::Tokenizer, max_length: usize) -> Result<()> {
    tokenizer
        .with_truncation(Some(tokenizers::TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("Failed to configure truncation: {:?}", e))?;
    Ok(())
}

fn check_width(configured: usize, produced: usize) -> Result<()> {
    if configured != produced {
        return Err(anyhow!(
            "Model produces {}-dimensional embeddings but embedding.dimension is {}",
            produced,
            configured
        ));
    }
    Ok(())
}

/// Average token states where the mask is set, then normalize.
fn mean_pool(states: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut mask_sum = 0.0f32;

    for (pos, token) in states.chunks_exact(hidden_dim).enumerate() {
        let weight = mask.get(pos).copied().unwrap_or(0) as f32;
        if weight > 0.0 {
            mask_sum += weight;
            for (acc, value) in pooled.iter_mut().zip(token) {
                *acc += value * weight;
            }
        }
    }

    if mask_sum > 0.0 {
        for value in &mut pooled {
            *value /= mask_sum;
        }
    }
    l2_normalize(&mut pooled);
    pooled
}

impl EmbeddingModel for MiniLmEmbeddings {
    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_documents(&[text])?;
        batch
            .pop()
            .ok_or_else(|| anyhow!("Model returned no embedding"))
    }

    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cached(t)).collect();
        let misses: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();

        tracing::debug!(
            units = texts.len(),
            cache_hits = texts.len() - misses.len(),
            "Embedding units"
        );

        for batch in misses.chunks(MAX_BATCH_SIZE) {
            let batch_texts: Vec<&str> = batch.iter().map(|&i| texts[i]).collect();
            let vectors = self.run_batch(&batch_texts)?;
            if vectors.len() != batch.len() {
                return Err(anyhow!(
                    "Model returned {} embeddings for {} inputs",
                    vectors.len(),
                    batch.len()
                ));
            }
            for (&i, vector) in batch.iter().zip(vectors) {
                self.remember(texts[i], &vector);
                results[i] = Some(vector);
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| anyhow!("Missing embedding after inference")))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
