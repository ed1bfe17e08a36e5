use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use localrag_core::config::expand_path;
use localrag_core::error::{Error, Result};
use localrag_core::traits::Embedder;

use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

struct Inner {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl Inner {
    fn forward(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), self.max_len), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 * texts.len() as u128 {
            warn!(batch = texts.len(), ?elapsed, "slow embedding batch");
        } else {
            debug!(batch = texts.len(), ?elapsed, "embedded batch");
        }
        Ok(vectors)
    }
}

/// Metal when built with the `metal` feature and a GPU is present, else CPU.
fn select_device() -> (Device, &'static str) {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) {
            return (dev, "metal");
        }
    }
    (Device::Cpu, "cpu")
}

/// BGE-M3 (XLM-RoBERTa) sentence embedder running on candle.
///
/// Expects `tokenizer.json`, `config.json` and `pytorch_model.bin` in the model
/// directory. Inference runs on tokio's blocking pool.
pub struct BgeM3Embedder {
    inner: Arc<Inner>,
    dim: usize,
    id: String,
}

impl BgeM3Embedder {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        Self::load_inner(model_dir, max_len).map_err(|e| Error::EmbeddingFailure(format!("{e:#}")))
    }

    fn load_inner(model_dir: &Path, max_len: usize) -> anyhow::Result<Self> {
        let (device, device_name) = select_device();
        info!(dir = %model_dir.display(), device = device_name, "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw_config)?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path).with_context(|| format!("reading {}", weights_path.display()))?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        let dim = usize::try_from(dim)?;
        info!(dim, max_len, "BGE-M3 model loaded");
        Ok(Self {
            inner: Arc::new(Inner { model, tokenizer, device, max_len }),
            dim,
            id: format!("bge-m3:d{dim}:t{max_len}"),
        })
    }
}

#[async_trait]
impl Embedder for BgeM3Embedder {
    fn model_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingFailure("model returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.forward(&texts))
            .await
            .map_err(|e| Error::EmbeddingFailure(format!("embedding task failed: {e}")))?
            .map_err(|e| Error::EmbeddingFailure(format!("{e:#}")))
    }
}

/// Finds the model directory: `APP_MODEL_DIR`, `MODEL_DIR`, the configured
/// directory, then the conventional `models/bge-m3` locations.
pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { candidates.push(expand_path(dir)); }
    }
    if let Some(dir) = configured { candidates.push(expand_path(dir)); }
    candidates.push(PathBuf::from("../models/bge-m3"));
    candidates.push(PathBuf::from("models/bge-m3"));
    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| Error::InvalidConfig("Could not locate BGE-M3 model directory".to_string()))
}
