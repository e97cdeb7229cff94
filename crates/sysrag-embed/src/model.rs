use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

use sysrag_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

enum EncoderModel {
    Bert(BertModel),
    XlmRoberta(XLMRobertaModel),
}

/// A local Hugging Face encoder checkpoint: `config.json`, `tokenizer.json`
/// and `model.safetensors` (or `pytorch_model.bin`) in one directory.
pub struct TransformerEmbedder {
    model_id: String,
    model: EncoderModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    batch_size: usize,
    pad_id: u32,
}

impl TransformerEmbedder {
    pub fn load(model_id: &str, model_dir: &Path, max_len: usize, batch_size: usize) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let raw = fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?;
        let header: serde_json::Value = serde_json::from_str(&raw)?;
        let model_type = header.get("model_type").and_then(|v| v.as_str()).unwrap_or("bert");
        let dim = header
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))? as usize;

        let vb = load_weights(model_dir, &device)?;
        let (model, default_pad) = match model_type {
            "xlm-roberta" | "roberta" => {
                let config: XLMRobertaConfig = serde_json::from_str(&raw)?;
                (EncoderModel::XlmRoberta(XLMRobertaModel::new(&config, vb)?), 1)
            }
            _ => {
                let config: BertConfig = serde_json::from_str(&raw)?;
                (EncoderModel::Bert(BertModel::load(vb, &config)?), 0)
            }
        };
        let pad_id = header
            .get("pad_token_id")
            .and_then(|v| v.as_u64())
            .map_or(default_pad, |v| v as u32);

        tracing::info!(model = model_id, model_type, dim, elapsed = ?started.elapsed(), "embedding model loaded");
        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
            dim,
            max_len: max_len.max(1),
            batch_size: batch_size.max(1),
            pad_id,
        })
    }

    fn forward(&self, ids: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let type_ids = ids.zeros_like()?;
        let hidden = match &self.model {
            EncoderModel::Bert(m) => m.forward(ids, &type_ids, Some(mask))?,
            EncoderModel::XlmRoberta(m) => m.forward(ids, mask, &type_ids, None, None, None)?,
        };
        Ok(hidden)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    let tensors: HashMap<String, Tensor> = if safetensors.exists() {
        candle_core::safetensors::load(&safetensors, device)?
    } else {
        let bin = model_dir.join("pytorch_model.bin");
        candle_core::pickle::read_all(&bin)
            .with_context(|| format!("reading weights from {}", bin.display()))?
            .into_iter()
            .collect()
    };
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}

impl Embedder for TransformerEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let (ids, mask) = tokenize_batch(&self.tokenizer, batch, self.max_len, self.pad_id, &self.device)?;
            let hidden = self.forward(&ids, &mask)?;
            let pooled = masked_mean_l2(&hidden, &mask)?;
            out.extend(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?);
        }
        Ok(out)
    }
}
