use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::search::provider::{normalize, Content, EmbeddingProvider};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::sync::Api;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Default embedding model
/// https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2
const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Identifier for the embedding model used to build/query the index.
/// If this changes, the index is rebuilt.
pub const EMBEDDING_MODEL_ID: &str = DEFAULT_MODEL;

/// Tokens per window
const MAX_LEN: usize = 256;

/// Offset between consecutive windows; windows overlap by `MAX_LEN - STRIDE`
const STRIDE: usize = 128;

/// BERT sentence embedder running on candle
pub struct EmbeddingModel {
    model: Mutex<BertModel>,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl EmbeddingModel {
    /// Load the model from `config.models_dir`, downloading it on first use
    pub fn init(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.models_dir)?;

        let model_path = config.models_dir.join("model.safetensors");
        let config_path = config.models_dir.join("config.json");
        let tokenizer_path = config.models_dir.join("tokenizer.json");

        if !(model_path.exists() && config_path.exists() && tokenizer_path.exists()) {
            Self::download_model(&model_path, &config_path, &tokenizer_path)?;
        }

        Self::load_model_files(&model_path, &config_path, &tokenizer_path)
    }

    /// Download model files from HuggingFace Hub into the models directory
    fn download_model(model_path: &Path, config_path: &Path, tokenizer_path: &Path) -> Result<()> {
        tracing::info!(model = DEFAULT_MODEL, "downloading embedding model");

        let api = Api::new()?;
        let repo = api.model(DEFAULT_MODEL.to_string());

        let config_file = repo.get("config.json")?;
        let tokenizer_file = repo.get("tokenizer.json")?;
        let weights_file = repo.get("model.safetensors")?;

        std::fs::copy(&config_file, config_path)?;
        std::fs::copy(&tokenizer_file, tokenizer_path)?;
        std::fs::copy(&weights_file, model_path)?;

        tracing::info!("model downloaded");
        Ok(())
    }

    fn load_model_files(model_path: &Path, config_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let config_content = std::fs::read_to_string(config_path)?;
        let bert_config: BertConfig = serde_json::from_str(&config_content)
            .map_err(|e| Error::Model(format!("Failed to parse config: {}", e)))?;
        let dimension = hidden_size(&config_content)?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| Error::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;
        // Windowing below replaces the tokenizer's own truncation and padding
        tokenizer
            .with_truncation(None)
            .map_err(|e| Error::Tokenizer(format!("Failed to disable truncation: {}", e)))?;
        tokenizer.with_padding(None);

        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_path], DTYPE, &device)
                .map_err(|e| Error::Model(format!("Failed to load weights: {}", e)))?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| Error::Model(format!("Failed to load model: {}", e)))?;

        tracing::info!(model = DEFAULT_MODEL, dimension, "model loaded");

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
            dimension,
        })
    }

    /// Embed text of any length.
    ///
    /// Each window is mean-pooled and normalized; the window vectors are
    /// averaged and the average normalized again.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Tokenizer(format!("Tokenization failed: {}", e)))?;
        let ids = encoding.get_ids();

        let windows = token_windows(ids);
        if windows.is_empty() {
            return Err(Error::Embedding("no tokens to embed".to_string()));
        }

        let model = self
            .model
            .lock()
            .map_err(|e| Error::Model(format!("Failed to lock model: {}", e)))?;

        let mut sum = vec![0.0f32; self.dimension];
        for window in &windows {
            let mut pooled = self.embed_window(&model, window)?;
            normalize(&mut pooled)?;
            for (acc, value) in sum.iter_mut().zip(pooled) {
                *acc += value;
            }
        }

        normalize(&mut sum)?;
        Ok(sum)
    }

    /// Forward one window and mean-pool over its tokens
    fn embed_window(&self, model: &BertModel, window: &[u32]) -> Result<Vec<f32>> {
        let token_ids = Tensor::new(window, &self.device)?.unsqueeze(0)?;
        let token_type_ids = token_ids.zeros_like()?;

        // [1, seq, hidden] -> [hidden]
        let hidden = model.forward(&token_ids, &token_type_ids)?;
        let pooled = hidden.mean(1)?.squeeze(0)?;
        Ok(pooled.to_vec1()?)
    }
}

impl EmbeddingProvider for EmbeddingModel {
    fn model_id(&self) -> &str {
        EMBEDDING_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, content: &Content) -> Result<Vec<f32>> {
        match content {
            Content::Text(text) => self.embed_text(text),
            other => Err(Error::Embedding(format!(
                "{} cannot embed {} content",
                DEFAULT_MODEL,
                other.kind_name()
            ))),
        }
    }
}

/// Split token ids into windows of `MAX_LEN` starting every `STRIDE` tokens.
///
/// The last window is the first one that reaches the end of the sequence.
fn token_windows(ids: &[u32]) -> Vec<&[u32]> {
    let mut windows = Vec::new();
    let mut start = 0;
    while start < ids.len() {
        let end = (start + MAX_LEN).min(ids.len());
        windows.push(&ids[start..end]);
        if end == ids.len() {
            break;
        }
        start += STRIDE;
    }
    windows
}

/// Read the embedding width from a BERT config.json
fn hidden_size(config_json: &str) -> Result<usize> {
    let value: serde_json::Value = serde_json::from_str(config_json)?;
    value
        .get("hidden_size")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| Error::Model("config.json has no hidden_size".to_string()))
}
