//! Pretrained encoder with a sequence-classification head.
//!
//! `model_type` picks the encoder: RoBERTa-family checkpoints (`roberta`,
//! `camembert`, `xlm-roberta`) run on candle's XLM-RoBERTa model, whose
//! position ids start past the padding index; everything else runs on
//! candle's BERT model. The head follows the RoBERTa layout:
//! `classifier.dense` with tanh followed by `classifier.out_proj`, applied
//! to the first token.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, IndexOp, Tensor, Var};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{Config as RobertaConfig, XLMRobertaModel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::data::Batch;
use crate::errors::{FinetuneError, Result};

pub const CONFIG_FILENAME: &str = "config.json";
pub const WEIGHTS_FILENAME: &str = "model.safetensors";
const HEAD_PREFIX: &str = "classifier.";
const DEFAULT_DROPOUT: f64 = 0.1;
const DEFAULT_INITIALIZER_RANGE: f64 = 0.02;
const ROBERTA_MODEL_TYPES: [&str; 3] = ["roberta", "camembert", "xlm-roberta"];

/// Architecture-specific half of [`ModelConfig`].
#[derive(Debug, Clone)]
pub enum EncoderConfig {
    Bert(BertConfig),
    Roberta(RobertaConfig),
}

/// `config.json` of a pretrained checkpoint.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    raw: Map<String, Value>,
    encoder: EncoderConfig,
    pub hidden_size: usize,
    pub max_position_embeddings: usize,
    pub classifier_dropout: f64,
    pub initializer_range: f64,
    pub model_type: Option<String>,
}

impl ModelConfig {
    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(CONFIG_FILENAME);
        let contents = fs::read_to_string(&path).map_err(|err| {
            FinetuneError::initialization(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let raw: Map<String, Value> = serde_json::from_str(contents)?;
        let model_type = raw
            .get("model_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let encoder = match model_type.as_deref() {
            Some(kind) if ROBERTA_MODEL_TYPES.contains(&kind) => {
                EncoderConfig::Roberta(roberta_config(&raw)?)
            }
            _ => EncoderConfig::Bert(serde_json::from_str(contents)?),
        };

        let usize_field = |name: &str| -> Result<usize> {
            raw.get(name)
                .and_then(Value::as_u64)
                .map(|value| value as usize)
                .ok_or_else(|| {
                    FinetuneError::initialization(format!("model config is missing `{name}`"))
                })
        };
        let f64_field = |name: &str| raw.get(name).and_then(Value::as_f64);

        let classifier_dropout = f64_field("classifier_dropout")
            .or_else(|| f64_field("hidden_dropout_prob"))
            .unwrap_or(DEFAULT_DROPOUT);

        Ok(Self {
            hidden_size: usize_field("hidden_size")?,
            max_position_embeddings: usize_field("max_position_embeddings")?,
            classifier_dropout,
            initializer_range: f64_field("initializer_range").unwrap_or(DEFAULT_INITIALIZER_RANGE),
            model_type,
            raw,
            encoder,
        })
    }

    /// Longest input, special tokens included. RoBERTa-style checkpoints
    /// reserve two positions past the padding index.
    pub fn max_sequence_length(&self) -> usize {
        self.max_position_embeddings.saturating_sub(2)
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    /// The checkpoint `config.json` with `num_labels` recorded.
    pub fn to_json_with_labels(&self, num_labels: usize) -> Result<String> {
        let mut raw = self.raw.clone();
        raw.insert("num_labels".into(), Value::from(num_labels));
        Ok(serde_json::to_string_pretty(&Value::Object(raw))?)
    }
}

/// XLM-RoBERTa reads several keys that RoBERTa `config.json` files often
/// omit; fill them with the Hugging Face defaults.
fn roberta_config(raw: &Map<String, Value>) -> Result<RobertaConfig> {
    let mut raw = raw.clone();
    let defaults = [
        ("attention_probs_dropout_prob", Value::from(DEFAULT_DROPOUT)),
        ("hidden_dropout_prob", Value::from(DEFAULT_DROPOUT)),
        ("hidden_act", Value::from("gelu")),
        ("layer_norm_eps", Value::from(1e-5)),
        ("pad_token_id", Value::from(1)),
        ("position_embedding_type", Value::from("absolute")),
        ("type_vocab_size", Value::from(1)),
    ];
    for (key, value) in defaults {
        raw.entry(key).or_insert(value);
    }
    Ok(serde_json::from_value(Value::Object(raw))?)
}

enum Encoder {
    Bert(BertModel),
    Roberta(XLMRobertaModel),
}

impl Encoder {
    fn load(vb: VarBuilder, config: &EncoderConfig) -> Result<Self> {
        Ok(match config {
            EncoderConfig::Bert(config) => Self::Bert(BertModel::load(vb, config)?),
            EncoderConfig::Roberta(config) => Self::Roberta(XLMRobertaModel::new(config, vb)?),
        })
    }

    /// Hidden states of shape `(batch, seq_len, hidden_size)`.
    fn forward(&self, batch: &Batch) -> Result<Tensor> {
        let hidden = match self {
            Self::Bert(model) => model.forward(
                &batch.input_ids,
                &batch.token_type_ids,
                Some(&batch.attention_mask),
            )?,
            Self::Roberta(model) => model.forward(
                &batch.input_ids,
                &batch.attention_mask,
                &batch.token_type_ids,
                None,
                None,
                None,
            )?,
        };
        Ok(hidden)
    }
}

pub struct SequenceClassifier {
    encoder: Encoder,
    dense: Linear,
    out_proj: Linear,
    dropout: Dropout,
    num_labels: usize,
}

impl SequenceClassifier {
    /// Logits of shape `(batch, num_labels)`.
    pub fn forward(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let hidden = self.encoder.forward(batch)?;
        let first = hidden.i((.., 0))?;
        let xs = self.dropout.forward(&first, train)?;
        let xs = self.dense.forward(&xs)?.tanh()?;
        let xs = self.dropout.forward(&xs, train)?;
        Ok(self.out_proj.forward(&xs)?)
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }
}

pub fn classification_loss(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let logits = logits.to_dtype(DType::F32)?;
    Ok(candle_nn::loss::cross_entropy(&logits, labels)?)
}

/// A classifier together with the variables backing it.
pub struct LoadedModel {
    pub model: SequenceClassifier,
    pub varmap: VarMap,
    pub config: ModelConfig,
    /// Head tensors missing from the checkpoint and freshly initialised.
    pub initialized: Vec<String>,
}

impl LoadedModel {
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn save_weights(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }
}

pub fn load_sequence_classifier(
    model_dir: &Path,
    num_labels: usize,
    dtype: DType,
    device: &Device,
    seed: u64,
) -> Result<LoadedModel> {
    let config = ModelConfig::from_dir(model_dir)?;
    let weights_path = model_dir.join(WEIGHTS_FILENAME);
    if !weights_path.is_file() {
        return Err(FinetuneError::initialization(format!(
            "model weights not found at {}",
            weights_path.display()
        )));
    }
    let weights = candle_core::safetensors::load(&weights_path, device)?;
    let prefix = encoder_prefix(&weights, config.model_type.as_deref())?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, device);
    let encoder_vb = match prefix.as_deref() {
        Some(prefix) => vb.pp(prefix),
        None => vb.clone(),
    };
    let encoder = Encoder::load(encoder_vb, config.encoder())?;

    let head_vb = vb.pp("classifier");
    let dense = linear(config.hidden_size, config.hidden_size, head_vb.pp("dense"))?;
    let out_proj = linear(config.hidden_size, num_labels, head_vb.pp("out_proj"))?;

    let initialized = assign_weights(&varmap, &weights, config.initializer_range, seed)?;

    let model = SequenceClassifier {
        encoder,
        dense,
        out_proj,
        dropout: Dropout::new(config.classifier_dropout as f32),
        num_labels,
    };
    Ok(LoadedModel {
        model,
        varmap,
        config,
        initialized,
    })
}

/// `None` when the encoder tensors are stored without a prefix.
fn encoder_prefix(weights: &HashMap<String, Tensor>, model_type: Option<&str>) -> Result<Option<String>> {
    const EMBEDDINGS: &str = "embeddings.word_embeddings.weight";
    if weights.contains_key(EMBEDDINGS) {
        return Ok(None);
    }

    let candidates = model_type
        .into_iter()
        .chain(["roberta", "bert", "camembert"])
        .map(str::to_string);
    for candidate in candidates {
        if weights.contains_key(&format!("{candidate}.{EMBEDDINGS}")) {
            return Ok(Some(candidate));
        }
    }

    Err(FinetuneError::initialization(
        "checkpoint does not contain encoder embeddings",
    ))
}

/// Copies checkpoint tensors into `varmap`. Missing head tensors are drawn
/// from N(0, initializer_range) (biases zeroed); any other missing tensor is
/// an error.
fn assign_weights(
    varmap: &VarMap,
    weights: &HashMap<String, Tensor>,
    initializer_range: f64,
    seed: u64,
) -> Result<Vec<String>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| FinetuneError::initialization("variable map lock poisoned"))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut initialized = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        let var = &data[name];
        match weights.get(name.as_str()) {
            Some(tensor) if tensor.dims() == var.dims() => {
                var.set(&tensor.to_dtype(var.dtype())?)?;
            }
            found if name.starts_with(HEAD_PREFIX) => {
                if found.is_some() {
                    println!("warning: reinitialising {name}; checkpoint shape differs");
                }
                let fresh = if name.ends_with(".bias") {
                    var.zeros_like()?
                } else {
                    let values = normal_values(&mut rng, var.elem_count(), initializer_range);
                    Tensor::from_vec(values, var.shape(), var.device())?.to_dtype(var.dtype())?
                };
                var.set(&fresh)?;
                initialized.push(name.clone());
            }
            Some(tensor) => missing.push(format!(
                "{name} (shape {:?}, expected {:?})",
                tensor.dims(),
                var.dims()
            )),
            None => missing.push(name.clone()),
        }
    }

    if missing.is_empty() {
        Ok(initialized)
    } else {
        Err(FinetuneError::initialization(format!(
            "checkpoint is missing encoder weights: {}",
            missing.join(", ")
        )))
    }
}

fn normal_values(rng: &mut StdRng, count: usize, std: f64) -> Vec<f32> {
    (0..count)
        .map(|_| {
            let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = rng.gen();
            (std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()) as f32
        })
        .collect()
}
