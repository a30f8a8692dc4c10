//! Local sequence-classification datasets.
//!
//! Each dataset lives under `<dataset_dir>/<name>/` as `train.jsonl`,
//! `validation.jsonl` and `test.jsonl`, one JSON object per line. Column
//! names from [`DatasetMetadata`] may be dotted paths into nested objects
//! (`translation.th`).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use thai_tokenizer::{EncodedInput, ThaiTokenizer};

use crate::config::DatasetMetadata;
use crate::errors::{FinetuneError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub text: String,
    pub label: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Vec<Example>,
    pub validation: Vec<Example>,
    pub test: Vec<Example>,
}

pub fn split_path(dataset_dir: &Path, meta: &DatasetMetadata, split: &str) -> PathBuf {
    dataset_dir.join(meta.name).join(format!("{split}.jsonl"))
}

pub fn load_dataset(dataset_dir: &Path, meta: &DatasetMetadata) -> Result<DatasetSplits> {
    Ok(DatasetSplits {
        train: load_split(dataset_dir, meta, "train")?,
        validation: load_split(dataset_dir, meta, "validation")?,
        test: load_split(dataset_dir, meta, "test")?,
    })
}

pub fn load_split(dataset_dir: &Path, meta: &DatasetMetadata, split: &str) -> Result<Vec<Example>> {
    let path = split_path(dataset_dir, meta, split);
    let file = File::open(&path).map_err(|err| {
        FinetuneError::dataset(format!("failed to open {}: {err}", path.display()))
    })?;

    let mut examples = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let location = || format!("{}:{}", path.display(), index + 1);

        let record: Value = serde_json::from_str(&line)
            .map_err(|err| FinetuneError::dataset(format!("{}: {err}", location())))?;
        let text = lookup_path(&record, meta.text_input)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FinetuneError::dataset(format!(
                    "{}: missing text column `{}`",
                    location(),
                    meta.text_input
                ))
            })?;
        let raw_label = lookup_path(&record, meta.label).ok_or_else(|| {
            FinetuneError::dataset(format!("{}: missing label column `{}`", location(), meta.label))
        })?;
        let label = parse_label(raw_label, meta)
            .map_err(|msg| FinetuneError::dataset(format!("{}: {msg}", location())))?;

        examples.push(Example {
            text: text.to_string(),
            label,
        });
    }
    Ok(examples)
}

/// Follows a dotted path through nested JSON objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn parse_label(value: &Value, meta: &DatasetMetadata) -> std::result::Result<u32, String> {
    let raw = match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| format!("label {number} is not an integer"))?,
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("label `{text}` is not an integer"))?,
        other => return Err(format!("unsupported label value {other}")),
    };

    let label = raw - meta.label_offset;
    if label < 0 || label >= meta.num_labels as i64 {
        return Err(format!(
            "label {raw} outside of [{}, {})",
            meta.label_offset,
            meta.label_offset + meta.num_labels as i64
        ));
    }
    Ok(label as u32)
}

/// Tokenized examples ready for batching.
#[derive(Debug, Clone)]
pub struct SequenceClassificationDataset {
    encodings: Vec<EncodedInput>,
    labels: Vec<u32>,
    pad_id: u32,
}

impl SequenceClassificationDataset {
    pub fn from_examples(
        tokenizer: &dyn ThaiTokenizer,
        examples: &[Example],
        max_length: usize,
        prepare_for_tokenization: bool,
    ) -> Result<Self> {
        let mut encodings = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        for example in examples {
            encodings.push(tokenizer.encode(&example.text, max_length, prepare_for_tokenization)?);
            labels.push(example.label);
        }
        Ok(Self {
            encodings,
            labels,
            pad_id: tokenizer.special_ids().pad,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn encoding(&self, index: usize) -> Option<&EncodedInput> {
        self.encodings.get(index)
    }

    /// Example indices grouped into batches. With `drop_last` an incomplete
    /// final batch is discarded.
    pub fn batch_indices(&self, batch_size: usize, shuffle_seed: Option<u64>, drop_last: bool) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }

        let batch_size = batch_size.max(1);
        order
            .chunks(batch_size)
            .filter(|chunk| !drop_last || chunk.len() == batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    pub fn num_batches(&self, batch_size: usize, drop_last: bool) -> usize {
        let batch_size = batch_size.max(1);
        if drop_last {
            self.len() / batch_size
        } else {
            self.len().div_ceil(batch_size)
        }
    }

    /// Right-pads the selected examples to the longest one.
    pub fn collate(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        if indices.is_empty() {
            return Err(FinetuneError::runtime("cannot collate an empty batch"));
        }

        let mut selected = Vec::with_capacity(indices.len());
        for &index in indices {
            let encoding = self.encodings.get(index).ok_or_else(|| {
                FinetuneError::runtime(format!("example index {index} out of range"))
            })?;
            selected.push((encoding, self.labels[index]));
        }

        let seq_len = selected
            .iter()
            .map(|(encoding, _)| encoding.len())
            .max()
            .unwrap_or(0);
        let size = selected.len();

        let mut input_ids = Vec::with_capacity(size * seq_len);
        let mut attention_mask = Vec::with_capacity(size * seq_len);
        let mut labels = Vec::with_capacity(size);
        for (encoding, label) in &selected {
            let pad = seq_len - encoding.len();
            input_ids.extend_from_slice(&encoding.input_ids);
            input_ids.extend(std::iter::repeat(self.pad_id).take(pad));
            attention_mask.extend_from_slice(&encoding.attention_mask);
            attention_mask.extend(std::iter::repeat(0u32).take(pad));
            labels.push(*label);
        }

        Ok(Batch {
            input_ids: Tensor::from_vec(input_ids, (size, seq_len), device)?,
            attention_mask: Tensor::from_vec(attention_mask, (size, seq_len), device)?,
            token_type_ids: Tensor::zeros((size, seq_len), candle_core::DType::U32, device)?,
            labels: Tensor::from_vec(labels, size, device)?,
            size,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
    pub labels: Tensor,
    pub size: usize,
}
