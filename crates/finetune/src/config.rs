use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use thai_tokenizer::TokenizerKind;

use crate::errors::{FinetuneError, Result};

pub const ADAM_EPSILON: f64 = 1e-8;
pub const ADAM_BETA1: f64 = 0.9;
pub const ADAM_BETA2: f64 = 0.999;
pub const MAX_GRAD_NORM: f64 = 1.0;

/// Command line of `seq-cls-finetune`.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(author, version, about = "Fine-tune a pretrained Thai encoder for sequence classification", long_about = None)]
pub struct FinetuneArgs {
    #[arg(help = "Directory with config.json and model.safetensors")]
    pub model_dir: PathBuf,

    #[arg(help = "Directory with the tokenizer vocabulary")]
    pub tokenizer_dir: PathBuf,

    #[arg(help = "Tokenizer type: `spm`, `newmm` or `syllable`")]
    pub tokenizer_type: String,

    #[arg(help = "Dataset: `wisesight_sentiment`, `wongnai_reviews` or `generated_reviews_enth`")]
    pub dataset_name: String,

    pub output_dir: PathBuf,

    pub log_dir: PathBuf,

    #[arg(long = "num_train_epochs", default_value_t = 1)]
    pub num_train_epochs: usize,

    #[arg(long = "learning_rate", default_value_t = 1e-5)]
    pub learning_rate: f64,

    #[arg(long = "weight_decay", default_value_t = 0.1)]
    pub weight_decay: f64,

    #[arg(long = "warmup_ratio", default_value_t = 0.06)]
    pub warmup_ratio: f64,

    #[arg(long = "batch_size", default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long = "no_cuda")]
    pub no_cuda: bool,

    #[arg(long = "fp16")]
    pub fp16: bool,

    #[arg(long = "greater_is_better")]
    pub greater_is_better: bool,

    #[arg(long = "metric_for_best_model", default_value = "eval_loss")]
    pub metric_for_best_model: String,

    #[arg(long = "eval_steps", default_value_t = 250)]
    pub eval_steps: usize,

    #[arg(long = "logging_steps", default_value_t = 10)]
    pub logging_steps: usize,

    #[arg(long = "save_steps", default_value_t = 500)]
    pub save_steps: usize,

    #[arg(long = "seed", default_value_t = 2020)]
    pub seed: u64,

    #[arg(long = "dataset_dir", default_value = "datasets", help = "Root of the local dataset files")]
    pub dataset_dir: PathBuf,
}

impl FinetuneArgs {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(err) = self.tokenizer_type.parse::<TokenizerKind>() {
            errors.push(err.to_string());
        }
        if DatasetMetadata::lookup(&self.dataset_name).is_none() {
            errors.push(format!("unsupported dataset `{}`", self.dataset_name));
        }
        if self.num_train_epochs == 0 {
            errors.push("num_train_epochs must be greater than 0".to_string());
        }
        if self.learning_rate <= 0.0 {
            errors.push("learning_rate must be greater than 0".to_string());
        }
        if self.weight_decay < 0.0 {
            errors.push("weight_decay must be >= 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            errors.push("warmup_ratio must be within [0, 1]".to_string());
        }
        if self.batch_size == 0 {
            errors.push("batch_size must be greater than 0".to_string());
        }
        for (name, value) in [
            ("eval_steps", self.eval_steps),
            ("logging_steps", self.logging_steps),
            ("save_steps", self.save_steps),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than 0"));
            }
        }
        if self.metric_for_best_model.trim().is_empty() {
            errors.push("metric_for_best_model must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FinetuneError::Validation(errors))
        }
    }

    pub fn tokenizer_kind(&self) -> Result<TokenizerKind> {
        Ok(self.tokenizer_type.parse()?)
    }

    pub fn dataset_metadata(&self) -> Result<&'static DatasetMetadata> {
        DatasetMetadata::lookup(&self.dataset_name)
            .ok_or_else(|| FinetuneError::UnsupportedDataset(self.dataset_name.clone()))
    }
}

/// Column layout of a supported dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetMetadata {
    pub name: &'static str,
    /// Dotted path to the text column.
    pub text_input: &'static str,
    pub label: &'static str,
    pub num_labels: usize,
    /// Subtracted from every raw label.
    pub label_offset: i64,
}

pub const DATASETS: [DatasetMetadata; 3] = [
    DatasetMetadata {
        name: "wisesight_sentiment",
        text_input: "texts",
        label: "category",
        num_labels: 4,
        label_offset: 0,
    },
    DatasetMetadata {
        name: "wongnai_reviews",
        text_input: "review_body",
        label: "star_rating",
        num_labels: 5,
        label_offset: 0,
    },
    DatasetMetadata {
        name: "generated_reviews_enth",
        text_input: "translation.th",
        label: "review_star",
        num_labels: 5,
        label_offset: 1,
    },
];

impl DatasetMetadata {
    pub fn lookup(name: &str) -> Option<&'static DatasetMetadata> {
        DATASETS.iter().find(|meta| meta.name == name)
    }
}

/// Resolved hyperparameters of a fine-tuning run, including the values the
/// command line does not expose.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingArguments {
    pub output_dir: PathBuf,
    pub logging_dir: PathBuf,
    pub num_train_epochs: usize,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub learning_rate: f64,
    pub warmup_steps: usize,
    pub weight_decay: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
    pub max_grad_norm: f64,
    pub logging_first_step: bool,
    pub logging_steps: usize,
    pub evaluation_strategy: &'static str,
    pub eval_steps: usize,
    pub save_steps: usize,
    pub seed: u64,
    pub fp16: bool,
    pub dataloader_drop_last: bool,
    pub no_cuda: bool,
    pub metric_for_best_model: String,
    pub greater_is_better: bool,
}

impl TrainingArguments {
    pub fn from_args(args: &FinetuneArgs, num_train_examples: usize) -> Self {
        Self {
            output_dir: args.output_dir.clone(),
            logging_dir: args.log_dir.clone(),
            num_train_epochs: args.num_train_epochs,
            per_device_train_batch_size: args.batch_size,
            per_device_eval_batch_size: args.batch_size,
            gradient_accumulation_steps: 1,
            learning_rate: args.learning_rate,
            warmup_steps: warmup_steps(num_train_examples, args.batch_size, args.warmup_ratio),
            weight_decay: args.weight_decay,
            adam_beta1: ADAM_BETA1,
            adam_beta2: ADAM_BETA2,
            adam_epsilon: ADAM_EPSILON,
            max_grad_norm: MAX_GRAD_NORM,
            logging_first_step: true,
            logging_steps: args.logging_steps,
            evaluation_strategy: "steps",
            eval_steps: args.eval_steps,
            save_steps: args.save_steps,
            seed: args.seed,
            fp16: args.fp16,
            dataloader_drop_last: true,
            no_cuda: args.no_cuda,
            metric_for_best_model: args.metric_for_best_model.clone(),
            greater_is_better: args.greater_is_better,
        }
    }

    /// Key of the tracked metric in evaluation results (`eval_` prefixed).
    pub fn metric_key(&self) -> String {
        let metric = self.metric_for_best_model.trim();
        if metric.starts_with("eval_") {
            metric.to_string()
        } else {
            format!("eval_{metric}")
        }
    }
}

impl fmt::Display for TrainingArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// `ceil(num_examples / batch_size * warmup_ratio)`.
pub fn warmup_steps(num_examples: usize, batch_size: usize, warmup_ratio: f64) -> usize {
    if batch_size == 0 {
        return 0;
    }
    (num_examples as f64 / batch_size as f64 * warmup_ratio).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> FinetuneArgs {
        let mut argv = vec![
            "seq-cls-finetune",
            "model",
            "tok",
            "newmm",
            "wisesight_sentiment",
            "out",
            "logs",
        ];
        argv.extend_from_slice(extra);
        FinetuneArgs::parse_from(argv)
    }

    #[test]
    fn cli_defaults_match_reference_run() {
        let args = parse(&[]);
        assert_eq!(args.num_train_epochs, 1);
        assert_eq!(args.learning_rate, 1e-5);
        assert_eq!(args.weight_decay, 0.1);
        assert_eq!(args.warmup_ratio, 0.06);
        assert_eq!(args.batch_size, 16);
        assert_eq!(args.eval_steps, 250);
        assert_eq!(args.logging_steps, 10);
        assert_eq!(args.save_steps, 500);
        assert_eq!(args.seed, 2020);
        assert_eq!(args.metric_for_best_model, "eval_loss");
        assert_eq!(args.dataset_dir, PathBuf::from("datasets"));
        assert!(!args.no_cuda && !args.fp16 && !args.greater_is_better);
        args.validate().unwrap();
    }

    #[test]
    fn flags_use_underscored_names() {
        let args = parse(&["--batch_size", "8", "--no_cuda", "--metric_for_best_model", "f1_micro"]);
        assert_eq!(args.batch_size, 8);
        assert!(args.no_cuda);
        let training = TrainingArguments::from_args(&args, 100);
        assert_eq!(training.metric_key(), "eval_f1_micro");
    }

    #[test]
    fn warmup_rounds_up() {
        assert_eq!(warmup_steps(1000, 16, 0.06), 4);
        assert_eq!(warmup_steps(16, 16, 0.06), 1);
        assert_eq!(warmup_steps(0, 16, 0.06), 0);
        assert_eq!(warmup_steps(100, 16, 0.0), 0);
    }

    #[test]
    fn rejects_unknown_dataset_and_tokenizer() {
        let mut args = parse(&[]);
        args.dataset_name = "prachathai67k".into();
        args.tokenizer_type = "sefr".into();
        match args.validate() {
            Err(FinetuneError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(matches!(
            args.dataset_metadata(),
            Err(FinetuneError::UnsupportedDataset(_))
        ));
    }

    #[test]
    fn generated_reviews_labels_are_one_based() {
        let meta = DatasetMetadata::lookup("generated_reviews_enth").unwrap();
        assert_eq!(meta.text_input, "translation.th");
        assert_eq!(meta.label_offset, 1);
        assert_eq!(meta.num_labels, 5);
    }
}
