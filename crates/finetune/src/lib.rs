//! Sequence-classification fine-tuning of pretrained Thai encoders.
//!
//! [`run_finetune`] wires the pieces together: a [`ThaiTokenizer`] from
//! `thai-tokenizer`, a local dataset from [`data`], a BERT/RoBERTa encoder
//! with a classification head from [`model`], and the [`Trainer`] loop.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod trainer;

use thai_tokenizer::{load_tokenizer, ThaiTokenizer};

pub use checkpoint::{CheckpointManifest, TrainerState};
pub use config::{DatasetMetadata, FinetuneArgs, TrainingArguments};
pub use data::{Batch, Example, SequenceClassificationDataset};
pub use errors::{FinetuneError, Result};
pub use logging::{Logger, LoggingSettings};
pub use metrics::{classification_metrics, MetricMap};
pub use model::{
    load_sequence_classifier, EncoderConfig, LoadedModel, ModelConfig, SequenceClassifier,
};
pub use scheduler::{LRScheduler, LinearWarmupDecay};
pub use trainer::{select_device, select_dtype, TrainOutput, Trainer};

/// Outcome of [`run_finetune`].
#[derive(Debug, Clone)]
pub struct FinetuneReport {
    pub train: TrainOutput,
    pub state: TrainerState,
    pub test_metrics: MetricMap,
}

/// Fine-tunes `args.model_dir` on `args.dataset_name` and evaluates the
/// result on the test split. `should_stop` is polled before each step.
pub fn run_finetune<F>(args: &FinetuneArgs, should_stop: F) -> Result<FinetuneReport>
where
    F: FnMut() -> bool,
{
    args.validate()?;
    let meta = args.dataset_metadata()?;
    println!("[INFO] Dataset: {}\n", meta.name);

    let tokenizer: Box<dyn ThaiTokenizer> = load_tokenizer(args.tokenizer_kind()?, &args.tokenizer_dir)?;
    println!(
        "[INFO] Tokenizer: {} (vocab size = {})",
        tokenizer.kind(),
        tokenizer.vocab_size()
    );

    let splits = data::load_dataset(&args.dataset_dir, meta)?;

    let device = select_device(args.no_cuda);
    let dtype = select_dtype(args.fp16, &device);
    let loaded = load_sequence_classifier(&args.model_dir, meta.num_labels, dtype, &device, args.seed)?;
    for name in &loaded.initialized {
        println!("[INFO] Newly initialized weight: {name}");
    }
    let max_length = loaded.config.max_sequence_length();

    let encode = |examples: &[Example]| {
        SequenceClassificationDataset::from_examples(tokenizer.as_ref(), examples, max_length, true)
    };
    let train_dataset = encode(&splits.train)?;
    let validation_dataset = encode(&splits.validation)?;
    let test_dataset = encode(&splits.test)?;

    let training_args = TrainingArguments::from_args(args, train_dataset.len());
    println!("[INFO] Number of train examples = {}", train_dataset.len());
    println!(
        "[INFO] Number of validation examples = {}",
        validation_dataset.len()
    );
    println!(
        "[INFO] Number of batches per epoch (training set) = {}",
        train_dataset.len().div_ceil(args.batch_size)
    );
    println!(
        "[INFO] Number of batches per epoch (validation set) = {}",
        validation_dataset.len().div_ceil(args.batch_size)
    );
    println!("[INFO] Warmup steps = {}", training_args.warmup_steps);
    println!("[INFO] TrainingArguments:");
    println!("{training_args}");
    println!("\n");

    let logger = Logger::new(LoggingSettings::new(
        true,
        Some(args.log_dir.clone()),
        training_args.logging_steps,
    ))?;
    let mut trainer = Trainer::new(
        training_args,
        device,
        loaded,
        train_dataset,
        validation_dataset,
        logger,
    )?;

    println!("\nBegin model finetuning.");
    let train = trainer.train_with_shutdown(should_stop)?;
    if train.interrupted {
        println!("Interrupted at step {}.", train.global_step);
    }
    println!("Done.\n");

    println!("\nBegin model evaluation on test set.");
    let mut test_metrics = trainer.evaluate(&test_dataset)?;
    test_metrics.insert("epoch".into(), trainer.state().epoch);
    println!("Evaluation on test set (dataset: {})", meta.name);
    for (key, value) in &test_metrics {
        println!("{key} : {value:.4}");
    }
    println!("Done.\n");

    Ok(FinetuneReport {
        train,
        state: trainer.state().clone(),
        test_metrics,
    })
}

