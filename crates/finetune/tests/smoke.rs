use std::{fs, path::Path, sync::Arc};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::xlm_roberta::{Config as RobertaConfig, XLMRobertaModel};
use clap::Parser;
use finetune::{
    checkpoint::{self, list_checkpoints, load_trainer_state, verify_checkpoint},
    load_sequence_classifier, run_finetune, FinetuneArgs, FinetuneError,
};
use serde_json::Value;
use tempfile::tempdir;
use thai_tokenizer::{
    special::default_special_tokens, Dictionary, DictionarySegmenter, SegmenterKind, VocabLimit,
    WordLevelTrainer,
};

const WORDS: [&str; 6] = ["ดี", "มาก", "แย่", "อาหาร", "ร้าน", "ไม่"];

const TINY_CONFIG: &str = r#"{
    "model_type": "roberta",
    "vocab_size": 32,
    "hidden_size": 16,
    "num_hidden_layers": 1,
    "num_attention_heads": 2,
    "intermediate_size": 32,
    "hidden_act": "gelu",
    "hidden_dropout_prob": 0.1,
    "attention_probs_dropout_prob": 0.1,
    "position_embedding_type": "absolute",
    "max_position_embeddings": 34,
    "type_vocab_size": 1,
    "initializer_range": 0.02,
    "layer_norm_eps": 1e-5,
    "pad_token_id": 1
}"#;

fn write_model(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("config.json"), TINY_CONFIG).unwrap();

    let config: RobertaConfig = serde_json::from_str(TINY_CONFIG).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    XLMRobertaModel::new(&config, vb.pp("roberta")).expect("build encoder");
    varmap.save(dir.join("model.safetensors")).unwrap();
}

fn write_tokenizer(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let corpus = dir.join("corpus.txt");
    fs::write(&corpus, "ร้านอาหารดีมาก\nอาหารไม่ดี\nร้านแย่มาก\n").unwrap();
    fs::write(dir.join("dictionary.txt"), WORDS.join("\n")).unwrap();

    let segmenter = DictionarySegmenter::new(SegmenterKind::Newmm, Dictionary::from_words(WORDS));
    let mut trainer = WordLevelTrainer::new(
        Arc::new(segmenter),
        vec![corpus],
        default_special_tokens(),
        VocabLimit::Unbounded,
    )
    .unwrap();
    trainer.count_all().unwrap();
    trainer.save_vocab(&dir.join("newmm.json")).unwrap();
}

fn write_dataset(root: &Path) {
    let dir = root.join("wisesight_sentiment");
    fs::create_dir_all(&dir).unwrap();
    let texts = ["ร้านอาหารดีมาก", "อาหารไม่ดี", "ร้านแย่มาก", "ดี ดี", "แย่", "มาก"];
    let lines = |count: usize| {
        (0..count)
            .map(|i| {
                serde_json::json!({"texts": texts[i % texts.len()], "category": i % 4}).to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    fs::write(dir.join("train.jsonl"), lines(8)).unwrap();
    fs::write(dir.join("validation.jsonl"), lines(5)).unwrap();
    fs::write(dir.join("test.jsonl"), lines(6)).unwrap();
}

struct Fixture {
    _tmp: tempfile::TempDir,
    args: FinetuneArgs,
}

fn fixture(extra: &[&str]) -> Fixture {
    let tmp = tempdir().expect("tempdir");
    let base = tmp.path();
    write_model(&base.join("model"));
    write_tokenizer(&base.join("tokenizer"));
    write_dataset(&base.join("datasets"));

    let path = |name: &str| base.join(name).to_string_lossy().into_owned();
    let (model, tokenizer, output, logs, datasets) = (
        path("model"),
        path("tokenizer"),
        path("output"),
        path("logs"),
        path("datasets"),
    );
    let mut argv = vec![
        "seq-cls-finetune",
        model.as_str(),
        tokenizer.as_str(),
        "newmm",
        "wisesight_sentiment",
        output.as_str(),
        logs.as_str(),
        "--dataset_dir",
        datasets.as_str(),
        "--no_cuda",
        "--batch_size",
        "4",
        "--learning_rate",
        "1e-3",
    ];
    argv.extend_from_slice(extra);
    let args = FinetuneArgs::parse_from(argv);
    Fixture { _tmp: tmp, args }
}

#[test]
fn smoke_finetune_checkpoints_and_evaluates() {
    let fixture = fixture(&[
        "--num_train_epochs",
        "2",
        "--logging_steps",
        "1",
        "--eval_steps",
        "2",
        "--save_steps",
        "2",
        "--metric_for_best_model",
        "f1_micro",
        "--greater_is_better",
    ]);
    let args = &fixture.args;

    let report = run_finetune(args, || false).expect("fine-tuning run");
    assert_eq!(report.train.global_step, 4);
    assert!(!report.train.interrupted);
    assert!(report.train.training_loss.is_finite());

    for key in [
        "eval_loss",
        "eval_accuracy",
        "eval_f1_micro",
        "eval_f1_macro",
        "eval_precision_micro",
        "eval_recall_macro",
    ] {
        let value = report.test_metrics[key];
        assert!(value.is_finite(), "{key} = {value}");
    }
    assert_eq!(report.test_metrics["eval_nb_samples"], 6.0);
    assert_eq!(report.test_metrics["epoch"], 2.0);

    let steps: Vec<usize> = list_checkpoints(&args.output_dir)
        .unwrap()
        .into_iter()
        .map(|(step, _)| step)
        .collect();
    assert_eq!(steps, vec![2, 4]);

    let last = checkpoint::checkpoint_dir(&args.output_dir, 4);
    let manifest = verify_checkpoint(&last).expect("checkpoint hashes");
    assert_eq!(manifest.global_step, 4);

    let state = load_trainer_state(&last).unwrap();
    assert_eq!(state.global_step, 4);
    assert_eq!(state.max_steps, 4);
    assert!(state.best_metric.is_some());
    assert!(state.best_model_checkpoint.is_some());
    let train_logs = state
        .log_history
        .iter()
        .filter(|entry| entry.contains_key("loss"))
        .count();
    let eval_logs = state
        .log_history
        .iter()
        .filter(|entry| entry.contains_key("eval_loss"))
        .count();
    assert_eq!((train_logs, eval_logs), (4, 2));

    let config: Value =
        serde_json::from_str(&fs::read_to_string(last.join("config.json")).unwrap()).unwrap();
    assert_eq!(config["num_labels"], 4);

    let reloaded = load_sequence_classifier(&last, 4, DType::F32, &Device::Cpu, 0).unwrap();
    assert!(reloaded.initialized.is_empty());

    let events = fs::read_dir(&args.log_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("events.out.tfevents.")
        })
        .count();
    assert_eq!(events, 1);
}

#[test]
fn fresh_head_is_initialized_and_reported() {
    let fixture = fixture(&[]);
    let loaded =
        load_sequence_classifier(&fixture.args.model_dir, 4, DType::F32, &Device::Cpu, 7).unwrap();
    assert_eq!(
        loaded.initialized,
        vec![
            "classifier.dense.bias",
            "classifier.dense.weight",
            "classifier.out_proj.bias",
            "classifier.out_proj.weight",
        ]
    );
    assert_eq!(loaded.config.max_sequence_length(), 32);
}

#[test]
fn shutdown_stops_after_current_step() {
    let fixture = fixture(&["--num_train_epochs", "3", "--save_steps", "100"]);
    let mut polls = 0;
    let report = run_finetune(&fixture.args, || {
        polls += 1;
        polls > 1
    })
    .expect("interrupted run");

    assert!(report.train.interrupted);
    assert_eq!(report.train.global_step, 1);
    assert!(list_checkpoints(&fixture.args.output_dir).unwrap().is_empty());
}

#[test]
fn rejects_unknown_dataset() {
    let mut fixture = fixture(&[]);
    fixture.args.dataset_name = "prachathai67k".into();
    match run_finetune(&fixture.args, || false) {
        Err(FinetuneError::Validation(errors)) => {
            assert!(errors.iter().any(|err| err.contains("prachathai67k")))
        }
        other => panic!("expected validation error, got {:?}", other.map(|r| r.train)),
    }
}
