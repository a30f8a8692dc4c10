use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use hex::encode as hex_encode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::TrainingArguments,
    errors::{FinetuneError, Result},
    metrics::MetricMap,
    model::{LoadedModel, CONFIG_FILENAME, WEIGHTS_FILENAME},
};

pub const CHECKPOINT_VERSION: u32 = 1;
pub const CHECKPOINT_PREFIX: &str = "checkpoint-";
const TRAINING_ARGS_FILENAME: &str = "training_args.json";
const TRAINER_STATE_FILENAME: &str = "trainer_state.json";
const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Progress of a run, persisted with every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TrainerState {
    pub global_step: usize,
    pub epoch: f64,
    pub max_steps: usize,
    pub best_metric: Option<f64>,
    pub best_model_checkpoint: Option<PathBuf>,
    /// Training and evaluation records, each carrying `step` and `epoch`.
    pub log_history: Vec<MetricMap>,
}

impl TrainerState {
    /// Records `value` when it beats the current best. Returns whether it did.
    pub fn update_best(&mut self, value: f64, greater_is_better: bool) -> bool {
        let improved = match self.best_metric {
            None => true,
            Some(best) if greater_is_better => value > best,
            Some(best) => value < best,
        };
        if improved {
            self.best_metric = Some(value);
        }
        improved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub version: u32,
    pub created_unix_timestamp: u64,
    pub args_sha256: String,
    pub global_step: usize,
    pub model: FileRecord,
    pub config: FileRecord,
    pub training_args: FileRecord,
    pub trainer_state: FileRecord,
}

pub struct SaveRequest<'a> {
    pub output_dir: &'a Path,
    pub model: &'a LoadedModel,
    pub args: &'a TrainingArguments,
    pub state: &'a TrainerState,
}

#[derive(Debug, Clone)]
pub struct CheckpointDescriptor {
    pub directory: PathBuf,
    pub manifest: CheckpointManifest,
}

pub fn checkpoint_dir(output_dir: &Path, step: usize) -> PathBuf {
    output_dir.join(format!("{CHECKPOINT_PREFIX}{step}"))
}

pub fn save_checkpoint(request: SaveRequest<'_>) -> Result<CheckpointDescriptor> {
    let step = request.state.global_step;
    let directory = checkpoint_dir(request.output_dir, step);
    if directory.exists() {
        fs::remove_dir_all(&directory).map_err(|err| {
            FinetuneError::runtime(format!(
                "failed to remove existing checkpoint directory {}: {err}",
                directory.display()
            ))
        })?;
    }
    fs::create_dir_all(&directory).map_err(|err| {
        FinetuneError::runtime(format!(
            "failed to create checkpoint directory {}: {err}",
            directory.display()
        ))
    })?;

    let model_path = directory.join(WEIGHTS_FILENAME);
    request.model.save_weights(&model_path)?;
    let model_record = file_record(&model_path)?;

    let config_path = directory.join(CONFIG_FILENAME);
    let config_json = request
        .model
        .config
        .to_json_with_labels(request.model.model.num_labels())?;
    fs::write(&config_path, config_json).map_err(|err| {
        FinetuneError::runtime(format!("failed to write {}: {err}", config_path.display()))
    })?;
    let config_record = file_record(&config_path)?;

    let args_path = directory.join(TRAINING_ARGS_FILENAME);
    write_json(&args_path, request.args)?;
    let args_record = file_record(&args_path)?;

    let state_path = directory.join(TRAINER_STATE_FILENAME);
    write_json(&state_path, request.state)?;
    let state_record = file_record(&state_path)?;

    let manifest = CheckpointManifest {
        version: CHECKPOINT_VERSION,
        created_unix_timestamp: unix_timestamp(),
        args_sha256: args_record.sha256.clone(),
        global_step: step,
        model: model_record,
        config: config_record,
        training_args: args_record,
        trainer_state: state_record,
    };
    write_json(&directory.join(MANIFEST_FILENAME), &manifest)?;

    Ok(CheckpointDescriptor {
        directory,
        manifest,
    })
}

/// Reads the manifest and checks every recorded file against its hash.
pub fn verify_checkpoint(directory: &Path) -> Result<CheckpointManifest> {
    let manifest_path = directory.join(MANIFEST_FILENAME);
    if !manifest_path.is_file() {
        return Err(FinetuneError::runtime(format!(
            "checkpoint manifest not found at {}",
            manifest_path.display()
        )));
    }
    let manifest: CheckpointManifest = read_json(&manifest_path)?;
    if manifest.version != CHECKPOINT_VERSION {
        return Err(FinetuneError::runtime(format!(
            "unsupported checkpoint version {} (expected {})",
            manifest.version, CHECKPOINT_VERSION
        )));
    }
    for record in [
        &manifest.model,
        &manifest.config,
        &manifest.training_args,
        &manifest.trainer_state,
    ] {
        validate_file(&directory.join(&record.filename), &record.sha256)?;
    }
    Ok(manifest)
}

pub fn load_trainer_state(directory: &Path) -> Result<TrainerState> {
    read_json(&directory.join(TRAINER_STATE_FILENAME))
}

/// Checkpoint directories under `output_dir`, ordered by step.
pub fn list_checkpoints(output_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut found = Vec::new();
    if !output_dir.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let step = name
            .to_str()
            .and_then(|name| name.strip_prefix(CHECKPOINT_PREFIX))
            .and_then(|step| step.parse::<usize>().ok());
        if let Some(step) = step {
            found.push((step, entry.path()));
        }
    }
    found.sort();
    Ok(found)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn file_record(path: &Path) -> Result<FileRecord> {
    let sha256 = sha256_file(path)?;
    let bytes = path
        .metadata()
        .map_err(|err| {
            FinetuneError::runtime(format!(
                "failed to stat checkpoint file {}: {err}",
                path.display()
            ))
        })?
        .len();
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            FinetuneError::runtime(format!(
                "checkpoint file name is not valid UTF-8: {}",
                path.display()
            ))
        })?
        .to_string();
    Ok(FileRecord {
        filename,
        sha256,
        bytes,
    })
}

fn validate_file(path: &Path, expected_sha: &str) -> Result<()> {
    if sha256_file(path)? != expected_sha {
        return Err(FinetuneError::runtime(format!(
            "checkpoint file {} failed checksum validation",
            path.display()
        )));
    }
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|err| {
        FinetuneError::runtime(format!("failed to open {}: {err}", path.display()))
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|err| {
            FinetuneError::runtime(format!("failed to read {}: {err}", path.display()))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex_encode(hasher.finalize()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut file = File::create(path).map_err(|err| {
        FinetuneError::runtime(format!("failed to create {}: {err}", path.display()))
    })?;
    let data = serde_json::to_vec_pretty(value)?;
    file.write_all(&data)
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|err| {
            FinetuneError::runtime(format!("failed to write {}: {err}", path.display()))
        })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|err| {
        FinetuneError::runtime(format!("failed to open {}: {err}", path.display()))
    })?;
    serde_json::from_reader(file).map_err(|err| {
        FinetuneError::runtime(format!("failed to parse JSON {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_metric_respects_direction() {
        let mut state = TrainerState::default();
        assert!(state.update_best(0.8, false));
        assert!(!state.update_best(0.9, false));
        assert!(state.update_best(0.5, false));
        assert_eq!(state.best_metric, Some(0.5));

        let mut state = TrainerState::default();
        assert!(state.update_best(0.5, true));
        assert!(state.update_best(0.9, true));
        assert!(!state.update_best(0.9, true));
    }

    #[test]
    fn lists_checkpoints_by_step() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["checkpoint-10", "checkpoint-2", "runs", "checkpoint-x"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("checkpoint-5"), b"not a dir").unwrap();

        let steps: Vec<usize> = list_checkpoints(dir.path())
            .unwrap()
            .into_iter()
            .map(|(step, _)| step)
            .collect();
        assert_eq!(steps, vec![2, 10]);
        assert_eq!(checkpoint_dir(dir.path(), 7), dir.path().join("checkpoint-7"));
    }

    #[test]
    fn detects_tampered_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json(&path, &TrainerState::default()).unwrap();
        let record = file_record(&path).unwrap();
        validate_file(&path, &record.sha256).unwrap();

        fs::write(&path, b"{}").unwrap();
        assert!(validate_file(&path, &record.sha256).is_err());
    }
}
