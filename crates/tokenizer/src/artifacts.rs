use crate::config::VocabConfig;
use crate::errors::{Error, Result};
use crate::vocab::WordLevelTrainer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const MANIFEST_ERR: &str = "manifest not found at";

/// Provenance record written next to a built vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabManifest {
    pub cfg_hash: String,
    pub created_at: String,
    pub token_count: usize,
    pub special_token_count: usize,
}

impl VocabManifest {
    /// Describes the vocabulary `trainer` wrote to `cfg.output`.
    pub fn for_build(cfg: &VocabConfig, trainer: &WordLevelTrainer) -> Result<Self> {
        let vocab = trainer.vocab().ok_or(Error::InvalidConfig(
            "vocabulary has not been built; call count_all first",
        ))?;
        Ok(Self {
            cfg_hash: compute_config_hash(cfg, &[cfg.output.as_path()])?,
            created_at: unix_timestamp()?,
            token_count: vocab.len(),
            special_token_count: trainer.special_tokens().len(),
        })
    }
}

pub fn write_manifest(manifest_path: &Path, manifest: &VocabManifest) -> Result<()> {
    if let Some(parent) = manifest_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(manifest_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, manifest)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_manifest(manifest_path: &Path) -> Result<VocabManifest> {
    ensure_file(manifest_path, MANIFEST_ERR)?;
    let file = File::open(manifest_path)?;
    let manifest = serde_json::from_reader(BufReader::new(file))?;
    Ok(manifest)
}

/// SHA-256 over the serialized config followed by each file's path and
/// contents, files taken in path order.
pub fn compute_config_hash(cfg: &VocabConfig, extra_paths: &[&Path]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(cfg)?);

    let mut sorted = extra_paths.to_vec();
    sorted.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    let mut buffer = [0u8; 8 * 1024];
    for path in sorted {
        ensure_file(path, "cannot hash missing file at")?;
        hasher.update(path.to_string_lossy().as_bytes());

        let mut reader = BufReader::new(File::open(path)?);
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_timestamp() -> Result<String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| Error::Artifact(format!("system clock before unix epoch: {err}")))?
        .as_secs();
    Ok(format!("unix:{secs}"))
}

fn ensure_file(path: &Path, context: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Artifact(format!("{context} {}", path.display())))
    }
}
