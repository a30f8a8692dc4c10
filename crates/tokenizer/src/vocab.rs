//! Frequency-based word-level vocabulary.
//!
//! Special tokens always take the lowest ids in their declared order and
//! never compete with content tokens for a place under the cutoff.

use crate::errors::{Error, Result};
use crate::segment::Segmenter;
use indicatif::{ProgressBar, ProgressStyle};
use serde::ser::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type FrequencyTable = HashMap<String, u64>;

/// Token to id mapping with dense ids `0..len`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vocab {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Vocab {
    pub fn from_tokens<I>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut vocab = Self::default();
        for token in tokens {
            if vocab.ids.contains_key(&token) {
                return Err(Error::Validation(format!(
                    "token '{token}' appears multiple times in vocabulary"
                )));
            }
            let id = u32::try_from(vocab.tokens.len())
                .map_err(|_| Error::Validation("vocabulary exceeds u32 ids".into()))?;
            vocab.ids.insert(token.clone(), id);
            vocab.tokens.push(token);
        }
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Tokens in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (token.as_str(), id as u32))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a `{token: id}` JSON object; ids must be unique and dense.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Artifact(format!(
                "vocab json not found at {}",
                path.display()
            )));
        }

        let reader = BufReader::new(File::open(path)?);
        let raw: HashMap<String, u32> = serde_json::from_reader(reader)?;
        Self::from_pairs(raw)
    }

    /// Rebuilds a vocabulary from `(token, id)` pairs in any order.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let pairs: Vec<(String, u32)> = pairs.into_iter().collect();
        let mut slots: Vec<Option<String>> = vec![None; pairs.len()];
        for (token, id) in pairs {
            let slot = slots.get_mut(id as usize).ok_or_else(|| {
                Error::Validation(format!(
                    "vocab id {id} for '{token}' is outside the dense range"
                ))
            })?;
            if slot.is_some() {
                return Err(Error::Validation(format!("vocab id {id} assigned twice")));
            }
            *slot = Some(token);
        }

        Self::from_tokens(slots.into_iter().flatten())
    }

    pub fn to_map(&self) -> HashMap<String, u32> {
        self.iter()
            .map(|(token, id)| (token.to_string(), id))
            .collect()
    }
}

impl Serialize for Vocab {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Cutoff applied to content tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabLimit {
    /// Keep the `n` most frequent content tokens.
    Size(usize),
    /// Keep content tokens seen at least this many times.
    MinFrequency(u64),
    Unbounded,
}

impl VocabLimit {
    pub fn from_options(vocab_size: Option<usize>, min_frequency: Option<u64>) -> Result<Self> {
        match (vocab_size, min_frequency) {
            (Some(_), Some(_)) => Err(Error::InvalidConfig(
                "use only vocab_min_freq or vocab_size",
            )),
            (Some(0), None) => Err(Error::InvalidConfig(
                "vocab_size must be greater than zero",
            )),
            (None, Some(0)) => Err(Error::InvalidConfig("min_frequency must be at least 1")),
            (Some(size), None) => Ok(VocabLimit::Size(size)),
            (None, Some(freq)) => Ok(VocabLimit::MinFrequency(freq)),
            (None, None) => Ok(VocabLimit::Unbounded),
        }
    }

    fn apply(&self, mut counted: Vec<(String, u64)>) -> Vec<(String, u64)> {
        counted.sort_by(|(a_tok, a_freq), (b_tok, b_freq)| {
            b_freq.cmp(a_freq).then_with(|| a_tok.cmp(b_tok))
        });
        match *self {
            VocabLimit::Size(size) => {
                counted.truncate(size);
                counted
            }
            VocabLimit::MinFrequency(min) => counted
                .into_iter()
                .filter(|(_, freq)| *freq >= min)
                .collect(),
            VocabLimit::Unbounded => counted,
        }
    }
}

/// Builds a word-level vocabulary by segmenting every line of the input
/// files and counting the pieces.
pub struct WordLevelTrainer {
    segmenter: Arc<dyn Segmenter>,
    input_files: Vec<PathBuf>,
    special_tokens: Vec<String>,
    limit: VocabLimit,
    progress: bool,
    vocab: Option<Vocab>,
    freq: Vec<(String, u64)>,
}

impl WordLevelTrainer {
    pub fn new(
        segmenter: Arc<dyn Segmenter>,
        input_files: Vec<PathBuf>,
        special_tokens: Vec<String>,
        limit: VocabLimit,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for token in &special_tokens {
            if !seen.insert(token) {
                return Err(Error::Validation(format!(
                    "special token '{token}' appears multiple times"
                )));
            }
        }

        Ok(Self {
            segmenter,
            input_files,
            special_tokens,
            limit,
            progress: false,
            vocab: None,
            freq: Vec::new(),
        })
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn limit(&self) -> VocabLimit {
        self.limit
    }

    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    pub fn vocab(&self) -> Option<&Vocab> {
        self.vocab.as_ref()
    }

    /// Final token list with observed counts, in id order.
    pub fn frequencies(&self) -> &[(String, u64)] {
        &self.freq
    }

    pub fn count_one(&self, path: &Path) -> Result<FrequencyTable> {
        let file = File::open(path).map_err(|err| {
            Error::Artifact(format!(
                "failed to open training input {}: {err}",
                path.display()
            ))
        })?;
        let total_bytes = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let bar = self.progress_bar(path, total_bytes);

        let mut counts = FrequencyTable::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if let Some(bar) = bar.as_ref() {
                bar.inc(read as u64);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            for piece in self.segmenter.segment(trimmed) {
                *counts.entry(piece.to_string()).or_insert(0) += 1;
            }
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        Ok(counts)
    }

    /// Counts every input file, applies the cutoff and assigns ids.
    pub fn count_all(&mut self) -> Result<&Vocab> {
        let mut total = FrequencyTable::new();
        for path in &self.input_files {
            for (token, count) in self.count_one(path)? {
                *total.entry(token).or_insert(0) += count;
            }
        }

        // Specials leave the table before the cutoff so they neither take a
        // content slot nor shift their own fixed ids.
        let mut special_freq = HashMap::new();
        for token in &self.special_tokens {
            if let Some(count) = total.remove(token) {
                special_freq.insert(token.as_str(), count);
            }
        }

        let retained = self.limit.apply(total.into_iter().collect());
        let mut freq: Vec<(String, u64)> = self
            .special_tokens
            .iter()
            .map(|token| {
                let count = special_freq.get(token.as_str()).copied().unwrap_or(0);
                (token.clone(), count)
            })
            .collect();
        freq.extend(retained);

        let vocab = Vocab::from_tokens(freq.iter().map(|(token, _)| token.clone()))?;
        self.freq = freq;
        Ok(self.vocab.insert(vocab))
    }

    pub fn save_vocab(&self, output_path: &Path) -> Result<()> {
        let vocab = self.vocab.as_ref().ok_or(Error::InvalidConfig(
            "vocabulary has not been built; call count_all first",
        ))?;
        vocab.save(output_path)
    }

    fn progress_bar(&self, path: &Path, total_bytes: u64) -> Option<ProgressBar> {
        if !self.progress {
            return None;
        }
        let bar = ProgressBar::new(total_bytes);
        if let Ok(style) =
            ProgressStyle::with_template("{msg} [{bar:40}] {percent:>3}% ({bytes}/{total_bytes})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(path.display().to_string());
        Some(bar)
    }
}
