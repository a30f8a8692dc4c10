//! Thai tokenization on top of the `tokenizers` crate.
//!
//! Thai text has no spaces between words, so subword pipelines need an
//! explicit segmentation step. This crate provides:
//!
//! * [`segment`]: a dictionary-driven segmenter (`newmm` for words,
//!   `syllable` for syllables) that only breaks on Thai cluster boundaries;
//! * [`pretokenizer`]: an adapter exposing any [`Segmenter`] as a
//!   `tokenizers` pre-tokenizer, keeping offset alignment intact;
//! * [`vocab`]: a frequency-based word-level vocabulary builder whose
//!   special tokens always own the lowest ids;
//! * [`thai`]: the pretrained tokenizers used for fine-tuning (`spm`,
//!   `newmm`, `syllable`) behind the [`ThaiTokenizer`] trait.
//!
//! # Configuration
//!
//! Vocabulary builds are described by [`VocabConfig`], loadable from TOML
//! or JSON. Exactly one of `vocab_size` and `min_frequency` may be set;
//! with neither, every observed token is kept.

pub mod artifacts;
pub mod config;
pub mod errors;
pub mod pretokenizer;
pub mod segment;
pub mod special;
pub mod thai;
pub mod vocab;

use std::sync::Arc;

pub use artifacts::VocabManifest;
pub use config::VocabConfig;
pub use errors::{Error, Result};
pub use pretokenizer::SegmentingPreTokenizer;
pub use segment::{Dictionary, DictionarySegmenter, Segmenter, SegmenterKind};
pub use special::{SpecialTokenIds, SpecialTokens, SPACE_TOKEN};
pub use thai::{load_tokenizer, EncodedInput, ThaiTokenizer, TokenizerKind};
pub use vocab::{Vocab, VocabLimit, WordLevelTrainer};

/// Counts the configured inputs, writes the vocabulary to `cfg.output`
/// and, when requested, its manifest.
pub fn build_vocab(cfg: &VocabConfig) -> Result<WordLevelTrainer> {
    cfg.validate()?;
    let segmenter = Arc::new(cfg.build_segmenter()?);
    let mut trainer = WordLevelTrainer::new(
        segmenter,
        cfg.inputs.clone(),
        cfg.special_tokens.clone(),
        cfg.limit()?,
    )?
    .with_progress(cfg.progress);

    trainer.count_all()?;
    trainer.save_vocab(&cfg.output)?;

    if let Some(manifest_path) = cfg.manifest.as_ref() {
        let manifest = VocabManifest::for_build(cfg, &trainer)?;
        artifacts::write_manifest(manifest_path, &manifest)?;
    }

    Ok(trainer)
}
