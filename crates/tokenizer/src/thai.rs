//! Pretrained Thai tokenizers.
//!
//! Two families share the [`ThaiTokenizer`] interface: word-level
//! tokenizers that segment with a dictionary before a `WordLevel` lookup
//! (`newmm`, `syllable`) and a SentencePiece model stored in the
//! `tokenizers` JSON format (`spm`). Both wrap sequences as
//! `<s> A </s>` / `<s> A </s></s> B </s>` and never use token type ids.

use crate::errors::{Error, Result};
use crate::pretokenizer::SegmentingPreTokenizer;
use crate::segment::{Dictionary, DictionarySegmenter, SegmenterKind};
use crate::special::{SpecialTokenIds, SpecialTokens, SPACE_TOKEN, SPIECE_UNDERLINE};
use crate::vocab::Vocab;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokenizers::decoders::DecoderWrapper;
use tokenizers::models::wordlevel::WordLevel;
use tokenizers::normalizers::NormalizerWrapper;
use tokenizers::processors::PostProcessorWrapper;
use tokenizers::{Tokenizer, TokenizerImpl};

pub const DICTIONARY_FILE: &str = "dictionary.txt";
pub const SENTENCEPIECE_FILE: &str = "tokenizer.json";

type WordLevelPipeline = TokenizerImpl<
    WordLevel,
    NormalizerWrapper,
    SegmentingPreTokenizer,
    PostProcessorWrapper,
    DecoderWrapper,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    Spm,
    Newmm,
    Syllable,
}

impl TokenizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerKind::Spm => "spm",
            TokenizerKind::Newmm => "newmm",
            TokenizerKind::Syllable => "syllable",
        }
    }

    /// Name of the vocabulary file expected inside a tokenizer directory.
    pub fn vocab_file_name(&self) -> &'static str {
        match self {
            TokenizerKind::Spm => SENTENCEPIECE_FILE,
            TokenizerKind::Newmm => "newmm.json",
            TokenizerKind::Syllable => "syllable.json",
        }
    }

    pub fn segmenter_kind(&self) -> Option<SegmenterKind> {
        match self {
            TokenizerKind::Spm => None,
            TokenizerKind::Newmm => Some(SegmenterKind::Newmm),
            TokenizerKind::Syllable => Some(SegmenterKind::Syllable),
        }
    }
}

impl From<SegmenterKind> for TokenizerKind {
    fn from(kind: SegmenterKind) -> Self {
        match kind {
            SegmenterKind::Newmm => TokenizerKind::Newmm,
            SegmenterKind::Syllable => TokenizerKind::Syllable,
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "spm" => Ok(TokenizerKind::Spm),
            "newmm" => Ok(TokenizerKind::Newmm),
            "syllable" => Ok(TokenizerKind::Syllable),
            other => Err(Error::UnsupportedTokenizer(other.to_string())),
        }
    }
}

/// Model inputs for a single sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedInput {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl EncodedInput {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

pub trait ThaiTokenizer: Send + Sync {
    fn kind(&self) -> TokenizerKind;

    /// Splits already prepared text into tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;

    fn vocab(&self) -> &Vocab;

    fn special_tokens(&self) -> &SpecialTokens;

    fn special_ids(&self) -> SpecialTokenIds;

    fn vocab_file(&self) -> &Path;

    fn convert_tokens_to_string(&self, tokens: &[String]) -> String;

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab().id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.vocab().token(id).map(str::to_string)
    }

    fn vocab_size(&self) -> usize {
        self.vocab().len()
    }

    fn get_vocab(&self) -> HashMap<String, u32> {
        self.vocab().to_map()
    }

    /// Unknown tokens map to the unk id.
    fn convert_token_to_id(&self, token: &str) -> u32 {
        self.token_to_id(token).unwrap_or(self.special_ids().unk)
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32> {
        tokens
            .iter()
            .map(|token| self.convert_token_to_id(token))
            .collect()
    }

    fn prepare_for_tokenization(&self, text: &str) -> String {
        text.replace(' ', SPACE_TOKEN)
    }

    fn build_inputs_with_special_tokens(&self, ids_0: &[u32], ids_1: Option<&[u32]>) -> Vec<u32> {
        let SpecialTokenIds { cls, sep, .. } = self.special_ids();
        let mut out = Vec::with_capacity(ids_0.len() + ids_1.map_or(0, <[u32]>::len) + 4);
        out.push(cls);
        out.extend_from_slice(ids_0);
        out.push(sep);
        if let Some(ids_1) = ids_1 {
            out.push(sep);
            out.extend_from_slice(ids_1);
            out.push(sep);
        }
        out
    }

    fn get_special_tokens_mask(
        &self,
        ids_0: &[u32],
        ids_1: Option<&[u32]>,
        already_has_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        if already_has_special_tokens {
            if ids_1.is_some() {
                return Err(Error::Validation(
                    "a second sequence cannot be supplied when the ids already contain special tokens"
                        .into(),
                ));
            }
            let SpecialTokenIds { cls, sep, .. } = self.special_ids();
            return Ok(ids_0
                .iter()
                .map(|&id| u32::from(id == cls || id == sep))
                .collect());
        }

        let mut mask = Vec::with_capacity(ids_0.len() + ids_1.map_or(0, <[u32]>::len) + 4);
        mask.push(1);
        mask.extend(std::iter::repeat(0).take(ids_0.len()));
        mask.push(1);
        if let Some(ids_1) = ids_1 {
            mask.push(1);
            mask.extend(std::iter::repeat(0).take(ids_1.len()));
            mask.push(1);
        }
        Ok(mask)
    }

    fn create_token_type_ids_from_sequences(&self, ids_0: &[u32], ids_1: Option<&[u32]>) -> Vec<u32> {
        let len = match ids_1 {
            Some(ids_1) => ids_0.len() + ids_1.len() + 4,
            None => ids_0.len() + 2,
        };
        vec![0; len]
    }

    /// Copies the vocabulary file into `dir` and returns the written path.
    fn save_vocabulary(&self, dir: &Path, prefix: Option<&str>) -> Result<PathBuf> {
        if !dir.is_dir() {
            return Err(Error::Artifact(format!(
                "vocabulary path ({}) should be a directory",
                dir.display()
            )));
        }

        let source = self.vocab_file();
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.kind().vocab_file_name().to_string());
        let file_name = match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}-{file_name}"),
            _ => file_name,
        };
        let target = dir.join(file_name);

        let same_file = match (fs::canonicalize(source), fs::canonicalize(&target)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            fs::copy(source, &target)?;
        }
        Ok(target)
    }

    /// Tokenizes a single text into model inputs no longer than
    /// `max_length`, special tokens included.
    fn encode(&self, text: &str, max_length: usize, prepare: bool) -> Result<EncodedInput> {
        if max_length < 2 {
            return Err(Error::Validation(format!(
                "max_length {max_length} leaves no room for special tokens"
            )));
        }

        let prepared;
        let text = if prepare {
            prepared = self.prepare_for_tokenization(text);
            prepared.as_str()
        } else {
            text
        };

        let tokens = self.tokenize(text)?;
        let mut ids = self.convert_tokens_to_ids(&tokens);
        ids.truncate(max_length - 2);

        let input_ids = self.build_inputs_with_special_tokens(&ids, None);
        let token_type_ids = self.create_token_type_ids_from_sequences(&ids, None);
        let attention_mask = vec![1; input_ids.len()];
        Ok(EncodedInput {
            input_ids,
            attention_mask,
            token_type_ids,
        })
    }
}

/// Dictionary segmentation followed by a word-level vocabulary lookup.
pub struct WordTokenizer {
    kind: TokenizerKind,
    pipeline: WordLevelPipeline,
    vocab: Vocab,
    vocab_file: PathBuf,
    special_tokens: SpecialTokens,
    special_ids: SpecialTokenIds,
}

impl WordTokenizer {
    /// Loads `<dir>/newmm.json` or `<dir>/syllable.json`. The segmentation
    /// dictionary is `<dir>/dictionary.txt` when present, otherwise the
    /// vocabulary itself.
    pub fn from_dir(kind: SegmenterKind, dir: &Path) -> Result<Self> {
        let vocab_file = dir.join(TokenizerKind::from(kind).vocab_file_name());
        let dictionary_file = dir.join(DICTIONARY_FILE);
        let dictionary_file = dictionary_file.is_file().then_some(dictionary_file);
        Self::from_files(kind, &vocab_file, dictionary_file.as_deref())
    }

    pub fn from_files(kind: SegmenterKind, vocab_file: &Path, dictionary: Option<&Path>) -> Result<Self> {
        let vocab = Vocab::load(vocab_file)?;
        let dictionary = match dictionary {
            Some(path) => Dictionary::from_file(path)?,
            None => Dictionary::from_words(vocab.iter().map(|(token, _)| token)),
        };

        let special_tokens = SpecialTokens::default();
        let special_ids = special_tokens.resolve(|token| vocab.id(token))?;

        let vocab_str = vocab_file.to_str().ok_or_else(|| {
            Error::Artifact(format!("path is not valid UTF-8: {}", vocab_file.display()))
        })?;
        let model = WordLevel::from_file(vocab_str, special_tokens.unk.clone())?;
        let segmenter = Arc::new(DictionarySegmenter::new(kind, dictionary));
        let mut pipeline = WordLevelPipeline::new(model);
        pipeline.with_pre_tokenizer(Some(SegmentingPreTokenizer::new(segmenter)));

        Ok(Self {
            kind: kind.into(),
            pipeline,
            vocab,
            vocab_file: vocab_file.to_path_buf(),
            special_tokens,
            special_ids,
        })
    }
}

impl ThaiTokenizer for WordTokenizer {
    fn kind(&self) -> TokenizerKind {
        self.kind
    }

    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self.pipeline.encode(text, false)?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    fn special_ids(&self) -> SpecialTokenIds {
        self.special_ids
    }

    fn vocab_file(&self) -> &Path {
        &self.vocab_file
    }

    fn convert_tokens_to_string(&self, tokens: &[String]) -> String {
        tokens.concat().trim().to_string()
    }
}

/// SentencePiece model loaded from a serialized `tokenizers` pipeline.
pub struct SentencePieceTokenizer {
    tokenizer: Tokenizer,
    vocab: Vocab,
    vocab_file: PathBuf,
    special_tokens: SpecialTokens,
    special_ids: SpecialTokenIds,
}

impl SentencePieceTokenizer {
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join(SENTENCEPIECE_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Artifact(format!(
                "tokenizer json not found at {}",
                path.display()
            )));
        }

        let tokenizer = Tokenizer::from_file(path)?;
        let vocab = Vocab::from_pairs(tokenizer.get_vocab(true))?;
        let special_tokens = SpecialTokens::sentencepiece();
        let special_ids = special_tokens.resolve(|token| vocab.id(token))?;

        Ok(Self {
            tokenizer,
            vocab,
            vocab_file: path.to_path_buf(),
            special_tokens,
            special_ids,
        })
    }
}

impl ThaiTokenizer for SentencePieceTokenizer {
    fn kind(&self) -> TokenizerKind {
        TokenizerKind::Spm
    }

    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self.tokenizer.encode(text, false)?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    fn special_ids(&self) -> SpecialTokenIds {
        self.special_ids
    }

    fn vocab_file(&self) -> &Path {
        &self.vocab_file
    }

    fn convert_tokens_to_string(&self, tokens: &[String]) -> String {
        tokens
            .concat()
            .replace(SPIECE_UNDERLINE, "\n")
            .trim()
            .to_string()
    }
}

pub fn load_tokenizer(kind: TokenizerKind, dir: &Path) -> Result<Box<dyn ThaiTokenizer>> {
    if !dir.is_dir() {
        return Err(Error::Artifact(format!(
            "tokenizer directory not found at {}",
            dir.display()
        )));
    }

    let tokenizer: Box<dyn ThaiTokenizer> = match kind.segmenter_kind() {
        None => Box::new(SentencePieceTokenizer::from_dir(dir)?),
        Some(segmenter) => Box::new(WordTokenizer::from_dir(segmenter, dir)?),
    };
    Ok(tokenizer)
}
