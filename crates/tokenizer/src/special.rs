use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

/// Marker substituted for a literal space before segmentation.
pub const SPACE_TOKEN: &str = "<_>";
pub const SPIECE_UNDERLINE: &str = "\u{2581}";

pub const ADDITIONAL_SPECIAL_TOKENS: [&str; 7] =
    ["<s>", "<pad>", "</s>", "<unk>", "<mask>", SPACE_TOKEN, "\n"];

pub fn default_special_tokens() -> Vec<String> {
    ADDITIONAL_SPECIAL_TOKENS
        .iter()
        .map(|token| token.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub bos: String,
    pub eos: String,
    pub sep: String,
    pub cls: String,
    pub unk: String,
    pub pad: String,
    pub mask: String,
    pub additional: Vec<String>,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            bos: "<s>".into(),
            eos: "</s>".into(),
            sep: "</s>".into(),
            cls: "<s>".into(),
            unk: "<unk>".into(),
            pad: "<pad>".into(),
            mask: "<mask>".into(),
            additional: default_special_tokens(),
        }
    }
}

impl SpecialTokens {
    /// The SentencePiece model only reserves the space marker on top of
    /// the named tokens.
    pub fn sentencepiece() -> Self {
        Self {
            additional: vec![SPACE_TOKEN.to_string()],
            ..Self::default()
        }
    }

    pub fn resolve<F>(&self, lookup: F) -> Result<SpecialTokenIds>
    where
        F: Fn(&str) -> Option<u32>,
    {
        let require = |token: &str| {
            lookup(token).ok_or_else(|| {
                Error::Validation(format!(
                    "special token '{token}' is missing from the vocabulary"
                ))
            })
        };

        Ok(SpecialTokenIds {
            cls: require(&self.cls)?,
            sep: require(&self.sep)?,
            unk: require(&self.unk)?,
            pad: require(&self.pad)?,
            mask: lookup(&self.mask),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenIds {
    pub cls: u32,
    pub sep: u32,
    pub unk: u32,
    pub pad: u32,
    pub mask: Option<u32>,
}
