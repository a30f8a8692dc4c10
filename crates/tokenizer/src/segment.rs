//! Dictionary-driven Thai segmentation.
//!
//! Thai is written without spaces between words, so boundaries are
//! recovered by matching a dictionary against the text. The segmenter
//! prefers segmentations that leave the fewest characters outside of
//! dictionary words and, among those, the fewest pieces (maximal
//! matching). Breaks are only placed on Thai cluster boundaries so that
//! vowels and tone marks stay attached to their consonant.

use crate::errors::{Error, Result};
use crate::special::ADDITIONAL_SPECIAL_TOKENS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Splits text into contiguous, non-empty pieces that concatenate back
/// to the input.
pub trait Segmenter: Send + Sync {
    fn segment<'t>(&self, text: &'t str) -> Vec<&'t str>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmenterKind {
    Newmm,
    Syllable,
}

impl SegmenterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmenterKind::Newmm => "newmm",
            SegmenterKind::Syllable => "syllable",
        }
    }
}

impl Default for SegmenterKind {
    fn default() -> Self {
        SegmenterKind::Newmm
    }
}

impl fmt::Display for SegmenterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmenterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newmm" => Ok(SegmenterKind::Newmm),
            "syllable" => Ok(SegmenterKind::Syllable),
            other => Err(Error::UnsupportedSegmenter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<char, usize>,
    terminal: bool,
}

/// Word list stored as a character trie.
///
/// Every dictionary also contains the additional special tokens so that
/// markers such as `<_>` survive segmentation as single pieces.
#[derive(Debug, Clone)]
pub struct Dictionary {
    nodes: Vec<TrieNode>,
    len: usize,
}

impl Default for Dictionary {
    fn default() -> Self {
        let mut dictionary = Self {
            nodes: vec![TrieNode::default()],
            len: 0,
        };
        for token in ADDITIONAL_SPECIAL_TOKENS {
            dictionary.insert(token);
        }
        dictionary
    }
}

impl Dictionary {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dictionary = Self::default();
        for word in words {
            dictionary.insert(word.as_ref());
        }
        dictionary
    }

    /// Reads one word per line; surrounding whitespace and blank lines are
    /// ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Artifact(format!(
                "dictionary not found at {}",
                path.display()
            )));
        }

        let reader = BufReader::new(File::open(path)?);
        let mut dictionary = Self::default();
        for line in reader.lines() {
            let line = line?;
            let word = line.trim();
            if !word.is_empty() {
                dictionary.insert(word);
            }
        }
        Ok(dictionary)
    }

    /// Returns `true` when the word was not present yet.
    pub fn insert(&mut self, word: &str) -> bool {
        if word.is_empty() {
            return false;
        }

        let mut node = 0;
        for ch in word.chars() {
            node = match self.nodes[node].children.get(&ch) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(ch, next);
                    next
                }
            };
        }

        let inserted = !self.nodes[node].terminal;
        self.nodes[node].terminal = true;
        if inserted {
            self.len += 1;
        }
        inserted
    }

    pub fn contains(&self, word: &str) -> bool {
        let mut node = 0;
        for ch in word.chars() {
            match self.nodes[node].children.get(&ch) {
                Some(&next) => node = next,
                None => return false,
            }
        }
        !word.is_empty() && self.nodes[node].terminal
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte lengths of every dictionary word that is a prefix of `text`,
    /// shortest first.
    pub fn prefix_ends(&self, text: &str) -> Vec<usize> {
        let mut ends = Vec::new();
        let mut node = 0;
        for (offset, ch) in text.char_indices() {
            match self.nodes[node].children.get(&ch) {
                Some(&next) => node = next,
                None => break,
            }
            if self.nodes[node].terminal {
                ends.push(offset + ch.len_utf8());
            }
        }
        ends
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceKind {
    Known,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    unknown_chars: usize,
    pieces: usize,
    prev: usize,
    kind: PieceKind,
}

impl Step {
    fn cost(&self) -> (usize, usize) {
        (self.unknown_chars, self.pieces)
    }
}

/// Maximal-matching segmenter backed by a [`Dictionary`].
#[derive(Debug, Clone)]
pub struct DictionarySegmenter {
    kind: SegmenterKind,
    dictionary: Dictionary,
}

impl DictionarySegmenter {
    pub fn new(kind: SegmenterKind, dictionary: Dictionary) -> Self {
        Self { kind, dictionary }
    }

    pub fn kind(&self) -> SegmenterKind {
        self.kind
    }

    fn relax(
        best: &mut [Option<Step>],
        from: usize,
        to: usize,
        base: Step,
        unknown_chars: usize,
        kind: PieceKind,
    ) {
        let candidate = Step {
            unknown_chars: base.unknown_chars + unknown_chars,
            pieces: base.pieces + 1,
            prev: from,
            kind,
        };
        match best[to] {
            Some(existing) if existing.cost() <= candidate.cost() => {}
            _ => best[to] = Some(candidate),
        }
    }
}

impl Segmenter for DictionarySegmenter {
    fn segment<'t>(&self, text: &'t str) -> Vec<&'t str> {
        if text.is_empty() {
            return Vec::new();
        }

        let len = text.len();
        let mut best: Vec<Option<Step>> = vec![None; len + 1];
        best[0] = Some(Step {
            unknown_chars: 0,
            pieces: 0,
            prev: 0,
            kind: PieceKind::Known,
        });

        for (start, _) in text.char_indices() {
            let Some(current) = best[start] else {
                continue;
            };
            let rest = &text[start..];

            for end in self.dictionary.prefix_ends(rest) {
                let end = start + end;
                if is_cluster_boundary(text, end) {
                    Self::relax(&mut best, start, end, current, 0, PieceKind::Known);
                }
            }

            let run = non_thai_run_len(rest);
            if run > 0 {
                Self::relax(&mut best, start, start + run, current, 0, PieceKind::Known);
            } else {
                let end = next_cluster_boundary(text, start);
                let chars = text[start..end].chars().count();
                Self::relax(&mut best, start, end, current, chars, PieceKind::Unknown);
            }
        }

        let mut cuts = Vec::new();
        let mut pos = len;
        while pos > 0 {
            let Some(step) = best[pos] else {
                return vec![text];
            };
            cuts.push((step.prev, pos, step.kind));
            pos = step.prev;
        }
        cuts.reverse();

        let mut merged: Vec<(usize, usize, PieceKind)> = Vec::with_capacity(cuts.len());
        for (start, end, kind) in cuts {
            match merged.last_mut() {
                Some(last) if kind == PieceKind::Unknown && last.2 == PieceKind::Unknown => {
                    last.1 = end;
                }
                _ => merged.push((start, end, kind)),
            }
        }

        merged
            .into_iter()
            .map(|(start, end, _)| &text[start..end])
            .collect()
    }

    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

pub fn is_thai(ch: char) -> bool {
    ('\u{0E00}'..='\u{0E7F}').contains(&ch)
}

/// Vowels and marks that attach to the preceding consonant.
fn is_following_mark(ch: char) -> bool {
    matches!(ch, '\u{0E30}'..='\u{0E3A}' | '\u{0E45}' | '\u{0E47}'..='\u{0E4E}')
}

/// Vowels written before the consonant they belong to.
fn is_leading_vowel(ch: char) -> bool {
    ('\u{0E40}'..='\u{0E44}').contains(&ch)
}

/// Whether a piece may start at byte offset `pos` of `text`.
pub fn is_cluster_boundary(text: &str, pos: usize) -> bool {
    if pos == 0 || pos >= text.len() {
        return true;
    }
    if !text.is_char_boundary(pos) {
        return false;
    }

    let (Some(prev), Some(next)) = (text[..pos].chars().next_back(), text[pos..].chars().next())
    else {
        return true;
    };

    if !is_thai(prev) || !is_thai(next) {
        return true;
    }
    !is_following_mark(next) && !is_leading_vowel(prev)
}

fn next_cluster_boundary(text: &str, start: usize) -> usize {
    let mut chars = text[start..].char_indices();
    chars.next();
    for (offset, _) in chars {
        let pos = start + offset;
        if is_cluster_boundary(text, pos) {
            return pos;
        }
    }
    text.len()
}

/// Byte length of the non-Thai piece starting `text`, or zero when
/// `text` starts with a Thai character.
fn non_thai_run_len(text: &str) -> usize {
    let Some(first) = text.chars().next() else {
        return 0;
    };
    if is_thai(first) {
        return 0;
    }

    let belongs: fn(char) -> bool = if first.is_whitespace() {
        |ch| ch.is_whitespace()
    } else if first.is_alphanumeric() {
        |ch| ch.is_alphanumeric() && !is_thai(ch)
    } else {
        return first.len_utf8();
    };

    text.char_indices()
        .find(|&(_, ch)| !belongs(ch))
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(words: &[&str]) -> DictionarySegmenter {
        DictionarySegmenter::new(SegmenterKind::Newmm, Dictionary::from_words(words))
    }

    #[test]
    fn splits_on_dictionary_words() {
        let seg = segmenter(&["ฉัน", "กิน", "ข้าว"]);
        assert_eq!(seg.segment("ฉันกินข้าว"), vec!["ฉัน", "กิน", "ข้าว"]);
    }

    #[test]
    fn prefers_fewer_pieces() {
        let seg = segmenter(&["ฉัน", "กิน", "ข้าว", "กินข้าว"]);
        assert_eq!(seg.segment("ฉันกินข้าว"), vec!["ฉัน", "กินข้าว"]);
    }

    #[test]
    fn groups_non_thai_runs() {
        let seg = segmenter(&["ฉัน", "กิน", "ข้าว"]);
        assert_eq!(
            seg.segment("ฉันกินข้าว hello  123!"),
            vec!["ฉัน", "กิน", "ข้าว", " ", "hello", "  ", "123", "!"]
        );
    }

    #[test]
    fn keeps_special_tokens_whole() {
        let seg = segmenter(&["สวัสดี", "โลก"]);
        assert_eq!(seg.segment("สวัสดี<_>โลก"), vec!["สวัสดี", "<_>", "โลก"]);
        assert_eq!(seg.segment("<s>โลก</s>"), vec!["<s>", "โลก", "</s>"]);
    }

    #[test]
    fn merges_unknown_clusters() {
        let seg = segmenter(&["กิน"]);
        assert_eq!(seg.segment("กินปลาทู"), vec!["กิน", "ปลาทู"]);
    }

    #[test]
    fn segmentation_is_lossless() {
        let seg = segmenter(&["ไป", "เที่ยว", "ทะเล"]);
        let text = "ไปเที่ยวทะเลกับเพื่อน 2 คน, สนุกมาก!\n";
        let pieces = seg.segment(text);
        assert!(pieces.iter().all(|piece| !piece.is_empty()));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn cluster_boundaries_respect_marks() {
        let text = "เก่า";
        let after_leading = "เ".len();
        assert!(!is_cluster_boundary(text, after_leading));
        let before_tone = "เก".len();
        assert!(!is_cluster_boundary(text, before_tone));
        assert!(is_cluster_boundary(text, 0));
        assert!(is_cluster_boundary(text, text.len()));
    }

    #[test]
    fn dictionary_tracks_membership() {
        let mut dictionary = Dictionary::default();
        let specials = dictionary.len();
        assert!(dictionary.contains("<_>"));
        assert!(dictionary.insert("แมว"));
        assert!(!dictionary.insert("แมว"));
        assert_eq!(dictionary.len(), specials + 1);
        assert_eq!(dictionary.prefix_ends("แมวดำ"), vec!["แมว".len()]);
    }

    #[test]
    fn parses_segmenter_kind() {
        assert_eq!("newmm".parse::<SegmenterKind>().unwrap(), SegmenterKind::Newmm);
        assert_eq!(" Syllable ".parse::<SegmenterKind>().unwrap(), SegmenterKind::Syllable);
        assert!(matches!(
            "deepcut".parse::<SegmenterKind>(),
            Err(Error::UnsupportedSegmenter(_))
        ));
    }
}
