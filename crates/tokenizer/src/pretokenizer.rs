use crate::segment::Segmenter;
use std::sync::Arc;
use tokenizers::normalizer::Range;
use tokenizers::{NormalizedString, PreTokenizedString, PreTokenizer};

/// Plugs a [`Segmenter`] into a `tokenizers` pipeline as the
/// boundary-splitting step.
#[derive(Clone)]
pub struct SegmentingPreTokenizer {
    segmenter: Arc<dyn Segmenter>,
}

impl SegmentingPreTokenizer {
    pub fn new(segmenter: Arc<dyn Segmenter>) -> Self {
        Self { segmenter }
    }

    /// Cuts `normalized` at the cumulative offsets of the segmenter's
    /// pieces. Slicing keeps the alignments back to the original text.
    pub fn split(&self, normalized: NormalizedString) -> tokenizers::Result<Vec<NormalizedString>> {
        let mut breaks = Vec::new();
        let mut total = 0;
        for piece in self.segmenter.segment(normalized.get()) {
            total += piece.len();
            breaks.push(total);
        }

        if breaks.last().copied().unwrap_or(0) < normalized.len() {
            breaks.push(normalized.len());
        }

        let mut splits = Vec::with_capacity(breaks.len());
        let mut last = 0;
        for end in breaks {
            if end > last {
                splits.push(slice(&normalized, last..end)?);
                last = end;
            }
        }
        Ok(splits)
    }
}

fn slice(
    normalized: &NormalizedString,
    range: std::ops::Range<usize>,
) -> tokenizers::Result<NormalizedString> {
    normalized
        .slice(Range::Normalized(range.clone()))
        .ok_or_else(|| {
            format!(
                "segment {}..{} does not fall on character boundaries of {:?}",
                range.start,
                range.end,
                normalized.get()
            )
            .into()
        })
}

impl std::fmt::Debug for SegmentingPreTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentingPreTokenizer")
            .field("segmenter", &self.segmenter.name())
            .finish()
    }
}

impl PreTokenizer for SegmentingPreTokenizer {
    fn pre_tokenize(&self, pretokenized: &mut PreTokenizedString) -> tokenizers::Result<()> {
        pretokenized.split(|_, normalized| self.split(normalized))
    }
}
