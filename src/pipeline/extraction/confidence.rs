use std::cmp::Ordering;

use serde::Serialize;

use super::types::{OcrAttempt, OcrPageResult, OcrWordResult};

/// Confidence bands (0-100 scale) used in log output
pub mod thresholds {
    /// Below this: text is probably noise.
    pub const LOW: f32 = 40.0;

    /// Above this: recognition is reliable.
    pub const HIGH: f32 = 80.0;
}

/// Mean confidence over tokens with confidence > 0. Zero when there are none.
pub fn average_confidence(words: &[OcrWordResult]) -> f32 {
    let (sum, count) = words
        .iter()
        .map(|w| w.confidence)
        .filter(|c| c.is_finite() && *c > 0.0)
        .fold((0.0f64, 0usize), |(s, n), c| (s + c as f64, n + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

pub fn confidence_band(confidence: f32) -> &'static str {
    if confidence >= thresholds::HIGH {
        "high"
    } else if confidence >= thresholds::LOW {
        "moderate"
    } else {
        "low"
    }
}

/// Outcome of one attempt, ready for selection.
#[derive(Debug, Clone, Serialize)]
pub struct OcrResult {
    pub attempt: OcrAttempt,
    pub text: String,
    pub word_confidences: Vec<OcrWordResult>,
    pub average_confidence: f32,
}

impl OcrResult {
    pub fn from_page(attempt: OcrAttempt, page: OcrPageResult) -> Self {
        let average_confidence = average_confidence(&page.word_confidences);
        Self {
            attempt,
            text: page.text,
            word_confidences: page.word_confidences,
            average_confidence,
        }
    }

    pub fn scored_tokens(&self) -> usize {
        self.word_confidences
            .iter()
            .filter(|w| w.confidence > 0.0)
            .count()
    }
}

/// Total order used for selection: higher confidence wins, then the lower
/// enumeration index. `Greater` means `a` is preferred over `b`.
fn preference(a: &OcrResult, b: &OcrResult) -> Ordering {
    a.average_confidence
        .total_cmp(&b.average_confidence)
        .then_with(|| b.attempt.index.cmp(&a.attempt.index))
}

/// Binary selection step. Associative and commutative, so folding the
/// attempt set in any order yields the same winner.
pub fn pick(a: OcrResult, b: OcrResult) -> OcrResult {
    if preference(&a, &b) == Ordering::Less {
        b
    } else {
        a
    }
}

/// Fold an optional running winner with a newly completed result.
pub fn fold_best(best: Option<OcrResult>, next: OcrResult) -> Option<OcrResult> {
    Some(match best {
        Some(current) => pick(current, next),
        None => next,
    })
}
