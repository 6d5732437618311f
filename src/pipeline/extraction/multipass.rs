//! Multi-pass OCR: one attempt per (variant, segmentation mode) pair, run on
//! a bounded pool of blocking workers, reduced with the max-confidence fold.
//!
//! Results are folded as they complete. Because `confidence::pick` is
//! associative and commutative, the winner does not depend on scheduling.
//! Dropping the future returned by `MultiPassOcr::run` drops the `JoinSet`,
//! which aborts attempts still queued for a worker; attempts already inside
//! the engine finish on their thread and are discarded.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::confidence::{confidence_band, fold_best, OcrResult};
use super::preprocess::encode_png;
use super::types::{
    EngineMode, OcrAttempt, OcrEngine, OcrPageResult, PageSegMode, PreprocessedImage, Variant,
};
use super::ExtractionError;

/// Attempts in fixed enumeration order: variants outer, modes inner.
pub fn enumerate_attempts(
    variants: &[Variant],
    psm_modes: &[PageSegMode],
    oem: EngineMode,
    languages: &str,
) -> Vec<OcrAttempt> {
    variants
        .iter()
        .flat_map(|variant| psm_modes.iter().map(move |psm| (*variant, *psm)))
        .enumerate()
        .map(|(index, (variant, psm))| OcrAttempt {
            index,
            variant,
            psm,
            oem,
            languages: languages.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiPassOutcome {
    pub winner: Option<OcrResult>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct MultiPassOcr {
    engine: Arc<dyn OcrEngine>,
    max_workers: usize,
}

impl MultiPassOcr {
    pub fn new(engine: Arc<dyn OcrEngine>, max_workers: usize) -> Self {
        Self {
            engine,
            max_workers: max_workers.max(1),
        }
    }

    /// Run every attempt over `images` and return the most confident result.
    ///
    /// Individual attempt failures (engine errors, worker panics, encoding
    /// errors) are logged and counted, never propagated.
    pub async fn run(
        &self,
        images: &[PreprocessedImage],
        psm_modes: &[PageSegMode],
        oem: EngineMode,
        languages: &str,
    ) -> MultiPassOutcome {
        let variants: Vec<Variant> = images.iter().map(|img| img.variant).collect();
        let attempts = enumerate_attempts(&variants, psm_modes, oem, languages);
        let attempted = attempts.len();

        // Encode each variant once; attempts share the bytes.
        let mut encoded: HashMap<Variant, Arc<[u8]>> = HashMap::new();
        for img in images {
            match encode_png(&img.image) {
                Ok(png) => {
                    encoded.insert(img.variant, Arc::from(png));
                }
                Err(e) => {
                    tracing::warn!(variant = img.variant.as_str(), error = %e, "Variant encoding failed");
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set: JoinSet<(OcrAttempt, Result<OcrPageResult, ExtractionError>)> = JoinSet::new();
        let mut failed = 0usize;

        for attempt in attempts {
            let Some(png) = encoded.get(&attempt.variant).cloned() else {
                failed += 1;
                continue;
            };
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return (attempt, Err(ExtractionError::OcrProcessing(e.to_string())));
                    }
                };
                let worker_attempt = attempt.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    engine.recognize(&png, &worker_attempt)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(ExtractionError::OcrProcessing(format!("OCR worker failed: {e}")))
                });
                (attempt, outcome)
            });
        }

        let mut best: Option<OcrResult> = None;
        let mut succeeded = 0usize;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((attempt, Ok(page))) => {
                    let result = OcrResult::from_page(attempt, page);
                    tracing::debug!(
                        index = result.attempt.index,
                        variant = result.attempt.variant.as_str(),
                        psm = result.attempt.psm.code(),
                        confidence = result.average_confidence,
                        tokens = result.scored_tokens(),
                        "OCR attempt finished"
                    );
                    succeeded += 1;
                    best = fold_best(best, result);
                }
                Ok((attempt, Err(e))) => {
                    tracing::warn!(
                        index = attempt.index,
                        variant = attempt.variant.as_str(),
                        psm = attempt.psm.code(),
                        error = %e,
                        "OCR attempt failed"
                    );
                    failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "OCR task aborted");
                    failed += 1;
                }
            }
        }

        match &best {
            Some(winner) => tracing::info!(
                variant = winner.attempt.variant.as_str(),
                psm = winner.attempt.psm.code(),
                confidence = winner.average_confidence,
                band = confidence_band(winner.average_confidence),
                attempted,
                failed,
                "OCR winner selected"
            ),
            None => tracing::warn!(attempted, failed, "No OCR attempt produced a result"),
        }

        MultiPassOutcome {
            winner: best,
            attempted,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::{GrayImage, Luma};

    use super::*;
    use crate::pipeline::extraction::ocr::MockOcrEngine;

    const MODES: [PageSegMode; 3] = [
        PageSegMode::SingleBlock,
        PageSegMode::Auto,
        PageSegMode::SparseText,
    ];

    fn images(variants: &[Variant]) -> Vec<PreprocessedImage> {
        variants
            .iter()
            .map(|v| PreprocessedImage {
                variant: *v,
                image: GrayImage::from_pixel(16, 8, Luma([255])),
                deskew_degrees: 0.0,
            })
            .collect()
    }

    #[test]
    fn enumeration_is_variant_major() {
        let attempts = enumerate_attempts(
            &[Variant::Standard, Variant::Shiny],
            &MODES,
            EngineMode::Default,
            "tur+eng",
        );
        assert_eq!(attempts.len(), 6);
        assert_eq!(attempts[0].variant, Variant::Standard);
        assert_eq!(attempts[2].psm, PageSegMode::SparseText);
        assert_eq!(attempts[3].variant, Variant::Shiny);
        assert_eq!(attempts[3].psm, PageSegMode::SingleBlock);
        assert!(attempts.iter().enumerate().all(|(i, a)| a.index == i));
        assert!(attempts.iter().all(|a| a.languages == "tur+eng"));
    }

    #[tokio::test]
    async fn picks_most_confident_attempt() {
        let engine = Arc::new(
            MockOcrEngine::new("weak text", 30.0)
                .with_result(Variant::Shiny, PageSegMode::Auto, "Calories 120 kcal", 88.0),
        );
        let ocr = MultiPassOcr::new(engine.clone(), 4);
        let outcome = ocr
            .run(
                &images(&[Variant::Standard, Variant::Shiny]),
                &MODES,
                EngineMode::Default,
                "eng",
            )
            .await;
        let winner = outcome.winner.unwrap();
        assert_eq!(winner.text, "Calories 120 kcal");
        assert_eq!(winner.attempt.variant, Variant::Shiny);
        assert_eq!(outcome.attempted, 6);
        assert_eq!(outcome.succeeded, 6);
        assert_eq!(engine.calls(), 6);
    }

    #[tokio::test]
    async fn failed_and_empty_attempts_lose_without_failing_run() {
        let engine = Arc::new(
            MockOcrEngine::blank()
                .failing_for(Variant::Standard, PageSegMode::SingleBlock)
                .with_result(Variant::Standard, PageSegMode::SparseText, "sugar", 64.0),
        );
        let ocr = MultiPassOcr::new(engine, 2);
        let outcome = ocr
            .run(&images(&[Variant::Standard]), &MODES, EngineMode::Default, "eng")
            .await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.winner.unwrap().text, "sugar");
    }

    #[tokio::test]
    async fn all_failures_yield_no_winner() {
        let engine = Arc::new(crate::pipeline::extraction::ocr::UnavailableOcrEngine::new("off"));
        let ocr = MultiPassOcr::new(engine, 3);
        let outcome = ocr
            .run(&images(&[Variant::Standard]), &MODES, EngineMode::Default, "eng")
            .await;
        assert!(outcome.winner.is_none());
        assert_eq!(outcome.failed, 3);
    }

    #[tokio::test]
    async fn tie_break_independent_of_completion_order() {
        // Equal confidence everywhere; early attempts are made slowest so
        // they complete last.
        let mut engine = MockOcrEngine::new("same", 70.0);
        for (i, psm) in MODES.iter().enumerate() {
            let delay = Duration::from_millis(60 - 20 * i as u64);
            engine = engine.with_delay(Variant::Standard, *psm, delay);
        }
        let engine = Arc::new(engine);
        let variants = [Variant::Standard, Variant::Inverted];

        for workers in [1, 2, 6] {
            let ocr = MultiPassOcr::new(engine.clone(), workers);
            let outcome = ocr
                .run(&images(&variants), &MODES, EngineMode::Default, "eng")
                .await;
            let winner = outcome.winner.unwrap();
            assert_eq!(winner.attempt.index, 0, "workers={workers}");
            assert_eq!(winner.attempt.variant, Variant::Standard);
        }
    }

    #[tokio::test]
    async fn dropped_run_does_not_poison_engine() {
        let engine = Arc::new(
            MockOcrEngine::new("slow", 50.0).with_delay(
                Variant::Standard,
                PageSegMode::SingleBlock,
                Duration::from_millis(200),
            ),
        );
        let ocr = MultiPassOcr::new(engine.clone(), 1);
        let imgs = images(&[Variant::Standard]);
        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            ocr.run(&imgs, &MODES, EngineMode::Default, "eng"),
        )
        .await;
        assert!(cancelled.is_err());

        // A later run on the same engine still completes normally.
        let fresh = MultiPassOcr::new(engine, 3)
            .run(&imgs, &[PageSegMode::Auto], EngineMode::Default, "eng")
            .await;
        assert_eq!(fresh.winner.unwrap().text, "slow");
    }
}
