//! Request-to-result flow for one scan.
//!
//! ```text
//! Received → BarcodeDetect ─┬─ LookupSucceeded → Done
//!                           └─ LookupFailed | NoBarcode → Preprocess
//!          → MultiPassOcr → FieldExtract → Done
//! Received → Failed            (undecodable image)
//! ```
//!
//! Lookup failures of any kind are logged and answered by the OCR path.
//! The whole lookup phase shares one deadline, so a slow product database
//! delays the fallback by at most `ScanConfig::lookup_timeout`.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::models::enums::str_enum;
use crate::models::product::ProductRecord;
use crate::models::result::FinalResult;
use crate::pipeline::barcode::{
    BarcodeDetector, DecodedBarcode, DisabledBarcodeDetector, RxingBarcodeDetector,
};
use crate::pipeline::extraction::{
    assess_quality, build_ocr_engine, sanitize_extracted_text, ExtractionError, MultiPassOcr,
    OcrEngine, PreprocessingPipeline, RawImage,
};
use crate::pipeline::fields::FieldExtractor;
use crate::pipeline::lookup::{LookupError, OpenFoodFactsClient, ProductLookup};

str_enum!(
    /// Orchestrator states, recorded in visit order for each request.
    ScanState {
        Received => "received",
        BarcodeDetect => "barcode_detect",
        LookupSucceeded => "lookup_succeeded",
        LookupFailed => "lookup_failed",
        NoBarcode => "no_barcode",
        Preprocess => "preprocess",
        MultiPassOcr => "multi_pass_ocr",
        FieldExtract => "field_extract",
        Done => "done",
        Failed => "failed",
    }
);

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image could not be decoded: {0}")]
    DecodeFailure(String),

    #[error("Internal processing error: {0}")]
    Internal(String),
}

impl From<ExtractionError> for ScanError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::InvalidImage(msg) => ScanError::InvalidImage(msg),
            ExtractionError::ImageDecode(msg) => ScanError::DecodeFailure(msg),
            other => ScanError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ScanError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScanError::Internal(format!("Worker task failed: {err}"))
    }
}

/// Outcome of one scan plus the states it passed through.
#[derive(Debug)]
pub struct ScanReport {
    pub request_id: Uuid,
    pub trail: Vec<ScanState>,
    pub outcome: Result<FinalResult, ScanError>,
}

pub struct Orchestrator {
    config: ScanConfig,
    preprocessor: Arc<PreprocessingPipeline>,
    barcode: Arc<dyn BarcodeDetector>,
    lookup: Arc<dyn ProductLookup>,
    ocr: MultiPassOcr,
    fields: FieldExtractor,
}

impl Orchestrator {
    pub fn new(
        config: ScanConfig,
        barcode: Arc<dyn BarcodeDetector>,
        lookup: Arc<dyn ProductLookup>,
        ocr_engine: Arc<dyn OcrEngine>,
    ) -> Self {
        let ocr = MultiPassOcr::new(ocr_engine, config.max_workers);
        Self {
            config,
            preprocessor: Arc::new(PreprocessingPipeline::default()),
            barcode,
            lookup,
            ocr,
            fields: FieldExtractor::new(),
        }
    }

    /// Production wiring: rxing barcodes, Open Food Facts lookup, and the
    /// OCR engine selected by `build_ocr_engine`.
    pub fn from_config(config: ScanConfig) -> Result<Self, LookupError> {
        let lookup = Arc::new(OpenFoodFactsClient::from_config(&config)?);
        let barcode: Arc<dyn BarcodeDetector> = if config.barcode_enabled {
            Arc::new(RxingBarcodeDetector::new())
        } else {
            Arc::new(DisabledBarcodeDetector)
        };
        let ocr_engine = build_ocr_engine(&config);
        Ok(Self::new(config, barcode, lookup, ocr_engine))
    }

    pub fn with_preprocessor(mut self, preprocessor: PreprocessingPipeline) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn scan(&self, image_bytes: &[u8]) -> Result<FinalResult, ScanError> {
        self.scan_traced(image_bytes).await.outcome
    }

    /// Run one scan inside a `scan` span tagged with a fresh request id.
    pub async fn scan_traced(&self, image_bytes: &[u8]) -> ScanReport {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("scan", request_id = %request_id, bytes = image_bytes.len());
        let mut trail = vec![ScanState::Received];
        let outcome = self.run(image_bytes, &mut trail).instrument(span).await;
        if outcome.is_err() {
            trail.push(ScanState::Failed);
        }
        ScanReport {
            request_id,
            trail,
            outcome,
        }
    }

    async fn run(
        &self,
        image_bytes: &[u8],
        trail: &mut Vec<ScanState>,
    ) -> Result<FinalResult, ScanError> {
        let started = Instant::now();

        let bytes = image_bytes.to_vec();
        let preprocessor = Arc::clone(&self.preprocessor);
        let raw = tokio::task::spawn_blocking(move || preprocessor.decode(&bytes))
            .await?
            .map_err(|e| {
                tracing::warn!(error = %e, "Rejected input image");
                ScanError::from(e)
            })?;
        let raw = Arc::new(raw);

        if self.config.barcode_enabled {
            trail.push(ScanState::BarcodeDetect);
            let barcodes = self.detect_barcodes(&raw).await?;
            if barcodes.is_empty() {
                trail.push(ScanState::NoBarcode);
            } else if let Some(product) = self.lookup_first(&barcodes).await {
                trail.push(ScanState::LookupSucceeded);
                trail.push(ScanState::Done);
                tracing::info!(
                    barcode = %product.barcode,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scan finished via barcode"
                );
                return Ok(FinalResult::barcode(product));
            } else {
                trail.push(ScanState::LookupFailed);
            }
        }

        trail.push(ScanState::Preprocess);
        let preprocessor = Arc::clone(&self.preprocessor);
        let variants = self.config.variants.clone();
        let source = Arc::clone(&raw);
        let (quality, images) = tokio::task::spawn_blocking(move || {
            let quality = assess_quality(&source.image);
            let images = preprocessor.variants(&source, &variants);
            (quality, images)
        })
        .await?;
        tracing::info!(
            quality_score = quality.quality_score,
            suitable = quality.suitable,
            issues = ?quality.issues,
            variants = images.len(),
            planned_attempts = self.config.attempt_count(),
            "Preprocessing complete"
        );

        trail.push(ScanState::MultiPassOcr);
        let outcome = self
            .ocr
            .run(
                &images,
                &self.config.psm_modes,
                self.config.engine_mode,
                &self.config.languages,
            )
            .await;

        let winner = outcome
            .winner
            .filter(|w| w.average_confidence > 0.0 && !w.text.trim().is_empty());
        let Some(winner) = winner else {
            trail.push(ScanState::Done);
            tracing::info!(
                attempted = outcome.attempted,
                failed = outcome.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "No text detected"
            );
            return Ok(FinalResult::no_text(Some(quality)));
        };

        trail.push(ScanState::FieldExtract);
        let cleaned = sanitize_extracted_text(&winner.text);
        let record = self.fields.extract(&cleaned);
        trail.push(ScanState::Done);
        tracing::info!(
            variant = winner.attempt.variant.as_str(),
            psm = winner.attempt.psm.code(),
            confidence = winner.average_confidence,
            found = ?record.found_fields(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan finished via OCR"
        );

        Ok(FinalResult::ocr(
            record,
            winner.text.trim(),
            self.config.raw_text_limit,
            Some(quality),
        ))
    }

    async fn detect_barcodes(&self, raw: &Arc<RawImage>) -> Result<Vec<DecodedBarcode>, ScanError> {
        let detector = Arc::clone(&self.barcode);
        let image = Arc::clone(raw);
        let barcodes = tokio::task::spawn_blocking(move || detector.detect(&image)).await?;
        tracing::info!(
            count = barcodes.len(),
            payloads = ?barcodes.iter().map(|b| b.payload.as_str()).collect::<Vec<_>>(),
            "Barcode detection finished"
        );
        Ok(barcodes)
    }

    /// Look barcodes up in decode order until one resolves, all fail, or the
    /// shared deadline passes.
    async fn lookup_first(&self, barcodes: &[DecodedBarcode]) -> Option<ProductRecord> {
        let deadline = Instant::now() + self.config.lookup_timeout;
        let attempts = async {
            for barcode in barcodes {
                let started = Instant::now();
                match self.lookup.lookup(&barcode.payload).await {
                    Ok(product) => {
                        tracing::info!(
                            barcode = %barcode.payload,
                            format = %barcode.format,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Product found"
                        );
                        return Some(product);
                    }
                    Err(e) => {
                        tracing::warn!(
                            barcode = %barcode.payload,
                            error = %e,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Product lookup failed"
                        );
                    }
                }
            }
            None
        };

        match tokio::time::timeout_at(deadline, attempts).await {
            Ok(found) => found,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.lookup_timeout.as_millis() as u64,
                    "Product lookup timed out; falling back to OCR"
                );
                None
            }
        }
    }
}
