//! Barcode detection over the decoded photo.
//!
//! Symbols are decoded from the upright grayscale image; if nothing decodes,
//! one pass over a 90° rotation is tried. Payloads are returned in decode
//! order with duplicates removed.

use std::collections::HashSet;

use image::{imageops, GrayImage};
use serde::Serialize;

use crate::pipeline::extraction::filters::rgb_to_gray;
use crate::pipeline::extraction::RawImage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedBarcode {
    pub payload: String,
    /// Symbology name as reported by the decoder, e.g. `EAN_13`.
    pub format: String,
}

/// Barcode decoder abstraction (allows mocking for tests)
pub trait BarcodeDetector: Send + Sync {
    /// Decoded payloads in decode order, deduplicated by value. Empty when
    /// nothing decodes; decoder failures are not errors.
    fn detect(&self, image: &RawImage) -> Vec<DecodedBarcode>;
}

/// Multi-format detector backed by `rxing` (EAN/UPC, Code 128/39/93,
/// ITF, Codabar, QR, Data Matrix, Aztec, PDF417).
#[derive(Debug, Clone, Copy, Default)]
pub struct RxingBarcodeDetector;

impl RxingBarcodeDetector {
    pub fn new() -> Self {
        Self
    }

    fn decode_gray(gray: &GrayImage) -> Vec<DecodedBarcode> {
        let (width, height) = gray.dimensions();
        match rxing::helpers::detect_multiple_in_luma(gray.as_raw().clone(), width, height) {
            Ok(results) => results
                .iter()
                .map(|r| DecodedBarcode {
                    payload: r.getText().trim().to_string(),
                    format: format!("{:?}", r.getBarcodeFormat()),
                })
                .filter(|b| !b.payload.is_empty())
                .collect(),
            Err(e) => {
                tracing::trace!(error = %e, "No barcode symbol decoded");
                Vec::new()
            }
        }
    }
}

impl BarcodeDetector for RxingBarcodeDetector {
    fn detect(&self, image: &RawImage) -> Vec<DecodedBarcode> {
        let gray = rgb_to_gray(&image.image);
        let mut found = Self::decode_gray(&gray);
        if found.is_empty() {
            let rotated = imageops::rotate90(&gray);
            found = Self::decode_gray(&rotated);
            if !found.is_empty() {
                tracing::debug!("Barcode decoded on rotated pass");
            }
        }
        dedup_payloads(found)
    }
}

/// Keep the first occurrence of each payload.
pub fn dedup_payloads(barcodes: Vec<DecodedBarcode>) -> Vec<DecodedBarcode> {
    let mut seen = HashSet::new();
    barcodes
        .into_iter()
        .filter(|b| seen.insert(b.payload.clone()))
        .collect()
}

/// Detector that never finds anything. Used when barcode lookup is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBarcodeDetector;

impl BarcodeDetector for DisabledBarcodeDetector {
    fn detect(&self, _image: &RawImage) -> Vec<DecodedBarcode> {
        Vec::new()
    }
}

/// Scripted detector for tests.
#[derive(Debug, Clone, Default)]
pub struct MockBarcodeDetector {
    payloads: Vec<String>,
}

impl MockBarcodeDetector {
    pub fn new<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payloads: payloads.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl BarcodeDetector for MockBarcodeDetector {
    fn detect(&self, _image: &RawImage) -> Vec<DecodedBarcode> {
        dedup_payloads(
            self.payloads
                .iter()
                .map(|p| DecodedBarcode {
                    payload: p.clone(),
                    format: "MOCK".to_string(),
                })
                .collect(),
        )
    }
}
