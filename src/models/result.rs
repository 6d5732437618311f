use serde::Serialize;

use super::enums::ScanMethod;
use super::extraction::ExtractionRecord;
use super::product::ProductRecord;
use crate::pipeline::extraction::preprocess::QualityReport;

pub const BARCODE_SUCCESS_MESSAGE: &str = "Product found via barcode lookup";
pub const OCR_SUCCESS_MESSAGE: &str = "Image processed successfully via OCR";
pub const NO_TEXT_MESSAGE: &str = "No barcode found and no text detected in image";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScanData {
    Product(Box<ProductRecord>),
    Extraction(ExtractionRecord),
}

/// Response body for one scan. `data` is serialized as `null` when nothing
/// was extracted; `rawText` only appears on the OCR path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    pub success: bool,
    pub message: String,
    pub method: ScanMethod,
    pub data: Option<ScanData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
}

impl FinalResult {
    pub fn barcode(product: ProductRecord) -> Self {
        Self {
            success: true,
            message: BARCODE_SUCCESS_MESSAGE.to_string(),
            method: ScanMethod::Barcode,
            data: Some(ScanData::Product(Box::new(product))),
            raw_text: None,
            quality: None,
        }
    }

    /// OCR success. `raw_text` is truncated to `raw_text_limit` characters.
    pub fn ocr(
        record: ExtractionRecord,
        raw_text: &str,
        raw_text_limit: usize,
        quality: Option<QualityReport>,
    ) -> Self {
        Self {
            success: true,
            message: OCR_SUCCESS_MESSAGE.to_string(),
            method: ScanMethod::Ocr,
            data: Some(ScanData::Extraction(record)),
            raw_text: Some(truncate_chars(raw_text, raw_text_limit).to_string()),
            quality,
        }
    }

    pub fn no_text(quality: Option<QualityReport>) -> Self {
        Self {
            success: false,
            message: NO_TEXT_MESSAGE.to_string(),
            method: ScanMethod::Ocr,
            data: None,
            raw_text: None,
            quality,
        }
    }

    pub fn product(&self) -> Option<&ProductRecord> {
        match &self.data {
            Some(ScanData::Product(product)) => Some(product.as_ref()),
            _ => None,
        }
    }

    pub fn extraction(&self) -> Option<&ExtractionRecord> {
        match &self.data {
            Some(ScanData::Extraction(record)) => Some(record),
            _ => None,
        }
    }
}

/// Longest prefix of at most `limit` characters.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_text_result_shape() {
        let value = serde_json::to_value(FinalResult::no_text(None)).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "message": NO_TEXT_MESSAGE,
                "method": "ocr",
                "data": null
            })
        );
    }

    #[test]
    fn ocr_result_carries_raw_text() {
        let result = FinalResult::ocr(ExtractionRecord::default(), "Sugar 12g", 500, None);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["method"], "ocr");
        assert_eq!(value["rawText"], "Sugar 12g");
        assert_eq!(value["data"]["calories"]["found"], false);
        assert!(result.extraction().is_some());
        assert!(result.product().is_none());
    }

    #[test]
    fn barcode_result_has_no_raw_text() {
        let result = FinalResult::barcode(ProductRecord::new("openfoodfacts", "5449000000996"));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["method"], "barcode");
        assert_eq!(value["data"]["barcode"], "5449000000996");
        assert!(value.get("rawText").is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("şeker", 3), "şek");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
        let long = "x".repeat(600);
        let result = FinalResult::ocr(ExtractionRecord::default(), &long, 500, None);
        assert_eq!(result.raw_text.unwrap().chars().count(), 500);
    }
}
