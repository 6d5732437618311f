use serde::{Deserialize, Serialize};

use super::extraction::ExtractionRecord;

/// Product document resolved from a barcode. Carries the same
/// nutrition/ingredient/allergen shape as an OCR extraction, flattened in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    /// Name of the product database that answered.
    pub source: String,
    pub barcode: String,
    pub product_name: Option<String>,
    pub brands: Option<String>,
    pub categories: Option<String>,
    pub image_url: Option<String>,
    #[serde(flatten)]
    pub facts: ExtractionRecord,
    #[serde(default)]
    pub labels: Vec<String>,
    pub nova_group: Option<u8>,
    pub nutriscore_grade: Option<String>,
    pub ecoscore_grade: Option<String>,
}

impl ProductRecord {
    pub fn new(source: impl Into<String>, barcode: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            barcode: barcode.into(),
            product_name: None,
            brands: None,
            categories: None,
            image_url: None,
            facts: ExtractionRecord::default(),
            labels: Vec::new(),
            nova_group: None,
            nutriscore_grade: None,
            ecoscore_grade: None,
        }
    }
}
