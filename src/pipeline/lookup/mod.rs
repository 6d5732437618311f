//! Product lookup by barcode.
//!
//! The orchestrator only sees the `ProductLookup` trait. Every `LookupError`
//! variant, `NotFound` included, means "fall back to OCR".

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{ScanConfig, APP_NAME, APP_VERSION};
use crate::models::enums::Nutrient;
use crate::models::extraction::{
    dedup_case_insensitive, AllergensField, CaloriesField, IngredientsField, NutrientValue,
    ServingSizeField,
};
use crate::models::product::ProductRecord;
use crate::pipeline::fields::rules::{parse_number, split_ingredients};

pub const OPEN_FOOD_FACTS_SOURCE: &str = "openfoodfacts";

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Product not found for barcode {0}")]
    NotFound(String),

    #[error("Barcode is not a product code: {0}")]
    InvalidBarcode(String),

    #[error("Product lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Product database unreachable at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Product database returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

/// Resolves a barcode payload to a product record.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn lookup(&self, barcode: &str) -> Result<ProductRecord, LookupError>;
}

/// GTIN/EAN/UPC payloads: digits only, 6 to 14 long.
pub fn is_product_code(barcode: &str) -> bool {
    (6..=14).contains(&barcode.len()) && barcode.bytes().all(|b| b.is_ascii_digit())
}

// ═══════════════════════════════════════════════════════════
// Open Food Facts
// ═══════════════════════════════════════════════════════════

/// Async client for the Open Food Facts v2 product endpoint.
pub struct OpenFoodFactsClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OpenFoodFactsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{APP_NAME}/{APP_VERSION}"))
            .build()
            .map_err(|e| LookupError::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, LookupError> {
        Self::new(&config.lookup_base_url, config.lookup_timeout)
    }

    fn product_url(&self, barcode: &str) -> String {
        format!("{}/{}", self.base_url, barcode)
    }
}

/// Response envelope from `GET /api/v2/product/{barcode}`
#[derive(Deserialize)]
struct OffProductResponse {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    product: Option<Map<String, Value>>,
}

#[async_trait]
impl ProductLookup for OpenFoodFactsClient {
    async fn lookup(&self, barcode: &str) -> Result<ProductRecord, LookupError> {
        if !is_product_code(barcode) {
            return Err(LookupError::InvalidBarcode(barcode.to_string()));
        }

        let url = self.product_url(barcode);
        tracing::debug!(%url, "Fetching product");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                LookupError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                LookupError::Timeout(self.timeout)
            } else {
                LookupError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(barcode.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OffProductResponse = response
            .json()
            .await
            .map_err(|e| LookupError::ResponseParsing(e.to_string()))?;

        parse_product_response(barcode, parsed)
    }
}

fn parse_product_response(
    barcode: &str,
    response: OffProductResponse,
) -> Result<ProductRecord, LookupError> {
    let found = response.status.as_ref().and_then(number) == Some(1.0);
    match response.product {
        Some(product) if found && !product.is_empty() => Ok(map_product(barcode, &product)),
        _ => Err(LookupError::NotFound(barcode.to_string())),
    }
}

/// Map an Open Food Facts product document onto `ProductRecord`.
pub fn map_product(barcode: &str, product: &Map<String, Value>) -> ProductRecord {
    let empty = Map::new();
    let nutriments = product
        .get("nutriments")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut record = ProductRecord::new(
        OPEN_FOOD_FACTS_SOURCE,
        text(product, "code").unwrap_or_else(|| barcode.to_string()),
    );
    record.product_name = text(product, "product_name").or_else(|| localized(product, "product_name_"));
    record.brands = text(product, "brands");
    record.categories = text(product, "categories");
    record.image_url = text(product, "image_url");

    let calories = num(nutriments, "energy-kcal_100g").or_else(|| num(nutriments, "energy-kcal"));
    record.facts.calories = CaloriesField {
        value: calories,
        value_per_serving: num(nutriments, "energy-kcal_serving"),
        found: calories.is_some(),
        ..CaloriesField::default()
    };

    if let Some(serving) = text(product, "serving_size").or_else(|| {
        product
            .get("serving_quantity")
            .and_then(number)
            .map(|q| format!("{q}"))
    }) {
        record.facts.serving_size = ServingSizeField::new(serving);
    }

    let ingredients_text =
        text(product, "ingredients_text").or_else(|| localized(product, "ingredients_text_"));
    if let Some(raw) = ingredients_text {
        let list = dedup_case_insensitive(split_ingredients(&raw));
        record.facts.ingredients = IngredientsField {
            found: !list.is_empty(),
            list,
            raw: Some(raw),
        };
    }

    record.facts.allergens = AllergensField::from_list(dedup_case_insensitive(
        tags(product, "allergens_tags")
            .iter()
            .map(|tag| strip_tag(tag).replace('-', " ")),
    ));

    record.facts.nutrition_facts = Nutrient::ALL
        .iter()
        .filter_map(|nutrient| {
            let key = off_nutrient_key(*nutrient);
            num(nutriments, &format!("{key}_100g"))
                .or_else(|| num(nutriments, key))
                .map(|value| {
                    (
                        *nutrient,
                        NutrientValue {
                            value,
                            unit: "g".to_string(),
                        },
                    )
                })
        })
        .collect();

    record.labels = tags(product, "labels_tags")
        .iter()
        .map(|tag| strip_tag(tag).to_string())
        .collect();
    record.nova_group = product
        .get("nova_group")
        .and_then(number)
        .filter(|g| (1.0..=4.0).contains(g))
        .map(|g| g as u8);
    record.nutriscore_grade = text(product, "nutriscore_grade");
    record.ecoscore_grade = text(product, "ecoscore_grade");

    record
}

fn off_nutrient_key(nutrient: Nutrient) -> &'static str {
    match nutrient {
        Nutrient::Protein => "proteins",
        Nutrient::Fat => "fat",
        Nutrient::SaturatedFat => "saturated-fat",
        Nutrient::Carbohydrates => "carbohydrates",
        Nutrient::Sugars => "sugars",
        Nutrient::Fiber => "fiber",
        Nutrient::Sodium => "sodium",
        Nutrient::Salt => "salt",
    }
}

/// JSON number, or a string holding one.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn num(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(number)
}

/// Non-blank string field.
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// First non-blank localized variant (`product_name_tr`, ...), in key order.
fn localized(map: &Map<String, Value>, prefix: &str) -> Option<String> {
    map.keys()
        .filter(|k| k.starts_with(prefix))
        .find_map(|k| text(map, k))
}

fn tags(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `en:tree-nuts` → `tree-nuts`
fn strip_tag(tag: &str) -> &str {
    match tag.split_once(':') {
        Some((lang, rest)) if lang.len() <= 3 => rest,
        _ => tag,
    }
}

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum MockLookupOutcome {
    Found(ProductRecord),
    NotFound,
    Unreachable,
}

/// Scripted lookup for tests. Unscripted barcodes are not found.
#[derive(Debug, Default)]
pub struct MockProductLookup {
    outcomes: HashMap<String, MockLookupOutcome>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockProductLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: ProductRecord) -> Self {
        self.outcomes
            .insert(product.barcode.clone(), MockLookupOutcome::Found(product));
        self
    }

    pub fn with_outcome(mut self, barcode: &str, outcome: MockLookupOutcome) -> Self {
        self.outcomes.insert(barcode.to_string(), outcome);
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Barcodes looked up so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProductLookup for MockProductLookup {
    async fn lookup(&self, barcode: &str) -> Result<ProductRecord, LookupError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(barcode.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.outcomes.get(barcode) {
            Some(MockLookupOutcome::Found(product)) => Ok(product.clone()),
            Some(MockLookupOutcome::Unreachable) => {
                Err(LookupError::Connection("mock://products".to_string()))
            }
            Some(MockLookupOutcome::NotFound) | None => {
                Err(LookupError::NotFound(barcode.to_string()))
            }
        }
    }
}
