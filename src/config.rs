use std::time::Duration;

use serde::Serialize;

use crate::pipeline::extraction::types::{EngineMode, PageSegMode, Variant};

/// Application-level constants
pub const APP_NAME: &str = "label-scan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Open Food Facts product endpoint (v2). Barcode is appended as a path segment.
pub const DEFAULT_LOOKUP_URL: &str = "https://world.openfoodfacts.org/api/v2/product";

/// Whole barcode-lookup phase budget.
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Characters of winning OCR text echoed back as `rawText`.
pub const DEFAULT_RAW_TEXT_LIMIT: usize = 500;

/// Default `RUST_LOG`-style filter when the environment does not set one.
pub fn default_log_filter() -> String {
    format!("{}=info,warn", APP_NAME.replace('-', "_"))
}

/// Runtime configuration for a scanner instance.
///
/// Every field has a default; `from_env()` overrides individual fields from
/// `LABEL_SCAN_*` variables and ignores (with a warning) values that do not parse.
#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    /// Preprocessing variants fed to OCR, in enumeration order.
    pub variants: Vec<Variant>,
    /// Tesseract page segmentation modes tried per variant, in enumeration order.
    pub psm_modes: Vec<PageSegMode>,
    pub engine_mode: EngineMode,
    /// Tesseract language set, e.g. `eng` or `tur+eng`. Constant across attempts.
    pub languages: String,
    /// Upper bound on concurrently running OCR attempts.
    pub max_workers: usize,
    pub lookup_base_url: String,
    #[serde(with = "duration_secs")]
    pub lookup_timeout: Duration,
    pub barcode_enabled: bool,
    pub raw_text_limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            variants: vec![Variant::Standard, Variant::Shiny, Variant::Inverted],
            psm_modes: vec![
                PageSegMode::SingleBlock,
                PageSegMode::Auto,
                PageSegMode::SingleColumn,
                PageSegMode::SparseText,
                PageSegMode::SparseTextOsd,
            ],
            engine_mode: EngineMode::Default,
            languages: "eng".to_string(),
            max_workers: available_workers(),
            lookup_base_url: DEFAULT_LOOKUP_URL.to_string(),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            barcode_enabled: true,
            raw_text_limit: DEFAULT_RAW_TEXT_LIMIT,
        }
    }
}

impl ScanConfig {
    /// Defaults overridden by `LABEL_SCAN_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LABEL_SCAN_VARIANTS") {
            match parse_list::<Variant>(&raw) {
                Some(variants) => config.variants = variants,
                None => tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_VARIANTS"),
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_PSM_MODES") {
            match parse_list::<PageSegMode>(&raw) {
                Some(modes) => config.psm_modes = modes,
                None => tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_PSM_MODES"),
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_OEM") {
            match raw.trim().parse::<EngineMode>() {
                Ok(mode) => config.engine_mode = mode,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_OEM"),
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_LANG") {
            let langs = raw.trim();
            if langs.is_empty() || !langs.split('+').all(is_language_code) {
                tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_LANG");
            } else {
                config.languages = langs.to_string();
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_WORKERS") {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.max_workers = n.max(1),
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_WORKERS"),
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_LOOKUP_URL") {
            let url = raw.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.lookup_base_url = url.to_string();
            } else {
                tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_LOOKUP_URL");
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_LOOKUP_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.lookup_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_LOOKUP_TIMEOUT_SECS"),
            }
        }

        if let Some(raw) = lookup("LABEL_SCAN_BARCODE") {
            match parse_bool(&raw) {
                Some(enabled) => config.barcode_enabled = enabled,
                None => tracing::warn!(value = %raw, "Ignoring invalid LABEL_SCAN_BARCODE"),
            }
        }

        config
    }

    /// Number of OCR attempts one scan enumerates.
    pub fn attempt_count(&self) -> usize {
        self.variants.len() * self.psm_modes.len()
    }
}

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parse a comma-separated list. Empty or any invalid item rejects the whole list.
fn parse_list<T: std::str::FromStr>(raw: &str) -> Option<Vec<T>> {
    let items: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return None;
    }
    items.into_iter().map(|s| s.parse().ok()).collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Tesseract traineddata names: `eng`, `tur`, `chi_sim`, `script/Latin`.
fn is_language_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/')
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
