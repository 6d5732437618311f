use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::types::{OcrAttempt, OcrEngine, OcrPageResult, OcrWordResult, PageSegMode, Variant};
use super::ExtractionError;
use crate::config::ScanConfig;

/// Bundled Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
///
/// A fresh Tesseract handle is created per attempt, so one engine can serve
/// several blocking workers at once.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: PathBuf,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    /// Initialize with a tessdata directory. English data must be present.
    pub fn new(tessdata_dir: &Path) -> Result<Self, ExtractionError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
        })
    }

    /// Languages from a `tur+eng` style set whose traineddata is missing.
    pub fn missing_languages(&self, languages: &str) -> Vec<String> {
        languages
            .split('+')
            .filter(|lang| !self.tessdata_dir.join(format!("{lang}.traineddata")).exists())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(feature = "ocr")]
fn tesseract_oem(mode: super::types::EngineMode) -> tesseract::OcrEngineMode {
    use super::types::EngineMode;
    match mode {
        EngineMode::LegacyOnly => tesseract::OcrEngineMode::TesseractOnly,
        EngineMode::LstmOnly => tesseract::OcrEngineMode::LstmOnly,
        EngineMode::LegacyAndLstm => tesseract::OcrEngineMode::TesseractLstmCombined,
        EngineMode::Default => tesseract::OcrEngineMode::Default,
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn recognize(
        &self,
        png_bytes: &[u8],
        attempt: &OcrAttempt,
    ) -> Result<OcrPageResult, ExtractionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new_with_oem(
            Some(tessdata_str),
            Some(attempt.languages.as_str()),
            tesseract_oem(attempt.oem),
        )
        .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;

        let tess = tess
            .set_variable("tessedit_pageseg_mode", &attempt.psm.code().to_string())
            .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set psm: {e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(png_bytes)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        let text = tess
            .get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        // TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
        let word_confidences = match tess.get_tsv_text(0) {
            Ok(tsv) => parse_tsv_word_confidences(&tsv),
            Err(_) => {
                // Fallback: split text with page-mean confidence
                let mean = tess.mean_text_conf().max(0) as f32;
                text.split_whitespace()
                    .map(|w| OcrWordResult {
                        text: w.to_string(),
                        confidence: mean,
                    })
                    .collect()
            }
        };

        Ok(OcrPageResult {
            text,
            word_confidences,
        })
    }
}

/// Stand-in used when no OCR backend is compiled in or tessdata is missing.
/// Every attempt fails, so scans fall through to the no-text outcome while
/// the barcode path keeps working.
pub struct UnavailableOcrEngine {
    reason: String,
}

impl UnavailableOcrEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl OcrEngine for UnavailableOcrEngine {
    fn recognize(
        &self,
        _png_bytes: &[u8],
        _attempt: &OcrAttempt,
    ) -> Result<OcrPageResult, ExtractionError> {
        Err(ExtractionError::OcrInit(self.reason.clone()))
    }
}

/// Build the production OCR engine for `config`, falling back to
/// `UnavailableOcrEngine` when Tesseract cannot be set up.
pub fn build_ocr_engine(config: &ScanConfig) -> Arc<dyn OcrEngine> {
    build_engine(config)
}

#[cfg(feature = "ocr")]
fn build_engine(config: &ScanConfig) -> Arc<dyn OcrEngine> {
    let Some(dir) = find_tessdata_dir() else {
        tracing::warn!("No tessdata directory found; OCR disabled");
        return Arc::new(UnavailableOcrEngine::new("tessdata not found"));
    };

    match BundledTesseract::new(&dir) {
        Ok(engine) => {
            let missing = engine.missing_languages(&config.languages);
            if !missing.is_empty() {
                tracing::warn!(
                    languages = %config.languages,
                    missing = ?missing,
                    "Configured OCR languages lack traineddata"
                );
            }
            tracing::info!(tessdata = %dir.display(), "Tesseract OCR ready");
            Arc::new(engine)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Tesseract unavailable");
            Arc::new(UnavailableOcrEngine::new(e.to_string()))
        }
    }
}

#[cfg(not(feature = "ocr"))]
fn build_engine(config: &ScanConfig) -> Arc<dyn OcrEngine> {
    tracing::warn!(
        languages = %config.languages,
        "Built without the `ocr` feature; OCR disabled"
    );
    Arc::new(UnavailableOcrEngine::new("built without OCR support"))
}

/// Locate a tessdata directory: `TESSDATA_PREFIX` first, then common
/// system install locations.
pub fn find_tessdata_dir() -> Option<PathBuf> {
    find_tessdata_dir_from(std::env::var_os("TESSDATA_PREFIX").map(PathBuf::from))
}

const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
    "/usr/local/Cellar/tesseract/share/tessdata",
];

fn find_tessdata_dir_from(prefix: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(prefix) = prefix {
        // TESSDATA_PREFIX may point at tessdata itself or at its parent.
        for candidate in [prefix.clone(), prefix.join("tessdata")] {
            if candidate.join("eng.traineddata").exists() {
                return Some(candidate);
            }
        }
        tracing::warn!(prefix = %prefix.display(), "TESSDATA_PREFIX has no eng.traineddata");
    }

    SYSTEM_TESSDATA_DIRS
        .iter()
        .map(Path::new)
        .find(|dir| dir.join("eng.traineddata").exists())
        .map(Path::to_path_buf)
}

/// Parse Tesseract TSV output into word-level confidences.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence stays on the 0-100 scale.
pub fn parse_tsv_word_confidences(tsv: &str) -> Vec<OcrWordResult> {
    let mut results = Vec::new();

    for line in tsv.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Header row and non-word levels both fall out here
        let Ok(level) = fields[0].parse::<i32>() else {
            continue;
        };
        if level != 5 {
            continue;
        }

        let Ok(conf) = fields[10].trim().parse::<f32>() else {
            continue;
        };

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        // Tesseract returns -1 for words it can't assign confidence to
        results.push(OcrWordResult {
            text: word.to_string(),
            confidence: conf.max(0.0),
        });
    }

    results
}

// ═══════════════════════════════════════════════════════════
// Mock engine
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Scripted {
    Page { text: String, confidence: f32 },
    Fail,
}

/// Mock OCR engine for unit testing without Tesseract.
///
/// Returns the default page for every attempt unless a (variant, psm) pair
/// has its own script. Every word of a page gets the page confidence.
pub struct MockOcrEngine {
    default: Scripted,
    scripts: HashMap<(Variant, PageSegMode), Scripted>,
    delays: HashMap<(Variant, PageSegMode), Duration>,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            default: Scripted::Page {
                text: text.to_string(),
                confidence,
            },
            scripts: HashMap::new(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every attempt yields no words (average confidence 0).
    pub fn blank() -> Self {
        Self::new("", 0.0)
    }

    pub fn with_result(mut self, variant: Variant, psm: PageSegMode, text: &str, confidence: f32) -> Self {
        self.scripts.insert(
            (variant, psm),
            Scripted::Page {
                text: text.to_string(),
                confidence,
            },
        );
        self
    }

    pub fn failing_for(mut self, variant: Variant, psm: PageSegMode) -> Self {
        self.scripts.insert((variant, psm), Scripted::Fail);
        self
    }

    /// Sleep before answering the given attempt (blocking; runs on a worker thread).
    pub fn with_delay(mut self, variant: Variant, psm: PageSegMode, delay: Duration) -> Self {
        self.delays.insert((variant, psm), delay);
        self
    }

    /// Number of `recognize` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(
        &self,
        _png_bytes: &[u8],
        attempt: &OcrAttempt,
    ) -> Result<OcrPageResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (attempt.variant, attempt.psm);
        if let Some(delay) = self.delays.get(&key) {
            std::thread::sleep(*delay);
        }

        match self.scripts.get(&key).unwrap_or(&self.default) {
            Scripted::Fail => Err(ExtractionError::OcrProcessing(format!(
                "scripted failure for {}/psm {}",
                attempt.variant, attempt.psm
            ))),
            Scripted::Page { text, confidence } => Ok(OcrPageResult {
                text: text.clone(),
                word_confidences: text
                    .split_whitespace()
                    .map(|w| OcrWordResult {
                        text: w.to_string(),
                        confidence: *confidence,
                    })
                    .collect(),
            }),
        }
    }
}
