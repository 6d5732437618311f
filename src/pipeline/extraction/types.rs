use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::models::enums::{str_enum, ParseEnumError};

str_enum!(
    /// Named preprocessing chain applied before OCR.
    Variant {
        Standard => "standard",
        Shiny => "shiny",
        Inverted => "inverted",
        HighContrast => "high_contrast",
        Otsu => "otsu",
        AdaptiveMean => "adaptive_mean",
    }
);

/// Decoded request image. Always 8-bit RGB internally; `channels` records
/// what the source file carried (1 gray, 2 gray+alpha, 3 RGB, 4 RGBA).
#[derive(Debug, Clone)]
pub struct RawImage {
    pub image: RgbImage,
    pub channels: u8,
}

impl RawImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A recognizer-ready image tagged with the variant that produced it.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub variant: Variant,
    pub image: image::GrayImage,
    /// Rotation applied by deskew, in degrees. Zero when none was applied.
    pub deskew_degrees: f32,
}

/// Tesseract page segmentation modes (`--psm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageSegMode {
    OsdOnly,
    AutoOsd,
    AutoOnly,
    Auto,
    SingleColumn,
    SingleBlockVertText,
    SingleBlock,
    SingleLine,
    SingleWord,
    CircleWord,
    SingleChar,
    SparseText,
    SparseTextOsd,
    RawLine,
}

impl PageSegMode {
    const ALL: [PageSegMode; 14] = [
        Self::OsdOnly,
        Self::AutoOsd,
        Self::AutoOnly,
        Self::Auto,
        Self::SingleColumn,
        Self::SingleBlockVertText,
        Self::SingleBlock,
        Self::SingleLine,
        Self::SingleWord,
        Self::CircleWord,
        Self::SingleChar,
        Self::SparseText,
        Self::SparseTextOsd,
        Self::RawLine,
    ];

    pub fn code(&self) -> u8 {
        match self {
            Self::OsdOnly => 0,
            Self::AutoOsd => 1,
            Self::AutoOnly => 2,
            Self::Auto => 3,
            Self::SingleColumn => 4,
            Self::SingleBlockVertText => 5,
            Self::SingleBlock => 6,
            Self::SingleLine => 7,
            Self::SingleWord => 8,
            Self::CircleWord => 9,
            Self::SingleChar => 10,
            Self::SparseText => 11,
            Self::SparseTextOsd => 12,
            Self::RawLine => 13,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl std::fmt::Display for PageSegMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for PageSegMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| ParseEnumError {
                field: "PageSegMode",
                value: s.into(),
            })
    }
}

/// Tesseract engine modes (`--oem`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineMode {
    LegacyOnly,
    LstmOnly,
    LegacyAndLstm,
    Default,
}

impl EngineMode {
    pub fn code(&self) -> u8 {
        match self {
            Self::LegacyOnly => 0,
            Self::LstmOnly => 1,
            Self::LegacyAndLstm => 2,
            Self::Default => 3,
        }
    }
}

impl std::str::FromStr for EngineMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::LegacyOnly),
            "1" => Ok(Self::LstmOnly),
            "2" => Ok(Self::LegacyAndLstm),
            "3" => Ok(Self::Default),
            _ => Err(ParseEnumError {
                field: "EngineMode",
                value: s.into(),
            }),
        }
    }
}

/// One recognizer configuration. `index` is the position in the fixed
/// enumeration order (variants outer, segmentation modes inner) and is the
/// tie-breaker during winner selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcrAttempt {
    pub index: usize,
    pub variant: Variant,
    pub psm: PageSegMode,
    pub oem: EngineMode,
    pub languages: String,
}

/// Word-level OCR output. Confidence is on Tesseract's 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrWordResult {
    pub text: String,
    pub confidence: f32,
}

/// Raw OCR result from the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrPageResult {
    pub text: String,
    pub word_confidences: Vec<OcrWordResult>,
}

/// OCR engine abstraction (allows mocking for tests)
///
/// Implementations must be callable from several blocking worker threads at once.
pub trait OcrEngine: Send + Sync {
    fn recognize(
        &self,
        png_bytes: &[u8],
        attempt: &OcrAttempt,
    ) -> Result<OcrPageResult, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_round_trips_through_str() {
        for v in [
            Variant::Standard,
            Variant::Shiny,
            Variant::Inverted,
            Variant::HighContrast,
            Variant::Otsu,
            Variant::AdaptiveMean,
        ] {
            assert_eq!(v.as_str().parse::<Variant>().unwrap(), v);
        }
        assert!("glossy".parse::<Variant>().is_err());
    }

    #[test]
    fn variant_serializes_snake_case() {
        let json = serde_json::to_string(&Variant::HighContrast).unwrap();
        assert_eq!(json, "\"high_contrast\"");
    }

    #[test]
    fn psm_codes_match_tesseract() {
        assert_eq!(PageSegMode::SingleBlock.code(), 6);
        assert_eq!(PageSegMode::SparseTextOsd.code(), 12);
        assert_eq!("11".parse::<PageSegMode>().unwrap(), PageSegMode::SparseText);
        for code in 0..14u8 {
            assert_eq!(PageSegMode::from_code(code).unwrap().code(), code);
        }
        assert!(PageSegMode::from_code(14).is_none());
        assert!("auto".parse::<PageSegMode>().is_err());
    }

    #[test]
    fn engine_mode_parses_codes() {
        assert_eq!("3".parse::<EngineMode>().unwrap(), EngineMode::Default);
        assert_eq!("1".parse::<EngineMode>().unwrap().code(), 1);
        assert!("4".parse::<EngineMode>().is_err());
    }
}
