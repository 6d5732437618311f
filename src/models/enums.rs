/// Error returned when a string does not name a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field} value: {value}")]
pub struct ParseEnumError {
    pub field: &'static str,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::enums::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err($crate::models::enums::ParseEnumError {
                        field: stringify!($name),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

pub(crate) use str_enum;

str_enum!(
    /// Which path produced a scan result.
    ScanMethod {
        Barcode => "barcode",
        Ocr => "ocr",
    }
);

str_enum!(
    /// Tracked nutrients, shared by the OCR and barcode paths. Declaration
    /// order is the serialization order of `nutritionFacts`.
    Nutrient {
        Protein => "protein",
        Fat => "fat",
        SaturatedFat => "saturated_fat",
        Carbohydrates => "carbohydrates",
        Sugars => "sugars",
        Fiber => "fiber",
        Sodium => "sodium",
        Salt => "salt",
    }
);

impl Nutrient {
    pub const ALL: [Nutrient; 8] = [
        Self::Protein,
        Self::Fat,
        Self::SaturatedFat,
        Self::Carbohydrates,
        Self::Sugars,
        Self::Fiber,
        Self::Sodium,
        Self::Salt,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_method_round_trip() {
        for m in [ScanMethod::Barcode, ScanMethod::Ocr] {
            assert_eq!(m.as_str().parse::<ScanMethod>().unwrap(), m);
        }
        let err = "manual".parse::<ScanMethod>().unwrap_err();
        assert_eq!(err.field, "ScanMethod");
        assert_eq!(err.value, "manual");
    }

    #[test]
    fn nutrient_serializes_snake_case() {
        let json = serde_json::to_string(&Nutrient::SaturatedFat).unwrap();
        assert_eq!(json, "\"saturated_fat\"");
        assert_eq!("saturated_fat".parse::<Nutrient>().unwrap(), Nutrient::SaturatedFat);
    }

    #[test]
    fn nutrient_all_in_declaration_order() {
        let mut sorted = Nutrient::ALL;
        sorted.sort();
        assert_eq!(sorted, Nutrient::ALL);
    }
}
