use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::enums::Nutrient;

/// Energy per 100 g (barcode path) or as printed (OCR path), in kcal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaloriesField {
    #[serde(serialize_with = "whole_number::option")]
    pub value: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "whole_number::option"
    )]
    pub value_per_serving: Option<f64>,
    pub unit: String,
    pub found: bool,
}

impl Default for CaloriesField {
    fn default() -> Self {
        Self {
            value: None,
            value_per_serving: None,
            unit: "kcal".to_string(),
            found: false,
        }
    }
}

impl CaloriesField {
    pub fn kcal(value: f64) -> Self {
        Self {
            value: Some(value),
            found: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServingSizeField {
    pub value: Option<String>,
    pub found: bool,
}

impl ServingSizeField {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            found: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngredientsField {
    pub list: Vec<String>,
    /// Captured section text before splitting.
    pub raw: Option<String>,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientValue {
    #[serde(serialize_with = "whole_number::serialize")]
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllergensField {
    pub list: Vec<String>,
    pub found: bool,
}

impl AllergensField {
    pub fn from_list(list: Vec<String>) -> Self {
        Self {
            found: !list.is_empty(),
            list,
        }
    }
}

/// Fixed-shape record produced by field extraction. Every top-level field is
/// always serialized; absence is `found: false`. `nutrition_facts` is sparse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRecord {
    pub calories: CaloriesField,
    pub serving_size: ServingSizeField,
    pub ingredients: IngredientsField,
    pub nutrition_facts: BTreeMap<Nutrient, NutrientValue>,
    pub allergens: AllergensField,
}

impl ExtractionRecord {
    /// Names of the top-level fields that were found, for logging.
    pub fn found_fields(&self) -> Vec<&'static str> {
        let mut found = Vec::new();
        if self.calories.found {
            found.push("calories");
        }
        if self.serving_size.found {
            found.push("servingSize");
        }
        if self.ingredients.found {
            found.push("ingredients");
        }
        if !self.nutrition_facts.is_empty() {
            found.push("nutritionFacts");
        }
        if self.allergens.found {
            found.push("allergens");
        }
        found
    }
}

/// Integral amounts serialize as JSON integers (`250`, not `250.0`).
mod whole_number {
    use serde::Serializer;

    /// Largest magnitude an `f64` holds without losing integer precision.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.fract() == 0.0 && value.abs() <= MAX_EXACT {
            serializer.serialize_i64(*value as i64)
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn option<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// Case-insensitive dedup, first occurrence kept.
pub fn dedup_case_insensitive<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_record_keeps_every_field() {
        let value = serde_json::to_value(ExtractionRecord::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "calories": {"value": null, "unit": "kcal", "found": false},
                "servingSize": {"value": null, "found": false},
                "ingredients": {"list": [], "raw": null, "found": false},
                "nutritionFacts": {},
                "allergens": {"list": [], "found": false}
            })
        );
    }

    #[test]
    fn nutrition_facts_keyed_by_snake_case_name() {
        let mut record = ExtractionRecord::default();
        record.nutrition_facts.insert(
            Nutrient::SaturatedFat,
            NutrientValue {
                value: 1.5,
                unit: "g".into(),
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["nutritionFacts"]["saturated_fat"]["value"], json!(1.5));
    }

    #[test]
    fn per_serving_calories_only_when_known() {
        let mut calories = CaloriesField::kcal(250.0);
        assert!(serde_json::to_value(&calories).unwrap().get("valuePerServing").is_none());
        calories.value_per_serving = Some(75.0);
        assert_eq!(serde_json::to_value(&calories).unwrap()["valuePerServing"], json!(75));
    }

    #[test]
    fn whole_amounts_serialize_without_fraction() {
        let json = serde_json::to_string(&CaloriesField::kcal(250.0)).unwrap();
        assert_eq!(json, r#"{"value":250,"unit":"kcal","found":true}"#);

        let sodium = NutrientValue { value: 140.0, unit: "mg".into() };
        assert_eq!(serde_json::to_string(&sodium).unwrap(), r#"{"value":140,"unit":"mg"}"#);
        let fat = NutrientValue { value: 9.5, unit: "g".into() };
        assert_eq!(serde_json::to_string(&fat).unwrap(), r#"{"value":9.5,"unit":"g"}"#);

        let back: CaloriesField = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CaloriesField::kcal(250.0));
    }

    #[test]
    fn dedup_keeps_first_spelling() {
        let items = vec!["Wheat".to_string(), "sugar".into(), "wheat".into(), "SUGAR".into()];
        assert_eq!(dedup_case_insensitive(items), vec!["Wheat", "sugar"]);
    }

    #[test]
    fn found_fields_lists_present_fields() {
        let record = ExtractionRecord {
            calories: CaloriesField::kcal(90.0),
            allergens: AllergensField::from_list(vec!["milk".into()]),
            ..Default::default()
        };
        assert_eq!(record.found_fields(), vec!["calories", "allergens"]);
    }
}
