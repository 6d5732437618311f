//! Field extraction: recognized label text → `ExtractionRecord`.
//!
//! Each field is extracted independently from the same case-folded copy of
//! the text. A field whose rules all miss is reported with `found: false`.

pub mod allergens;
pub mod rules;

use std::collections::BTreeMap;

use crate::models::extraction::{
    AllergensField, CaloriesField, ExtractionRecord, IngredientsField, NutrientValue,
    ServingSizeField,
};
use crate::models::enums::Nutrient;

use rules::{
    first_match, fold_case, CALORIE_RULES, INGREDIENT_RULES, NUTRIENT_RULES, SERVING_RULES,
};

/// Stateless; holds no per-request data and can be shared freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> ExtractionRecord {
        let folded = fold_case(text);
        let record = ExtractionRecord {
            calories: extract_calories(&folded, text),
            serving_size: extract_serving_size(&folded, text),
            ingredients: extract_ingredients(&folded, text),
            nutrition_facts: extract_nutrients(&folded, text),
            allergens: extract_allergens(&folded),
        };
        tracing::debug!(
            found = ?record.found_fields(),
            nutrients = record.nutrition_facts.len(),
            ingredients = record.ingredients.list.len(),
            allergens = record.allergens.list.len(),
            "Field extraction complete"
        );
        record
    }
}

fn extract_calories(folded: &str, original: &str) -> CaloriesField {
    match first_match(&CALORIE_RULES, folded, original) {
        Some((rule, value)) => {
            tracing::trace!(rule, value, "Calories matched");
            CaloriesField::kcal(value)
        }
        None => CaloriesField::default(),
    }
}

fn extract_serving_size(folded: &str, original: &str) -> ServingSizeField {
    first_match(&SERVING_RULES, folded, original)
        .map(|(_, value)| ServingSizeField::new(value))
        .unwrap_or_default()
}

fn extract_ingredients(folded: &str, original: &str) -> IngredientsField {
    match first_match(&INGREDIENT_RULES, folded, original) {
        Some((rule, section)) => {
            tracing::trace!(rule, items = section.list.len(), "Ingredients matched");
            IngredientsField {
                list: section.list,
                raw: Some(section.raw),
                found: true,
            }
        }
        None => IngredientsField::default(),
    }
}

fn extract_nutrients(folded: &str, original: &str) -> BTreeMap<Nutrient, NutrientValue> {
    NUTRIENT_RULES
        .iter()
        .filter_map(|(nutrient, rules)| {
            first_match(rules, folded, original).map(|(_, value)| (*nutrient, value))
        })
        .collect()
}

/// Dedicated "contains:"/"allergens:" sections win; the whole text is
/// scanned only when no such section exists.
fn extract_allergens(folded: &str) -> AllergensField {
    let sections = allergens::allergen_sections(folded);
    let ranges = if sections.is_empty() {
        vec![0..folded.len()]
    } else {
        sections
    };
    AllergensField::from_list(allergens::find_allergens(folded, &ranges))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_A: &str = "Calories: 250 kcal Ingredients: wheat flour, sugar Serving size: 100g";

    #[test]
    fn scenario_a_single_line_label() {
        let record = FieldExtractor::new().extract(SCENARIO_A);
        assert_eq!(record.calories, CaloriesField::kcal(250.0));
        assert_eq!(record.calories.unit, "kcal");
        assert_eq!(record.ingredients.list, vec!["wheat flour", "sugar"]);
        assert!(record.ingredients.found);
        assert_eq!(record.serving_size.value.as_deref(), Some("100g"));
        assert!(record.serving_size.found);
    }

    #[test]
    fn extraction_is_idempotent() {
        let extractor = FieldExtractor::new();
        let text = "NUTRITION FACTS\nServing Size 2/3 cup (55g)\nCalories 230\nTotal Fat 8g\nSaturated Fat 1g\nSodium 160mg\nTotal Carbohydrate 37g\nDietary Fiber 4g\nSugars 12g\nProtein 3g\nINGREDIENTS: Oats, Honey, Almonds.\nContains: tree nuts.";
        let first = serde_json::to_vec(&extractor.extract(text)).unwrap();
        let second = serde_json::to_vec(&extractor.extract(text)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn us_nutrition_panel() {
        let text = "Serving Size 2/3 cup (55g)\nCalories 230\nTotal Fat 8g\nSaturated Fat 1g\nSodium 160mg\nTotal Carbohydrate 37g\nDietary Fiber 4g\nSugars 12g\nProtein 3g";
        let record = FieldExtractor::new().extract(text);
        assert_eq!(record.calories.value, Some(230.0));
        assert_eq!(record.serving_size.value.as_deref(), Some("2/3 cup (55g)"));
        let facts = &record.nutrition_facts;
        assert_eq!(facts[&Nutrient::Fat].value, 8.0);
        assert_eq!(facts[&Nutrient::SaturatedFat].value, 1.0);
        assert_eq!(facts[&Nutrient::Sodium], NutrientValue { value: 160.0, unit: "mg".into() });
        assert_eq!(facts[&Nutrient::Carbohydrates].value, 37.0);
        assert_eq!(facts[&Nutrient::Fiber].value, 4.0);
        assert_eq!(facts[&Nutrient::Sugars].value, 12.0);
        assert_eq!(facts[&Nutrient::Protein].value, 3.0);
        assert!(!facts.contains_key(&Nutrient::Salt));
    }

    #[test]
    fn eu_panel_with_decimal_commas() {
        let text = "Energy 1046 kJ / 250 kcal\nFat 9,5 g\nof which saturates 2,1 g\nSalt 0,8 g";
        let record = FieldExtractor::new().extract(text);
        assert_eq!(record.calories.value, Some(250.0));
        assert_eq!(record.nutrition_facts[&Nutrient::Fat].value, 9.5);
        assert_eq!(record.nutrition_facts[&Nutrient::SaturatedFat].value, 2.1);
        assert_eq!(record.nutrition_facts[&Nutrient::Salt].value, 0.8);
    }

    #[test]
    fn repeated_allergen_reported_once() {
        let record = FieldExtractor::new().extract("Wheat flour, whole wheat, sugar");
        assert_eq!(record.allergens.list, vec!["wheat"]);
        assert!(record.allergens.found);
    }

    #[test]
    fn allergen_section_takes_precedence_over_full_text() {
        let text = "Ingredients: wheat flour, sugar, eggs. Contains: milk, soy.";
        let record = FieldExtractor::new().extract(text);
        assert_eq!(record.allergens.list, vec!["milk", "soy"]);
    }

    #[test]
    fn duplicate_ingredients_removed_case_insensitively() {
        let record = FieldExtractor::new().extract("Ingredients: Sugar, cocoa, SUGAR, salt");
        assert_eq!(record.ingredients.list, vec!["Sugar", "cocoa", "salt"]);
    }

    #[test]
    fn slogan_before_ingredient_list_is_skipped() {
        let text = "Made with natural ingredients.\nINGREDIENTS: oats, honey, almonds";
        let record = FieldExtractor::new().extract(text);
        assert!(record.ingredients.found);
        assert_eq!(record.ingredients.list, vec!["oats", "honey", "almonds"]);
        assert_eq!(record.ingredients.raw.as_deref(), Some("oats, honey, almonds"));
    }

    #[test]
    fn us_less_than_clause_kept_in_ingredients() {
        let record = FieldExtractor::new()
            .extract("INGREDIENTS: ENRICHED FLOUR, SUGAR, CONTAINS 2% OR LESS OF SALT, YEAST");
        assert_eq!(record.ingredients.list.len(), 4);
        assert_eq!(record.ingredients.list.last().map(String::as_str), Some("YEAST"));
    }

    #[test]
    fn thousands_separators_read_as_grouping() {
        let record = FieldExtractor::new().extract("Sodium 1,200mg\nCalories 1,050");
        assert_eq!(record.calories.value, Some(1050.0));
        assert_eq!(
            record.nutrition_facts[&Nutrient::Sodium],
            NutrientValue { value: 1200.0, unit: "mg".into() }
        );
    }

    #[test]
    fn nothing_found_keeps_full_schema() {
        let record = FieldExtractor::new().extract("lorem ipsum dolor");
        assert_eq!(record, ExtractionRecord::default());
        assert!(record.found_fields().is_empty());
    }
}
