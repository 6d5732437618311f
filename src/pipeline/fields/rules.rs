//! Ordered pattern tables. Each table is evaluated top to bottom; the first
//! rule whose matcher hits and whose extractor accepts the capture wins.
//!
//! Matchers run on case-folded text. Captured spans are sliced out of the
//! original text using the same byte offsets, so `fold_case` must keep every
//! character's UTF-8 length unchanged.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::enums::Nutrient;
use crate::models::extraction::{dedup_case_insensitive, NutrientValue};

/// A (matcher, extractor) pair.
pub struct Rule<T> {
    pub name: &'static str,
    pub matcher: Regex,
    pub extract: fn(&Captures<'_>, &str) -> Option<T>,
}

impl<T> Rule<T> {
    fn new(name: &'static str, pattern: &str, extract: fn(&Captures<'_>, &str) -> Option<T>) -> Self {
        Self {
            name,
            matcher: Regex::new(pattern).unwrap(),
            extract,
        }
    }

    /// First match in `folded` that the extractor accepts.
    pub fn apply(&self, folded: &str, original: &str) -> Option<T> {
        self.matcher
            .captures_iter(folded)
            .find_map(|caps| (self.extract)(&caps, original))
    }
}

/// Evaluate `rules` in order; return the winning rule name and its value.
pub fn first_match<T>(rules: &[Rule<T>], folded: &str, original: &str) -> Option<(&'static str, T)> {
    rules
        .iter()
        .find_map(|rule| rule.apply(folded, original).map(|value| (rule.name, value)))
}

/// Lowercase each character whose lowercase form is a single character of the
/// same encoded length. Anything else (e.g. `İ`, the Kelvin sign) is left as is.
pub fn fold_case(text: &str) -> String {
    text.chars()
        .map(|c| {
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(l), None) if l.len_utf8() == c.len_utf8() => l,
                _ => c,
            }
        })
        .collect()
}

/// `1,200` style thousands grouping.
static GROUPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(?:,\d{3})+(?:\.\d+)?$").unwrap());

/// Decimal point, decimal comma, or comma-grouped thousands. A comma
/// followed by exactly three digits groups; one or two digits is a decimal.
pub fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let normalized = if GROUPED.is_match(raw) {
        raw.replace(',', "")
    } else {
        raw.replace(',', ".")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn span<'a>(caps: &Captures<'_>, group: &str, original: &'a str) -> Option<&'a str> {
    let m = caps.name(group)?;
    original.get(m.range())
}

const NUMBER: &str = r"(?P<value>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?)";

// ═══════════════════════════════════════════════════════════
// Calories
// ═══════════════════════════════════════════════════════════

fn capture_kcal(caps: &Captures<'_>, _original: &str) -> Option<f64> {
    parse_number(caps.name("value")?.as_str())
}

pub static CALORIE_RULES: LazyLock<Vec<Rule<f64>>> = LazyLock::new(|| {
    vec![
        Rule::new(
            "calories_label",
            &format!(r"\bcalories?\b[\s:\-]*{NUMBER}"),
            capture_kcal,
        ),
        Rule::new(
            "energy_kcal",
            &format!(r"\benergy\b[^\n]*?\b{NUMBER}\s*kcal\b"),
            capture_kcal,
        ),
        Rule::new(
            "caloric_value",
            &format!(r"\bcaloric\s+value\b[\s:\-]*{NUMBER}"),
            capture_kcal,
        ),
        Rule::new("bare_kcal", &format!(r"\b{NUMBER}\s*k?cal\b"), capture_kcal),
    ]
});

// ═══════════════════════════════════════════════════════════
// Serving size
// ═══════════════════════════════════════════════════════════

const QUANTITY: &str = r"(?P<value>\d+(?:[.,]\d+)?\s*(?:mg|kg|g|ml|cl|l|fl\.?\s*oz|oz|cups?|pieces?|slices?|tbsp|tsp)\b(?:\s*\([^)\n]*\))?)";

fn capture_span(caps: &Captures<'_>, original: &str) -> Option<String> {
    let value = span(caps, "value", original)?
        .trim()
        .trim_end_matches(['.', ',', ';'])
        .trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub static SERVING_RULES: LazyLock<Vec<Rule<String>>> = LazyLock::new(|| {
    vec![
        Rule::new(
            "serving_size_quantity",
            &format!(r"\bserving\s+size\b[\s:\-]*{QUANTITY}"),
            capture_span,
        ),
        Rule::new(
            "serving_size_line",
            r"\bserving\s+size\b[\s:\-]*(?P<value>[^\n]+)",
            capture_span,
        ),
        Rule::new("portion", r"\bportion\b[\s:\-]*(?P<value>[^\n]+)", capture_span),
        Rule::new("per_quantity", &format!(r"\bper\s+{QUANTITY}"), capture_span),
    ]
});

// ═══════════════════════════════════════════════════════════
// Ingredients
// ═══════════════════════════════════════════════════════════

/// A labelled ingredient section with its split, deduplicated items.
#[derive(Debug, Clone, PartialEq)]
pub struct IngredientSection {
    /// Section text with whitespace collapsed.
    pub raw: String,
    pub list: Vec<String>,
}

/// Reads the section after the label. A label with no items behind it
/// (e.g. "made with natural ingredients.") is rejected so later matches
/// get their turn.
fn capture_section(caps: &Captures<'_>, original: &str) -> Option<IngredientSection> {
    let start = caps.get(0)?.end();
    let end = ingredient_section_end(original, start);
    let section = original.get(start..end)?;
    let list = dedup_case_insensitive(split_ingredients(section));
    if list.is_empty() {
        return None;
    }
    Some(IngredientSection {
        raw: section.split_whitespace().collect::<Vec<_>>().join(" "),
        list,
    })
}

pub static INGREDIENT_RULES: LazyLock<Vec<Rule<IngredientSection>>> = LazyLock::new(|| {
    vec![
        Rule::new("ingredients_colon", r"\bingredients?\s*:\s*", capture_section),
        Rule::new("ingredients_label", r"\bingredients?\b\s*-?\s*", capture_section),
        Rule::new("contains_label", r"\bcontains?\s*:\s*", capture_section),
    ]
});

/// Labels that open a new section and so end an ingredient list. `contains`
/// only counts with a colon; "contains 2% or less of" is part of the list.
static SECTION_TERMINATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:serving\s+size|nutrition(?:al)?\s+(?:facts|information|info|declaration)|calories|energy|allergens?|may\s+contain|best\s+before|use\s+by|net\s+(?:wt|weight)|storage|store\s+in|directions|manufactured|distributed|per\s+100)\b|\bcontains\s*:|\.(?:\s|$)",
    )
    .unwrap()
});

/// A following line that opens with an all-caps word reads as a new heading.
static HEADING_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\p{Lu}{2,}").unwrap());

/// End offset of the ingredient section starting at `start` in `original`.
pub fn ingredient_section_end(original: &str, start: usize) -> usize {
    let Some(tail) = original.get(start..) else {
        return original.len();
    };
    let by_label = SECTION_TERMINATOR
        .find(&fold_case(tail))
        .map(|m| start + m.start());
    let by_heading = HEADING_LINE.find(tail).map(|m| start + m.start());
    [by_label, by_heading]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(original.len())
}

/// Split on commas and semicolons outside parentheses.
pub fn split_ingredients(section: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in section.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' | ';' if depth == 0 => items.push(std::mem::take(&mut current)),
            '\n' => current.push(' '),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .into_iter()
        .map(|item| {
            item.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .trim_matches(|c: char| c == '.' || c == ':' || c == '-')
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Nutrients
// ═══════════════════════════════════════════════════════════

const AMOUNT: &str =
    r"[\s:\-<~]*(?P<value>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?)\s*(?P<unit>mg|mcg|µg|g)\b";

fn capture_amount(caps: &Captures<'_>, _original: &str) -> Option<NutrientValue> {
    if caps.name("skip").is_some() {
        return None;
    }
    let value = parse_number(caps.name("value")?.as_str())?;
    let unit = match caps.name("unit")?.as_str() {
        "µg" => "mcg",
        other => other,
    };
    Some(NutrientValue {
        value,
        unit: unit.to_string(),
    })
}

fn nutrient_rules(labels: &[(&'static str, &str)]) -> Vec<Rule<NutrientValue>> {
    labels
        .iter()
        .map(|&(name, label)| Rule::new(name, &format!(r"{label}{AMOUNT}"), capture_amount))
        .collect()
}

/// Per-nutrient ordered rule lists, in `Nutrient` declaration order.
pub static NUTRIENT_RULES: LazyLock<Vec<(Nutrient, Vec<Rule<NutrientValue>>)>> =
    LazyLock::new(|| {
        vec![
            (
                Nutrient::Protein,
                nutrient_rules(&[("protein", r"\bproteins?\b")]),
            ),
            (
                Nutrient::Fat,
                nutrient_rules(&[
                    ("total_fat", r"\btotal\s+fats?\b"),
                    // A `saturated`/`trans` qualifier belongs to another nutrient.
                    ("fat", r"(?:\b(?P<skip>saturated|sat\.|trans|poly\w*|mono\w*)\s+)?\bfats?\b"),
                ]),
            ),
            (
                Nutrient::SaturatedFat,
                nutrient_rules(&[
                    ("saturated_fat", r"\bsaturated\s+fat(?:s|ty\s+acids)?\b"),
                    ("sat_fat", r"\bsat\.?\s*fats?\b"),
                    ("saturates", r"\bsaturates\b"),
                ]),
            ),
            (
                Nutrient::Carbohydrates,
                nutrient_rules(&[
                    ("carbohydrate", r"\b(?:total\s+)?carbohydrates?\b"),
                    ("carbs", r"\bcarbs?\b"),
                ]),
            ),
            (
                Nutrient::Sugars,
                nutrient_rules(&[("sugars", r"\b(?:total\s+)?sugars?\b")]),
            ),
            (
                Nutrient::Fiber,
                nutrient_rules(&[("fiber", r"\b(?:dietary\s+)?fib(?:er|re)s?\b")]),
            ),
            (Nutrient::Sodium, nutrient_rules(&[("sodium", r"\bsodium\b")])),
            (Nutrient::Salt, nutrient_rules(&[("salt", r"\bsalt\b")])),
        ]
    });

#[cfg(test)]
mod tests {
    use super::*;

    fn run<T>(rules: &[Rule<T>], text: &str) -> Option<(&'static str, T)> {
        let folded = fold_case(text);
        first_match(rules, &folded, text)
    }

    #[test]
    fn fold_case_preserves_byte_offsets() {
        for text in ["Calories: 250 KCAL", "İÇİNDEKİLER: Şeker", "\u{212A}cal ÄÖÜ"] {
            assert_eq!(fold_case(text).len(), text.len(), "{text}");
        }
        assert_eq!(fold_case("SUGAR Ş"), "sugar ş");
    }

    #[test]
    fn parses_decimal_comma() {
        assert_eq!(parse_number("2,5"), Some(2.5));
        assert_eq!(parse_number("9,75"), Some(9.75));
        assert_eq!(parse_number("12"), Some(12.0));
        assert_eq!(parse_number("x"), None);
    }

    #[test]
    fn parses_thousands_grouping() {
        assert_eq!(parse_number("1,200"), Some(1200.0));
        assert_eq!(parse_number("12,345,678"), Some(12_345_678.0));
        assert_eq!(parse_number("1,050.5"), Some(1050.5));
        assert_eq!(parse_number("1,2345"), Some(1.2345));
    }

    #[test]
    fn grouped_amounts_captured_whole() {
        assert_eq!(run(&CALORIE_RULES, "Calories 1,050"), Some(("calories_label", 1050.0)));
        let rules = &NUTRIENT_RULES
            .iter()
            .find(|(n, _)| *n == Nutrient::Sodium)
            .unwrap()
            .1;
        let (_, sodium) = run(rules, "Sodium 1,200mg").unwrap();
        assert_eq!(sodium, NutrientValue { value: 1200.0, unit: "mg".into() });
    }

    #[test]
    fn calorie_rules_in_priority_order() {
        assert_eq!(run(&CALORIE_RULES, "Calories: 250 kcal"), Some(("calories_label", 250.0)));
        assert_eq!(
            run(&CALORIE_RULES, "Energy 1046 kJ / 250 kcal"),
            Some(("energy_kcal", 250.0))
        );
        assert_eq!(run(&CALORIE_RULES, "Caloric value: 98.5"), Some(("caloric_value", 98.5)));
        assert_eq!(run(&CALORIE_RULES, "per bar 180 kcal"), Some(("bare_kcal", 180.0)));
        assert_eq!(run(&CALORIE_RULES, "Energy 1046 kJ"), None);
    }

    #[test]
    fn serving_prefers_quantity_over_rest_of_line() {
        assert_eq!(
            run(&SERVING_RULES, "Serving size: 30g (2 biscuits) Calories 140").map(|m| m.1),
            Some("30g (2 biscuits)".to_string())
        );
        assert_eq!(
            run(&SERVING_RULES, "Serving Size: one cup").map(|m| m.1),
            Some("one cup".to_string())
        );
        assert_eq!(
            run(&SERVING_RULES, "Nutrition per 100 ml").map(|m| m.1),
            Some("100 ml".to_string())
        );
    }

    #[test]
    fn span_is_taken_from_original_case() {
        assert_eq!(
            run(&SERVING_RULES, "SERVING SIZE: 2 Tbsp").map(|m| m.1),
            Some("2 Tbsp".to_string())
        );
    }

    #[test]
    fn ingredient_section_stops_at_next_label() {
        let (rule, section) =
            run(&INGREDIENT_RULES, "Ingredients: wheat flour, sugar Serving size: 100g").unwrap();
        assert_eq!(rule, "ingredients_colon");
        assert_eq!(section.raw, "wheat flour, sugar");
        assert_eq!(section.list, vec!["wheat flour", "sugar"]);
    }

    #[test]
    fn ingredient_section_stops_at_heading_line() {
        let (_, section) = run(&INGREDIENT_RULES, "Ingredients: oats, honey\nNUTRITION per bar").unwrap();
        assert_eq!(section.raw, "oats, honey");
    }

    #[test]
    fn empty_ingredient_mention_gives_way_to_labelled_list() {
        let text = "Made with natural ingredients.\nINGREDIENTS: oats, honey, almonds";
        let (_, section) = run(&INGREDIENT_RULES, text).unwrap();
        assert_eq!(section.list, vec!["oats", "honey", "almonds"]);

        let text = "Made with natural ingredients.\nIngredients - oats, honey";
        let (rule, section) = run(&INGREDIENT_RULES, text).unwrap();
        assert_eq!(rule, "ingredients_label");
        assert_eq!(section.list, vec!["oats", "honey"]);
    }

    #[test]
    fn bare_ingredient_word_used_when_no_colon_label() {
        let (rule, section) = run(&INGREDIENT_RULES, "INGREDIENTS - rice, water").unwrap();
        assert_eq!(rule, "ingredients_label");
        assert_eq!(section.list, vec!["rice", "water"]);
    }

    #[test]
    fn contains_without_colon_stays_in_list() {
        let text = "INGREDIENTS: ENRICHED FLOUR, SUGAR, CONTAINS 2% OR LESS OF SALT, YEAST";
        let (_, section) = run(&INGREDIENT_RULES, text).unwrap();
        assert_eq!(
            section.list,
            vec!["ENRICHED FLOUR", "SUGAR", "CONTAINS 2% OR LESS OF SALT", "YEAST"]
        );
    }

    #[test]
    fn contains_with_colon_ends_list() {
        let (_, section) = run(&INGREDIENT_RULES, "Ingredients: flour, butter Contains: milk").unwrap();
        assert_eq!(section.list, vec!["flour", "butter"]);
    }

    #[test]
    fn split_keeps_parenthesised_groups() {
        assert_eq!(
            split_ingredients("vegetable oil (palm, sunflower), salt; ; emulsifier: lecithin."),
            vec!["vegetable oil (palm, sunflower)", "salt", "emulsifier: lecithin"]
        );
    }

    #[test]
    fn fat_rule_skips_saturated_mention() {
        let rules = &NUTRIENT_RULES
            .iter()
            .find(|(n, _)| *n == Nutrient::Fat)
            .unwrap()
            .1;
        let (_, fat) = run(rules, "Saturated fat 3g, Fat 10g").unwrap();
        assert_eq!(fat.value, 10.0);
        assert_eq!(fat.unit, "g");
    }

    #[test]
    fn sodium_keeps_milligrams() {
        let rules = &NUTRIENT_RULES
            .iter()
            .find(|(n, _)| *n == Nutrient::Sodium)
            .unwrap()
            .1;
        let (_, sodium) = run(rules, "Sodium: 140mg").unwrap();
        assert_eq!(sodium, NutrientValue { value: 140.0, unit: "mg".into() });
    }
}
