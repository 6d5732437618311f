use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// Canonical allergen name and the whole-word aliases that map to it.
pub struct AllergenEntry {
    pub name: &'static str,
    pub matcher: Regex,
}

const VOCABULARY: &[(&str, &str)] = &[
    ("milk", r"milk|dairy|lactose|whey|casein"),
    ("eggs", r"eggs?"),
    ("fish", r"fish"),
    ("shellfish", r"shellfish|crustaceans?|shrimps?|prawns?|crab|lobster"),
    ("tree nuts", r"tree\s+nuts?|nuts|almonds?|hazelnuts?|walnuts?|cashews?|pecans?|pistachios?"),
    ("peanuts", r"peanuts?|groundnuts?"),
    ("wheat", r"wheat"),
    ("soy", r"soy|soya|soybeans?"),
    ("gluten", r"gluten"),
    ("sesame", r"sesame"),
    ("mustard", r"mustard"),
    ("celery", r"celery"),
    ("lupin", r"lupin"),
    ("sulphites", r"sulphites?|sulfites?|sulphur\s+dioxide"),
];

pub static ALLERGENS: LazyLock<Vec<AllergenEntry>> = LazyLock::new(|| {
    VOCABULARY
        .iter()
        .map(|&(name, aliases)| AllergenEntry {
            name,
            matcher: Regex::new(&format!(r"\b(?:{aliases})\b")).unwrap(),
        })
        .collect()
});

/// Dedicated allergen statements, in priority order.
static SECTION_LABELS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\ballergens?(?:\s+information)?\s*:",
        r"\bcontains\s*:",
        r"\bmay\s+contain(?:\s+traces\s+of)?\s*:?",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// A section runs to the end of its line. A period ends it early only when
/// the next sentence opens another label, so "allergens: milk. wheat." keeps
/// both entries.
static SECTION_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\n|\.\s*$|\.\s+(?:ingredients?|nutrition(?:al)?|allergens?|contains|may\s+contain|made\s+in|produced|manufactured|packed|distributed|best\s+before|use\s+by|stor(?:e|age)|keep|net\s+(?:wt|weight)|serving|energy|calories)\b",
    )
    .unwrap()
});

/// Byte ranges of every labeled allergen section in `folded`, in text order.
pub fn allergen_sections(folded: &str) -> Vec<Range<usize>> {
    let mut sections: Vec<Range<usize>> = SECTION_LABELS
        .iter()
        .flat_map(|label| label.find_iter(folded))
        .map(|m| {
            let end = SECTION_END
                .find(&folded[m.end()..])
                .map_or(folded.len(), |e| m.end() + e.start());
            m.end()..end
        })
        .collect();
    sections.sort_by_key(|r| r.start);
    sections.dedup_by(|later, earlier| later.start < earlier.end);
    sections
}

/// Canonical allergens found in `folded` within `ranges`, ordered by first
/// occurrence. Each canonical name appears at most once.
pub fn find_allergens(folded: &str, ranges: &[Range<usize>]) -> Vec<String> {
    let mut hits: Vec<(usize, &'static str)> = ALLERGENS
        .iter()
        .filter_map(|entry| {
            ranges
                .iter()
                .filter_map(|range| {
                    entry
                        .matcher
                        .find(&folded[range.clone()])
                        .map(|m| range.start + m.start())
                })
                .min()
                .map(|pos| (pos, entry.name))
        })
        .collect();
    hits.sort_by_key(|&(pos, _)| pos);
    hits.into_iter().map(|(_, name)| name.to_string()).collect()
}
