/// Sanitize OCR text before field extraction.
/// Strips control characters and glyph noise, collapses runs of spaces,
/// trims lines, and drops empty lines. Label punctuation survives.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c == '\n' || c.is_alphanumeric() || c.is_whitespace() || is_label_punctuation(*c))
        .map(|c| if c == '\r' { '\n' } else { c })
        .collect::<String>()
        .lines()
        .map(collapse_spaces)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_label_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ','
            | ';'
            | ':'
            | '-'
            | '/'
            | '('
            | ')'
            | '['
            | ']'
            | '+'
            | '='
            | '%'
            | '&'
            | '\''
            | '"'
            | '!'
            | '?'
            | '*'
            | '_'
            | '<'
            | '>'
            | '°'
            | 'µ'
            | '\u{2013}' // En-dash
            | '\u{2019}' // Right single quotation mark
            | '\u{201C}' // Left double quotation mark
            | '\u{201D}' // Right double quotation mark
    )
}

fn collapse_spaces(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let raw = "Sugar 12g\x01\x02\x03\nSalt: 0.5g\x00";
        let clean = sanitize_extracted_text(raw);
        assert_eq!(clean, "Sugar 12g\nSalt: 0.5g");
    }

    #[test]
    fn drops_glyph_noise_keeps_label_punctuation() {
        let raw = "Fat: 3.5g (5%) ~|~ §§ Energy 1046 kJ/250 kcal";
        let clean = sanitize_extracted_text(raw);
        assert_eq!(clean, "Fat: 3.5g (5%) Energy 1046 kJ/250 kcal");
    }

    #[test]
    fn trims_and_removes_blank_lines() {
        let raw = "  INGREDIENTS:  wheat flour,   sugar  \n\n   \n\tSERVING SIZE 30g ";
        let clean = sanitize_extracted_text(raw);
        assert_eq!(clean, "INGREDIENTS: wheat flour, sugar\nSERVING SIZE 30g");
    }

    #[test]
    fn carriage_returns_become_line_breaks() {
        assert_eq!(sanitize_extracted_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn preserves_non_ascii_letters_and_units() {
        let raw = "İçindekiler: şeker, süt tozu 12µg 4°C";
        assert_eq!(sanitize_extracted_text(raw), raw);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(sanitize_extracted_text(""), "");
        assert_eq!(sanitize_extracted_text(" \n\t\x07 "), "");
    }
}
