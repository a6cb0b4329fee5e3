/// Clean recognized or uploaded text before validation and structuring.
///
/// Drops control and symbol noise, keeps the punctuation lab values use,
/// unifies line endings, trims each line and removes blank lines. Inner
/// spacing is kept: column gaps carry table structure.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .map(|c| if c == '\t' || c == '\u{a0}' { ' ' } else { c })
        .filter(|&c| c == '\n' || c == ' ' || c.is_alphanumeric() || is_lab_punctuation(c))
        .collect::<String>()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_lab_punctuation(c: char) -> bool {
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
            | '#'
            | '&'
            | '\''
            | '"'
            | '<'
            | '>'
            | '*'
            | '_'
            | '^'
            | '°'
            | '²'
            | '³'
            | 'µ'
            | '±'
            | '\u{2013}' // en dash
            | '\u{2014}' // em dash
            | '\u{2191}' // up arrow, flagged high
            | '\u{2193}' // down arrow, flagged low
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let raw = "Hemoglobin\x00 13.5\x01\x02 g/dL\nPCV 41";
        let clean = sanitize_extracted_text(raw);
        assert!(!clean.contains('\x00'));
        assert!(!clean.contains('\x01'));
        assert_eq!(clean, "Hemoglobin 13.5 g/dL\nPCV 41");
    }

    #[test]
    fn keeps_lab_punctuation() {
        let raw = "Platelets 2.5 x10^5/µL (1.5–4.1) ↑";
        assert_eq!(sanitize_extracted_text(raw), raw);
    }

    #[test]
    fn drops_symbol_noise() {
        assert_eq!(sanitize_extracted_text("|| ~~ MCV §§ 88 ¦"), "MCV  88");
    }

    #[test]
    fn trims_lines_and_drops_blank_ones() {
        let raw = "  Hemoglobin 13.5  \r\n\r\n\t\n   MCV   88 fL ";
        assert_eq!(sanitize_extracted_text(raw), "Hemoglobin 13.5\nMCV   88 fL");
    }

    #[test]
    fn tabs_become_spaces() {
        assert_eq!(sanitize_extracted_text("Hb\t13.5\tg/dL"), "Hb 13.5 g/dL");
    }

    #[test]
    fn empty_and_whitespace_input() {
        assert_eq!(sanitize_extracted_text(""), "");
        assert_eq!(sanitize_extracted_text(" \n\t\n "), "");
    }

    #[test]
    fn idempotent() {
        let once = sanitize_extracted_text("  WBC\x07 7,500 /cumm \n\n");
        assert_eq!(sanitize_extracted_text(&once), once);
    }
}
