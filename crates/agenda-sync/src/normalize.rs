//! Case folding and diacritic stripping shared by every text rule.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercases, decomposes (NFD) and drops combining marks.
///
/// Total and idempotent: `normalize_text(&normalize_text(x)) == normalize_text(x)`.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// [`normalize_text`] treating an absent value as empty.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_lowercases() {
        assert_eq!(normalize_text("Théâtre Musée ÉTÉ"), "theatre musee ete");
        assert_eq!(normalize_text("Entrée libre, Çà et là"), "entree libre, ca et la");
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["Théâtre Musée ÉTÉ", "Besançon", "Noël à l'Opéra", "", "déjà vu 10€"] {
            let once = normalize_text(input);
            assert_eq!(normalize_text(&once), once);
        }
    }

    #[test]
    fn absent_text_is_empty() {
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_opt(Some("Nîmes")), "nimes");
    }
}
