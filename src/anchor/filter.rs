//! Filtered-view construction for the anchor engine (SPEC_FULL.md §4.C).

/// Lowercase, punctuation-stripped, diacritic-folded projection of a token
/// list, with index maps back to the original (unfiltered) positions.
///
/// Tokens that normalize to empty are dropped entirely from `filtered`, so
/// `filtered.len() <= original_len` and `filtered_to_original[i]` always
/// points at a non-empty original token.
#[derive(Debug, Clone, Default)]
pub struct FilteredView {
    pub filtered: Vec<String>,
    pub filtered_to_original: Vec<usize>,
    pub original_to_filtered: Vec<Option<usize>>,
}

impl FilteredView {
    pub fn build<'a>(tokens: impl IntoIterator<Item = &'a str>) -> FilteredView {
        let mut filtered = Vec::new();
        let mut filtered_to_original = Vec::new();
        let mut original_to_filtered = Vec::new();

        for (original_index, token) in tokens.into_iter().enumerate() {
            let normalized = normalize_token(token);
            if normalized.is_empty() {
                original_to_filtered.push(None);
                continue;
            }
            original_to_filtered.push(Some(filtered.len()));
            filtered_to_original.push(original_index);
            filtered.push(normalized);
        }

        FilteredView { filtered, filtered_to_original, original_to_filtered }
    }

    pub fn len(&self) -> usize {
        self.filtered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }
}

/// Lowercases, strips punctuation, and folds a small set of common Latin
/// diacritics so "café" and "cafe" (or "Café," with trailing punctuation)
/// compare equal. Tokens that are pure punctuation normalize to the empty
/// string and are dropped by the caller.
pub fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter_map(fold_char)
        .collect::<String>()
        .to_lowercase()
}

fn fold_char(c: char) -> Option<char> {
    if c.is_alphanumeric() {
        Some(fold_diacritic(c))
    } else if c == '\'' || c == '\u{2019}' {
        // Keep apostrophes so contractions ("can't") survive normalization
        // and remain distinguishable from their expansion in the
        // equivalence map (§4.D).
        Some('\'')
    } else {
        None
    }
}

/// Best-effort ASCII folding for the common accented Latin letters a book
/// manuscript is likely to contain. Not a full Unicode normalization (no
/// `unicode-normalization` dependency is carried), but covers the bulk of
/// narrated-fiction text.
fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        other => other,
    }
}
