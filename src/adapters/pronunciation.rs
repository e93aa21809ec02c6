//! Pronunciation adapter contract (SPEC_FULL.md §4.B: "optionally populate
//! per-word phonemes from a `PronunciationProvider` adapter").

#[cfg(test)]
use mockall::automock;

/// Looks up a phoneme sequence for a single book token. Implementations
/// might wrap a CMUdict lookup, a G2P model, or (as here) nothing at all.
#[cfg_attr(test, automock)]
pub trait PronunciationProvider: Send + Sync {
    fn phonemes_for(&self, token: &str) -> Option<Vec<String>>;
}

/// The default provider: the book indexer runs with `populate_phonemes:
/// false` unless a real provider is wired in, so this is what gets used
/// when no adapter is configured.
pub struct NullPronunciationProvider;

impl PronunciationProvider for NullPronunciationProvider {
    fn phonemes_for(&self, _token: &str) -> Option<Vec<String>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_provider_never_produces_phonemes() {
        assert_eq!(NullPronunciationProvider.phonemes_for("hello"), None);
    }

    #[test]
    fn mocked_provider_returns_configured_phonemes() {
        let mut mock = MockPronunciationProvider::new();
        mock.expect_phonemes_for()
            .withf(|token| token == "hello")
            .returning(|_| Some(vec!["HH".into(), "AH0".into(), "L".into(), "OW1".into()]));

        assert_eq!(mock.phonemes_for("hello"), Some(vec!["HH".into(), "AH0".into(), "L".into(), "OW1".into()]));
    }
}
