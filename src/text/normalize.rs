use std::sync::LazyLock;

use regex_lite::Regex;

/// Anything starting with `http` or `www` up to the next whitespace.
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http\S+|www\S+").expect("valid URL regex"));

/// Everything outside lowercase ASCII letters, digits, whitespace, `#`, `$`.
static NOISE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s#$]").expect("valid noise regex"));

/// Normalize post text for embedding.
///
/// Lowercases, removes URLs, strips every character except `[a-z0-9]`,
/// whitespace, hashtags and cashtags, then trims the ends. Cashtags and
/// hashtags survive because they carry most of the campaign signal.
pub fn clean_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_urls = URL_PATTERN.replace_all(&lowered, "");
    let stripped = NOISE_PATTERN.replace_all(&without_urls, "");
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_trims() {
        assert_eq!(clean_text("  Hello World  "), "hello world");
    }

    #[test]
    fn test_strips_urls() {
        assert_eq!(
            clean_text("Buy now https://scam.example/x?y=1 before it moons"),
            "buy now  before it moons"
        );
        assert_eq!(clean_text("see www.example.com"), "see");
    }

    #[test]
    fn test_keeps_hashtags_and_cashtags() {
        assert_eq!(clean_text("$DOGE to the moon!!! #crypto 🚀"), "$doge to the moon #crypto");
    }

    #[test]
    fn test_strips_punctuation_and_accents() {
        assert_eq!(clean_text("Café, déjà-vu?"), "caf djvu");
    }

    #[test]
    fn test_empty_and_noise_only() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("!!! ??? 🚀🚀"), "");
    }
}
