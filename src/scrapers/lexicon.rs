//! Keyword lexicons used to classify scraped regulator publications.
//!
//! The breaking lexicon is shared across scrapers; relevance lexicons are
//! per-regulator. Lifted from `examples/original_source/ai/integrations/
//! scrapers/sec_edgar_scraper.py`'s `RELEVANT_KEYWORDS`/`BREAKING_CHANGE_KEYWORDS`.

pub const BREAKING_KEYWORDS: &[&str] = &[
    "amendment",
    "repeal",
    "new rule",
    "effective immediately",
    "threshold change",
    "definition change",
    "final rule",
    "supersedes",
    "revised",
    "consultation paper",
];

pub const SEC_RELEVANT_KEYWORDS: &[&str] = &[
    "regulation d",
    "reg d",
    "accredited investor",
    "qualified purchaser",
    "private placement",
    "rule 506",
    "rule 144",
    "holding period",
    "securities offering",
    "digital asset",
    "tokenized",
    "blockchain",
    "exempt offering",
];

pub const MAS_RELEVANT_KEYWORDS: &[&str] = &[
    "accredited investor",
    "institutional investor",
    "digital payment token",
    "capital markets products",
    "securities and futures act",
    "private placement",
    "tokenized",
    "digital asset",
    "blockchain",
];

/// Whether `title + summary` matches at least one keyword in `lexicon`
/// (case-insensitive, whole-substring).
pub fn matches_any(title: &str, summary: &str, lexicon: &[&str]) -> Vec<String> {
    let haystack = format!("{title} {summary}").to_ascii_lowercase();
    lexicon
        .iter()
        .filter(|kw| haystack.contains(&kw.to_ascii_lowercase()))
        .map(|kw| kw.to_string())
        .collect()
}

pub fn is_breaking_change(title: &str, summary: &str) -> bool {
    !matches_any(title, summary, BREAKING_KEYWORDS).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_relevant_keyword_case_insensitively() {
        let matched = matches_any(
            "SEC Proposes Amendment to Regulation D",
            "Changes to accredited investor thresholds",
            SEC_RELEVANT_KEYWORDS,
        );
        assert!(matched.contains(&"regulation d".to_string()));
        assert!(matched.contains(&"accredited investor".to_string()));
    }

    #[test]
    fn irrelevant_update_matches_nothing() {
        let matched = matches_any("SEC hires new chair", "Personnel announcement", SEC_RELEVANT_KEYWORDS);
        assert!(matched.is_empty());
    }

    #[test]
    fn breaking_keyword_detection() {
        assert!(is_breaking_change("Final Rule on Accredited Investors", ""));
        assert!(!is_breaking_change("Quarterly newsletter", "routine update"));
    }
}
