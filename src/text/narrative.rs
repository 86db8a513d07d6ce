use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse topic label. `Other` is the catch-all and is never treated as
/// coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Narrative {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "DOGE")]
    Doge,
    #[serde(rename = "OTHER")]
    Other,
}

/// Ordered triggers; the first narrative with a matching keyword wins.
const TRIGGERS: [(Narrative, &[&str]); 3] = [
    (Narrative::Btc, &["$btc", "bitcoin"]),
    (Narrative::Eth, &["$eth", "ethereum"]),
    (Narrative::Doge, &["$doge", "dogecoin"]),
];

impl Narrative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Narrative::Btc => "BTC",
            Narrative::Eth => "ETH",
            Narrative::Doge => "DOGE",
            Narrative::Other => "OTHER",
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, Narrative::Other)
    }
}

impl fmt::Display for Narrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag a post with a narrative by case-insensitive substring match.
pub fn assign_narrative(text: &str) -> Narrative {
    let lowered = text.to_lowercase();
    TRIGGERS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(narrative, _)| *narrative)
        .unwrap_or(Narrative::Other)
}
