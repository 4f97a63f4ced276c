//! Message Analysis
//!
//! Lexicon heuristics that tag an inbound message with a sentiment and topics,
//! and extract context facts to remember for the rest of the conversation.
//! Cheap and deterministic; runs on the request path before rule matching.

use chrono::{DateTime, Duration, Utc};

use super::types::{NewContextFact, Sentiment};

/// Topic lexicon. A topic matches when any of its terms appears in the text.
/// Single words match as a token prefix ("ship" matches "shipping"),
/// phrases match as a substring.
const TOPICS: &[(&str, &[&str])] = &[
    (
        "pricing",
        &["price", "cost", "how much", "discount", "sale", "deal", "coupon", "promo"],
    ),
    (
        "purchase",
        &["buy", "order", "purchase", "checkout", "link", "where can i get"],
    ),
    (
        "shipping",
        &["ship", "delivery", "deliver", "tracking", "arrive"],
    ),
    (
        "availability",
        &["in stock", "available", "sold out", "restock", "size"],
    ),
    (
        "support",
        &["help", "broken", "issue", "problem", "refund", "return", "cancel"],
    ),
];

const POSITIVE: &[&str] = &[
    "love", "great", "amazing", "awesome", "thanks", "thank", "beautiful", "perfect", "nice",
    "\u{2764}", "\u{1f60d}", "\u{1f525}",
];

const NEGATIVE: &[&str] = &[
    "hate", "bad", "terrible", "awful", "worst", "angry", "disappointed", "scam", "never",
    "\u{1f621}", "\u{1f44e}",
];

/// Result of analyzing one message.
#[derive(Debug, Clone)]
pub struct MessageAnalysis {
    pub sentiment: Sentiment,
    pub topics: Vec<String>,
    pub facts: Vec<NewContextFact>,
}

/// Lowercase and split into alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn term_hits(term: &str, lowered: &str, tokens: &[String]) -> bool {
    if term.contains(' ') || !term.chars().all(char::is_alphanumeric) {
        lowered.contains(term)
    } else {
        tokens.iter().any(|t| t.starts_with(term))
    }
}

static EMAIL_REGEX: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}")
        .expect("valid regex")
});

/// First email address in the text, lowercased.
fn find_email(text: &str) -> Option<String> {
    EMAIL_REGEX.find(text).map(|m| m.as_str().to_lowercase())
}

/// Analyze a message. Extracted facts expire after `ttl`.
pub fn analyze(text: &str, now: DateTime<Utc>, ttl: Duration) -> MessageAnalysis {
    let lowered = text.to_lowercase();
    let tokens = tokenize(text);
    let expires_at = Some(now + ttl);
    let mut facts = Vec::new();

    let mut topics = Vec::new();
    for (topic, terms) in TOPICS {
        let hits = terms
            .iter()
            .filter(|term| term_hits(term, &lowered, &tokens))
            .count();
        if hits > 0 {
            topics.push((*topic).to_string());
            let confidence = (60 + 15 * (hits - 1)).min(95) as u8;
            facts.push(NewContextFact::new("intent", *topic, confidence, now, expires_at));
        }
    }

    let positive = POSITIVE
        .iter()
        .filter(|term| term_hits(term, &lowered, &tokens))
        .count();
    let negative = NEGATIVE
        .iter()
        .filter(|term| term_hits(term, &lowered, &tokens))
        .count();
    let sentiment = match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    };
    if sentiment != Sentiment::Neutral {
        let margin = positive.abs_diff(negative);
        let confidence = (55 + 15 * margin).min(90) as u8;
        facts.push(NewContextFact::new(
            "sentiment",
            sentiment.as_str(),
            confidence,
            now,
            expires_at,
        ));
    }

    if let Some(email) = find_email(text) {
        facts.push(NewContextFact::new("contact_email", email, 90, now, expires_at));
    }

    MessageAnalysis {
        sentiment,
        topics,
        facts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> MessageAnalysis {
        analyze(text, Utc::now(), Duration::hours(24))
    }

    #[test]
    fn detects_pricing_topic() {
        let analysis = run("Is there a sale? How much is the blue one?");
        assert_eq!(analysis.topics, vec!["pricing".to_string()]);
        let intent = analysis
            .facts
            .iter()
            .find(|f| f.context_type == "intent")
            .unwrap();
        assert_eq!(intent.context_value, "pricing");
        assert_eq!(intent.confidence, 75);
    }

    #[test]
    fn prefix_matches_tokens_not_substrings() {
        assert!(run("when does shipping start").topics.contains(&"shipping".to_string()));
        assert!(!run("our relationship is fine").topics.contains(&"shipping".to_string()));
    }

    #[test]
    fn sentiment_from_lexicon() {
        assert_eq!(run("I love this, amazing work").sentiment, Sentiment::Positive);
        assert_eq!(run("worst order ever, total scam").sentiment, Sentiment::Negative);
        assert_eq!(run("what time is it").sentiment, Sentiment::Neutral);
    }

    #[test]
    fn neutral_sentiment_records_no_fact() {
        let analysis = run("what time is it");
        assert!(analysis.facts.iter().all(|f| f.context_type != "sentiment"));
    }

    #[test]
    fn extracts_email() {
        let analysis = run("Reach me at Jane.Doe@Example.com.");
        let email = analysis
            .facts
            .iter()
            .find(|f| f.context_type == "contact_email")
            .unwrap();
        assert_eq!(email.context_value, "jane.doe@example.com");
    }

    #[test]
    fn extracts_email_with_multi_part_domain_inside_punctuation() {
        assert_eq!(
            find_email("(mail: sam+orders@shop.co.uk), thanks"),
            Some("sam+orders@shop.co.uk".to_string())
        );
        assert_eq!(find_email("ping me@localhost"), None);
    }

    #[test]
    fn ignores_handles_that_are_not_emails() {
        let analysis = run("@shop please answer");
        assert!(analysis.facts.iter().all(|f| f.context_type != "contact_email"));
    }

    #[test]
    fn facts_expire_after_ttl() {
        let now = Utc::now();
        let analysis = analyze("buy now", now, Duration::hours(2));
        assert!(analysis
            .facts
            .iter()
            .all(|f| f.expires_at == Some(now + Duration::hours(2))));
    }
}
