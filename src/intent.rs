//! Keyword-table intent classifier.
//!
//! Categories are data, not code: each one carries its keyword list, a base
//! confidence, and a response style hint. Matching is plain lower-cased
//! substring containment, with small boosts for exact and multiple hits.

use serde::{Deserialize, Serialize};

/// One row of the classification table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentCategory {
    pub name: String,
    pub keywords: Vec<String>,
    pub confidence: f64,
    pub response_style: String,
}

/// Outcome of classifying a single message.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentMatch {
    pub category: String,
    pub confidence: f64,
    pub response_style: String,
}

/// Fallback category when no keyword hits.
pub const GENERIC_GREETING: &str = "generic_greeting";

const GENERIC_CONFIDENCE: f64 = 0.3;
const EXACT_MATCH_BOOST: f64 = 0.1;
const MULTI_MATCH_BOOST: f64 = 0.05;

pub struct IntentClassifier {
    categories: Vec<IntentCategory>,
}

impl IntentClassifier {
    pub fn new(categories: Vec<IntentCategory>) -> Self {
        Self { categories }
    }

    /// The built-in classification table.
    pub fn default_categories() -> Vec<IntentCategory> {
        let cat = |name: &str, keywords: &[&str], confidence: f64, style: &str| IntentCategory {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            confidence,
            response_style: style.to_string(),
        };

        vec![
            cat(
                "greeting",
                &["hey", "hi", "hello", "yo", "sup", "whats up", "what's up", "hiya"],
                0.6,
                "warm",
            ),
            cat(
                "how_are_you",
                &["how are you", "hows it going", "how's it going", "how r u", "wyd", "hru"],
                0.65,
                "casual",
            ),
            cat(
                "compliment",
                &["cute", "beautiful", "gorgeous", "pretty", "hot", "stunning", "sexy"],
                0.7,
                "flirty",
            ),
            cat(
                "meetup_request",
                &["meet", "meet up", "hang out", "hangout", "see you", "date", "coffee", "drinks"],
                0.75,
                "redirecting",
            ),
            cat(
                "contact_request",
                &["number", "phone", "snap", "snapchat", "whatsapp", "insta", "instagram", "telegram"],
                0.75,
                "redirecting",
            ),
            cat(
                "location_question",
                &["where are you", "where you from", "where do you live", "what city", "near me"],
                0.6,
                "vague",
            ),
            cat(
                "explicit_interest",
                &["send pics", "pics", "nudes", "content", "onlyfans", "spicy", "naughty"],
                0.8,
                "redirecting",
            ),
            cat(
                "suspicion",
                &["bot", "fake", "scam", "real person", "are you real", "catfish"],
                0.7,
                "reassuring",
            ),
            cat(
                "refusal",
                &["no thanks", "not interested", "stop", "leave me alone", "go away", "unsubscribe"],
                0.75,
                "closing",
            ),
        ]
    }

    pub fn categories(&self) -> &[IntentCategory] {
        &self.categories
    }

    /// Classify a message. Always returns a match; falls back to
    /// [`GENERIC_GREETING`] at low confidence when nothing hits.
    pub fn classify(&self, text: &str) -> IntentMatch {
        let normalized = text.trim().to_lowercase();

        let mut best: Option<(f64, &IntentCategory)> = None;
        for category in &self.categories {
            let hits: Vec<&String> = category
                .keywords
                .iter()
                .filter(|k| normalized.contains(k.as_str()))
                .collect();
            if hits.is_empty() {
                continue;
            }

            let mut score = category.confidence;
            if hits.iter().any(|k| normalized == k.as_str()) {
                score += EXACT_MATCH_BOOST;
            }
            if hits.len() > 1 {
                score += MULTI_MATCH_BOOST * (hits.len() - 1) as f64;
            }
            let score = score.min(1.0);

            // Strictly greater: first-declared category wins ties.
            if best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, category));
            }
        }

        match best {
            Some((score, category)) => IntentMatch {
                category: category.name.clone(),
                confidence: score,
                response_style: category.response_style.clone(),
            },
            None => IntentMatch {
                category: GENERIC_GREETING.to_string(),
                confidence: GENERIC_CONFIDENCE,
                response_style: "warm".to_string(),
            },
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(Self::default_categories())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_keyword_gets_boost() {
        let classifier = IntentClassifier::default();
        let exact = classifier.classify("hey");
        let contained = classifier.classify("hey stranger what a day");
        assert_eq!(exact.category, "greeting");
        assert!((exact.confidence - 0.7).abs() < 1e-9);
        assert!(exact.confidence > contained.confidence);
    }

    #[test]
    fn multiple_keywords_boost_category() {
        let classifier = IntentClassifier::default();
        let single = classifier.classify("wanna meet");
        let double = classifier.classify("wanna meet for coffee");
        assert_eq!(single.category, "meetup_request");
        assert_eq!(double.category, "meetup_request");
        assert!(double.confidence > single.confidence);
    }

    #[test]
    fn confidence_capped_at_one() {
        let classifier = IntentClassifier::new(vec![IntentCategory {
            name: "loaded".to_string(),
            keywords: ["aa", "bb", "cc", "dd", "ee"].iter().map(|k| k.to_string()).collect(),
            confidence: 0.95,
            response_style: "warm".to_string(),
        }]);
        let result = classifier.classify("aa bb cc dd ee");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn no_match_defaults_to_generic_greeting() {
        let classifier = IntentClassifier::default();
        let result = classifier.classify("zzz qqq xyz");
        assert_eq!(result.category, GENERIC_GREETING);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.response_style, "warm");
    }

    #[test]
    fn tie_resolves_to_first_declared() {
        let classifier = IntentClassifier::new(vec![
            IntentCategory {
                name: "first".to_string(),
                keywords: vec!["shared".to_string()],
                confidence: 0.5,
                response_style: "warm".to_string(),
            },
            IntentCategory {
                name: "second".to_string(),
                keywords: vec!["shared".to_string()],
                confidence: 0.5,
                response_style: "casual".to_string(),
            },
        ]);
        let result = classifier.classify("something shared here");
        assert_eq!(result.category, "first");
    }

    #[test]
    fn classification_is_case_insensitive() {
        let classifier = IntentClassifier::default();
        let result = classifier.classify("HEY THERE");
        assert_eq!(result.category, "greeting");
    }

    #[test]
    fn explicit_interest_detected() {
        let classifier = IntentClassifier::default();
        let result = classifier.classify("you got an onlyfans?");
        assert_eq!(result.category, "explicit_interest");
        assert_eq!(result.response_style, "redirecting");
    }

    #[test]
    fn refusal_detected() {
        let classifier = IntentClassifier::default();
        let result = classifier.classify("no thanks im good");
        assert_eq!(result.category, "refusal");
        assert_eq!(result.response_style, "closing");
    }
}
