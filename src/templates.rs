//! Template store and the tiered matching pipeline.
//!
//! Matching runs in strict priority order, returning the first success:
//! 1. exact redirect trigger (confidence 1.0)
//! 2. redirect trigger on a word boundary, longest trigger wins (0.85)
//! 3. semantic match against reference-example embeddings (score ≥ 0.75)
//! 4. lexical match against reference-example texts (score > 0.3)
//! 5. non-redirect trigger on a word boundary (0.8)
//! 6. no match — caller falls back to the provider path
//!
//! Redirect (`send_link`) rules trigger the call-to-action and must never
//! be shadowed by softer matches, which is why both redirect tiers run
//! before anything else. Exact phrase equality is the strongest possible
//! signal and is checked first within the redirect set.

use std::sync::OnceLock;

use rand::seq::SliceRandom;
use regex::Regex;
use tracing::debug;

use crate::similarity::{lexical_similarity, vector_similarity};

/// Semantic tier floor applied inside the store.
pub const SEMANTIC_THRESHOLD: f64 = 0.75;
/// Lexical tier floor applied inside the store.
pub const LEXICAL_THRESHOLD: f64 = 0.3;

/// A trigger→response rule.
#[derive(Debug, Clone)]
pub struct TemplateRule {
    /// Stable identifier, used in logs.
    pub id: String,
    /// Surface trigger strings, matched case-insensitively.
    pub triggers: Vec<String>,
    /// Candidate responses; one is picked at random per match.
    pub responses: Vec<String>,
    /// Redirect rule: matching it delivers the call-to-action.
    pub send_link: bool,
    /// Marks rules meant for later funnel stages.
    pub is_follow_up: bool,
}

/// A reference example with a known-good response, used by the semantic and
/// lexical tiers.
#[derive(Debug)]
pub struct ReferenceExample {
    /// Source message text.
    pub text: String,
    /// Known-good response for that text.
    pub response: String,
    /// Embedding of `text`, filled lazily by the engine via the embedding
    /// provider. Missing embeddings simply skip this example at tier 3.
    embedding: OnceLock<Vec<f32>>,
}

impl ReferenceExample {
    pub fn new(text: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response: response.into(),
            embedding: OnceLock::new(),
        }
    }

    /// Store the embedding for this example. First write wins.
    pub fn set_embedding(&self, embedding: Vec<f32>) {
        let _ = self.embedding.set(embedding);
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }
}

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ExactRedirect,
    RedirectTrigger,
    Semantic,
    LexicalReference,
    Trigger,
}

impl MatchTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExactRedirect => "exact_redirect",
            Self::RedirectTrigger => "redirect_trigger",
            Self::Semantic => "semantic",
            Self::LexicalReference => "lexical_reference",
            Self::Trigger => "trigger",
        }
    }
}

/// A successful match from the pipeline.
#[derive(Debug, Clone)]
pub struct TemplateMatch {
    /// Rule id, or `example` for reference-example tiers.
    pub rule_id: String,
    /// Chosen response text.
    pub response: String,
    pub confidence: f64,
    pub send_link: bool,
    pub is_follow_up: bool,
    pub tier: MatchTier,
}

/// A compiled trigger: the surface string plus its word-boundary regex.
#[derive(Debug)]
struct CompiledTrigger {
    surface: String,
    word_boundary: Regex,
}

#[derive(Debug)]
struct CompiledRule {
    rule: TemplateRule,
    triggers: Vec<CompiledTrigger>,
}

/// Ranked collection of template rules plus reference examples.
pub struct TemplateStore {
    rules: Vec<CompiledRule>,
    examples: Vec<ReferenceExample>,
}

impl TemplateStore {
    /// Build a store from explicit rules and examples. Trigger regexes are
    /// compiled once here.
    pub fn new(rules: Vec<TemplateRule>, examples: Vec<ReferenceExample>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let triggers = rule
                    .triggers
                    .iter()
                    .map(|t| CompiledTrigger {
                        surface: t.to_lowercase(),
                        word_boundary: Regex::new(&format!(
                            r"(?i)\b{}\b",
                            regex::escape(t)
                        ))
                        .expect("escaped trigger is a valid regex"),
                    })
                    .collect();
                CompiledRule { rule, triggers }
            })
            .collect();
        Self { rules, examples }
    }

    /// Empty store (for tests).
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Built-in rule and example tables for the DM funnel.
    pub fn default_rules() -> Self {
        let rule = |id: &str,
                    triggers: &[&str],
                    responses: &[&str],
                    send_link: bool,
                    is_follow_up: bool| TemplateRule {
            id: id.into(),
            triggers: triggers.iter().map(|t| (*t).to_string()).collect(),
            responses: responses.iter().map(|r| (*r).to_string()).collect(),
            send_link,
            is_follow_up,
        };

        let rules = vec![
            // Redirect rules — these deliver the CTA.
            rule(
                "redirect_meetup",
                &["can we meet up", "meet up sometime", "wanna meet", "lets meet", "meet irl"],
                &[
                    "I'd love that but I barely check this app, everything's on my page 💕",
                    "mm maybe 😏 but I'm way easier to reach through my page",
                ],
                true,
                false,
            ),
            rule(
                "redirect_number",
                &["whats your number", "give me your number", "your phone number", "can i text you"],
                &[
                    "I don't give my number out here, but my page has all my contact stuff 😘",
                    "texting's a no but you can find me through my page babe",
                ],
                true,
                false,
            ),
            rule(
                "redirect_pics",
                &["send pics", "send me a pic", "more pics", "got more pics"],
                &[
                    "all my good pics are on my page, this app compresses everything 🙈",
                    "I keep the real ones on my page 😏",
                ],
                true,
                false,
            ),
            rule(
                "redirect_social",
                &["whats your snap", "your snapchat", "whats your insta", "your instagram"],
                &[
                    "I'm not really on there anymore, my page is where everything is 💕",
                ],
                true,
                false,
            ),
            // Non-redirect conversational rules.
            rule(
                "greeting",
                &["hey", "hi", "hello", "heyy", "hii"],
                &[
                    "heyy you 😊 how's your day going?",
                    "hii! what are you up to?",
                ],
                false,
                false,
            ),
            rule(
                "how_are_you",
                &["how are you", "hows your day", "how's your day", "hows it going"],
                &[
                    "pretty good honestly, just relaxing 😌 you?",
                    "can't complain! what about you?",
                ],
                false,
                false,
            ),
            rule(
                "what_doing",
                &["what are you doing", "wyd", "what you up to", "whatcha doing"],
                &[
                    "just chilling at home rn, kinda bored tbh 😅 you?",
                    "not much, scrolling and being lazy 😇",
                ],
                false,
                false,
            ),
            rule(
                "compliment_reply",
                &["you are cute", "youre cute", "you're cute", "youre beautiful", "you're beautiful"],
                &[
                    "aww stop it 🙈 you're sweet",
                    "you're making me blush! 😊",
                ],
                false,
                true,
            ),
        ];

        let examples = vec![
            ReferenceExample::new(
                "hey gorgeous how has your week been",
                "aww hi! it's been pretty chill, lots of lazy mornings 😊 how about yours?",
            ),
            ReferenceExample::new(
                "do you ever come to the city",
                "sometimes! I'm kind of a homebody though 😅 what's your favorite spot there?",
            ),
            ReferenceExample::new(
                "i feel like you're too pretty to be texting me",
                "haha stoppp 🙈 I promise I'm just a normal girl who likes good conversation",
            ),
            ReferenceExample::new(
                "what kind of music are you into",
                "honestly a bit of everything, lately lots of r&b 🎶 send me a song you love",
            ),
            ReferenceExample::new(
                "good morning beautiful",
                "good morning!! ☀️ you're up early, big plans today?",
            ),
        ];

        Self::new(rules, examples)
    }

    /// Reference examples (for embedding priming and tests).
    pub fn examples(&self) -> &[ReferenceExample] {
        &self.examples
    }

    /// Rules in rank order (for tests and prompt context).
    pub fn rules(&self) -> impl Iterator<Item = &TemplateRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Run the tiered matching pipeline.
    ///
    /// `text_embedding` is the embedding of `text` if the caller obtained
    /// one; `None` skips the semantic tier. Returns the first tier that
    /// produces a match.
    pub fn find_match(&self, text: &str, text_embedding: Option<&[f32]>) -> Option<TemplateMatch> {
        let normalized = text.trim().to_lowercase();

        // Tier 1: exact redirect.
        for compiled in self.rules.iter().filter(|c| c.rule.send_link) {
            if compiled.triggers.iter().any(|t| t.surface == normalized) {
                debug!(rule = %compiled.rule.id, "Exact redirect trigger match");
                return Some(self.build_match(&compiled.rule, 1.0, MatchTier::ExactRedirect));
            }
        }

        // Tier 2: redirect word-boundary, longest trigger wins.
        if let Some((rule, trigger_len)) = self.best_boundary_match(text, true) {
            debug!(rule = %rule.id, trigger_len, "Redirect trigger match");
            return Some(self.build_match(rule, 0.85, MatchTier::RedirectTrigger));
        }

        // Tier 3: semantic match against reference-example embeddings.
        if let Some(embedding) = text_embedding {
            let best = self
                .examples
                .iter()
                .filter_map(|ex| {
                    ex.embedding()
                        .map(|e| (ex, vector_similarity(embedding, e)))
                })
                .max_by(|(_, a), (_, b)| a.total_cmp(b));
            if let Some((example, score)) = best {
                if score >= SEMANTIC_THRESHOLD {
                    debug!(score, text = %example.text, "Semantic reference match");
                    return Some(TemplateMatch {
                        rule_id: "example".to_string(),
                        response: example.response.clone(),
                        confidence: score,
                        send_link: false,
                        is_follow_up: false,
                        tier: MatchTier::Semantic,
                    });
                }
            }
        }

        // Tier 4: lexical match against reference-example texts.
        let best = self
            .examples
            .iter()
            .map(|ex| (ex, lexical_similarity(&normalized, &ex.text)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b));
        if let Some((example, score)) = best {
            if score > LEXICAL_THRESHOLD {
                debug!(score, text = %example.text, "Lexical reference match");
                return Some(TemplateMatch {
                    rule_id: "example".to_string(),
                    response: example.response.clone(),
                    confidence: score.min(1.0),
                    send_link: false,
                    is_follow_up: false,
                    tier: MatchTier::LexicalReference,
                });
            }
        }

        // Tier 5: non-redirect word-boundary.
        if let Some((rule, trigger_len)) = self.best_boundary_match(text, false) {
            debug!(rule = %rule.id, trigger_len, "Trigger match");
            return Some(self.build_match(rule, 0.8, MatchTier::Trigger));
        }

        None
    }

    /// Tier-5 lookup on its own, for callers that rejected a reference-tier
    /// match on confidence and still want a trigger hit.
    pub fn trigger_fallback(&self, text: &str) -> Option<TemplateMatch> {
        let (rule, trigger_len) = self.best_boundary_match(text, false)?;
        debug!(rule = %rule.id, trigger_len, "Trigger fallback match");
        Some(self.build_match(rule, 0.8, MatchTier::Trigger))
    }

    /// Best word-boundary trigger match among rules with the given
    /// `send_link` value; ties broken by longest trigger string.
    fn best_boundary_match(&self, text: &str, send_link: bool) -> Option<(&TemplateRule, usize)> {
        let mut best: Option<(&TemplateRule, usize)> = None;
        for compiled in self.rules.iter().filter(|c| c.rule.send_link == send_link) {
            for trigger in &compiled.triggers {
                if trigger.word_boundary.is_match(text) {
                    let len = trigger.surface.len();
                    if best.map_or(true, |(_, best_len)| len > best_len) {
                        best = Some((&compiled.rule, len));
                    }
                }
            }
        }
        best
    }

    fn build_match(&self, rule: &TemplateRule, confidence: f64, tier: MatchTier) -> TemplateMatch {
        let response = rule
            .responses
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        TemplateMatch {
            rule_id: rule.id.clone(),
            response,
            confidence,
            send_link: rule.send_link,
            is_follow_up: rule.is_follow_up,
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TemplateStore {
        TemplateStore::default_rules()
    }

    #[test]
    fn exact_redirect_wins_with_full_confidence() {
        let m = store().find_match("can we meet up", None).unwrap();
        assert_eq!(m.tier, MatchTier::ExactRedirect);
        assert_eq!(m.confidence, 1.0);
        assert!(m.send_link);
    }

    #[test]
    fn redirect_substring_matches_at_085() {
        let m = store()
            .find_match("so... can we meet up sometime next week?", None)
            .unwrap();
        assert_eq!(m.tier, MatchTier::RedirectTrigger);
        assert_eq!(m.confidence, 0.85);
        assert!(m.send_link);
    }

    #[test]
    fn redirect_dominates_non_redirect() {
        // "hey" (non-redirect) and "send pics" (redirect) both present:
        // the redirect rule must win.
        let m = store().find_match("hey can you send pics", None).unwrap();
        assert!(m.send_link, "redirect rule must not be shadowed");
        assert_eq!(m.rule_id, "redirect_pics");
    }

    #[test]
    fn longest_trigger_breaks_ties() {
        let rules = vec![
            TemplateRule {
                id: "short".into(),
                triggers: vec!["meet".into()],
                responses: vec!["short".into()],
                send_link: true,
                is_follow_up: false,
            },
            TemplateRule {
                id: "long".into(),
                triggers: vec!["meet up sometime".into()],
                responses: vec!["long".into()],
                send_link: true,
                is_follow_up: false,
            },
        ];
        let store = TemplateStore::new(rules, Vec::new());
        let m = store.find_match("can we meet up sometime?", None).unwrap();
        assert_eq!(m.rule_id, "long");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let m = store().find_match("CAN WE MEET UP", None).unwrap();
        assert_eq!(m.tier, MatchTier::ExactRedirect);
    }

    #[test]
    fn semantic_tier_uses_embeddings() {
        let store = store();
        // Prime the first example with a known embedding.
        store.examples()[0].set_embedding(vec![1.0, 0.0, 0.0]);

        let m = store
            .find_match("totally new phrasing with no trigger words", Some(&[1.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(m.tier, MatchTier::Semantic);
        assert!(m.confidence >= SEMANTIC_THRESHOLD);
    }

    #[test]
    fn semantic_below_threshold_falls_through() {
        let store = store();
        store.examples()[0].set_embedding(vec![1.0, 0.0, 0.0]);

        // Orthogonal embedding: similarity 0, tier 3 rejects; no lexical or
        // trigger overlap either.
        let m = store.find_match("zzz qqq vvv", Some(&[0.0, 1.0, 0.0]));
        assert!(m.is_none());
    }

    #[test]
    fn lexical_tier_matches_close_paraphrase() {
        let m = store()
            .find_match("hey gorgeous how has your week been going", None)
            .unwrap();
        assert_eq!(m.tier, MatchTier::LexicalReference);
        assert!(m.confidence > LEXICAL_THRESHOLD);
        assert!(m.response.contains("lazy mornings"));
    }

    #[test]
    fn non_redirect_trigger_matches_at_08() {
        let m = store().find_match("wyd tonight", None).unwrap();
        assert_eq!(m.tier, MatchTier::Trigger);
        assert_eq!(m.confidence, 0.8);
        assert!(!m.send_link);
    }

    #[test]
    fn miss_returns_none() {
        assert!(store().find_match("xylophone quantum baguette", None).is_none());
    }

    #[test]
    fn trigger_fallback_skips_reference_tiers() {
        let store = TemplateStore::new(
            vec![TemplateRule {
                id: "greet".into(),
                triggers: vec!["hey".into()],
                responses: vec!["hi there".into()],
                send_link: false,
                is_follow_up: false,
            }],
            vec![ReferenceExample::new("hey there friend", "reference reply")],
        );

        // find_match would answer from the lexical tier here; the fallback
        // consults triggers only.
        let m = store.trigger_fallback("hey there friend").unwrap();
        assert_eq!(m.tier, MatchTier::Trigger);
        assert_eq!(m.rule_id, "greet");
        assert_eq!(m.response, "hi there");
    }

    #[test]
    fn empty_store_never_matches() {
        assert!(TemplateStore::empty().find_match("hey", None).is_none());
    }

    #[test]
    fn chosen_response_comes_from_rule() {
        let store = store();
        let m = store.find_match("can we meet up", None).unwrap();
        let rule = store.rules().find(|r| r.id == "redirect_meetup").unwrap();
        assert!(rule.responses.contains(&m.response));
    }
}
