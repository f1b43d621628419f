//! Funnel engine — one decision per inbound message.
//!
//! Orchestrates the safety filter, early detectors, the tiered template
//! matcher, the provider pool, and the conversation store into a single
//! [`FunnelEngine::decide`] call. Transition rules run in a fixed order
//! (permanent closure → age check → disallowed request → post-link
//! handling → link detection → CTA avoidance → matching/generation → CTA
//! append → human delay); every path updates the conversation record
//! before the delay, so a duplicate message arriving while a reply is in
//! flight is recognized as already answered.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, FunnelPolicy};
use crate::detectors;
use crate::error::ProviderError;
use crate::intent::{IntentClassifier, IntentMatch};
use crate::provider::{EmbeddingProvider, FailureSignal, GenerationProvider, ProviderPool};
use crate::safety;
use crate::store::{fingerprint, ConversationStore};
use crate::templates::{MatchTier, TemplateMatch, TemplateStore};

/// Confidence floor for a template-first shortcut.
const TEMPLATE_FIRST_CONFIDENCE: f64 = 0.5;
/// Caller-side gate on the semantic tier.
const SEMANTIC_GATE: f64 = 0.6;
/// Caller-side gate on the lexical tier.
const LEXICAL_GATE: f64 = 0.4;

/// Final goodbye after a post-CTA refusal.
const GOODBYE_REPLY: &str = "no worries at all, take care! 💕";

/// Assertive redirect lines for users resisting the CTA.
const AVOIDANCE_REPLIES: &[&str] = &[
    "I get it, but I really don't chat much on here — everything's on my page, promise it's worth it 😘",
    "honestly this app eats my messages, my page is the only place I actually keep up 💕",
];

/// What the engine tells the sending collaborator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Reply text, or `None` for no reply.
    pub text: Option<String>,
    /// True when the conversation should be closed.
    pub end_conversation: bool,
}

impl Decision {
    /// No action; wait for more input.
    pub fn none() -> Self {
        Self {
            text: None,
            end_conversation: false,
        }
    }

    /// Close without replying.
    pub fn close_silently() -> Self {
        Self {
            text: None,
            end_conversation: true,
        }
    }

    /// Send a reply and keep the conversation open.
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            end_conversation: false,
        }
    }

    /// Send one final line and close.
    pub fn reply_and_close(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            end_conversation: true,
        }
    }
}

/// The decision pipeline, wired once at startup.
pub struct FunnelEngine {
    config: EngineConfig,
    store: Arc<ConversationStore>,
    templates: TemplateStore,
    classifier: IntentClassifier,
    pool: ProviderPool,
    generators: HashMap<String, Arc<dyn GenerationProvider>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// Users with a decision currently in flight.
    pending: Mutex<HashSet<String>>,
    /// Cancellation handles for in-flight decisions, keyed by user id.
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl FunnelEngine {
    /// Wire up an engine.
    ///
    /// `generators` pairs each credential identifier with its provider
    /// client; `secondary` is the optional fallback-family credential used
    /// once every primary is flagged.
    pub fn new(
        config: EngineConfig,
        store: Arc<ConversationStore>,
        templates: TemplateStore,
        classifier: IntentClassifier,
        generators: Vec<(String, Arc<dyn GenerationProvider>)>,
        secondary: Option<(String, Arc<dyn GenerationProvider>)>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let primary_ids = generators.iter().map(|(id, _)| id.clone()).collect();
        let secondary_id = secondary.as_ref().map(|(id, _)| id.clone());

        let mut map: HashMap<String, Arc<dyn GenerationProvider>> =
            generators.into_iter().collect();
        if let Some((id, provider)) = secondary {
            map.insert(id, provider);
        }

        Self {
            config,
            store,
            templates,
            classifier,
            pool: ProviderPool::new(primary_ids, secondary_id),
            generators: map,
            embedder,
            pending: Mutex::new(HashSet::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Cancel an in-flight decision for `user_id` (e.g., the conversation
    /// was closed externally). The discarded reply is never sent.
    pub fn cancel(&self, user_id: &str) {
        let cancels = self.cancels.lock().expect("cancel table poisoned");
        if let Some(tx) = cancels.get(user_id) {
            let _ = tx.send(true);
            info!(user_id, "Cancelled in-flight decision");
        }
    }

    /// Credential counters, for status reporting.
    pub fn provider_snapshot(&self) -> Vec<crate::provider::CredentialSnapshot> {
        self.pool.snapshot()
    }

    /// Decide whether and how to reply to one inbound message.
    pub async fn decide(&self, user_id: &str, text: &str) -> Decision {
        // At most one in-flight decision per user.
        {
            let mut pending = self.pending.lock().expect("pending set poisoned");
            if !pending.insert(user_id.to_string()) {
                debug!(user_id, "Decision already in flight, ignoring message");
                return Decision::none();
            }
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels
            .lock()
            .expect("cancel table poisoned")
            .insert(user_id.to_string(), cancel_tx);

        let decision = self.decide_inner(user_id, text, cancel_rx).await;

        self.cancels
            .lock()
            .expect("cancel table poisoned")
            .remove(user_id);
        self.pending
            .lock()
            .expect("pending set poisoned")
            .remove(user_id);

        info!(
            user_id,
            replied = decision.text.is_some(),
            end = decision.end_conversation,
            "Decision made"
        );
        decision
    }

    async fn decide_inner(
        &self,
        user_id: &str,
        text: &str,
        cancel_rx: watch::Receiver<bool>,
    ) -> Decision {
        let fp = fingerprint(text);
        let mut state = self.store.with_user(user_id, |s| s.clone()).await;

        // Step 1: permanent closure is terminal — except for an
        // allow-listed identity sending a fresh greeting (restart signal).
        if state.permanently_closed {
            let allowlisted = self.config.reset_allowlist.iter().any(|id| id == user_id);
            if allowlisted && self.classifier.classify(text).category == "greeting" {
                info!(user_id, "Allow-listed restart of a closed conversation");
                self.store.reset(user_id).await;
                state = self.store.with_user(user_id, |s| s.clone()).await;
            } else {
                return Decision::none();
            }
        }

        // Duplicate inbound fingerprint: already answered.
        if !fp.is_empty() && state.last_message_fingerprint == fp {
            debug!(user_id, "Duplicate message fingerprint, no reply");
            return Decision::none();
        }

        // Step 2: age violation — fixed safeguard reply, then nothing ever
        // again. Does not advance the funnel.
        if safety::is_age_violation(text) {
            warn!(user_id, "Age violation detected");
            self.store
                .with_user(user_id, |s| {
                    s.last_message_fingerprint = fp.clone();
                    s.close_permanently();
                })
                .await;
            if !self.human_delay(cancel_rx.clone()).await {
                return Decision::none();
            }
            return Decision::reply_and_close(safety::MINOR_SAFEGUARD_REPLY);
        }

        // Step 3: disallowed request — no reply, terminate the record.
        if safety::is_disallowed_request(text) {
            warn!(user_id, "Disallowed request, closing conversation");
            self.store.remove(user_id).await;
            return Decision::close_silently();
        }

        // Step 4: after the CTA the conversation is winding down — only a
        // refusal gets one final goodbye.
        if state.link_sent {
            if detectors::is_refusal(text) {
                self.store
                    .with_user(user_id, |s| {
                        s.last_message_fingerprint = fp.clone();
                        s.message_count += 1;
                        s.close_permanently();
                    })
                    .await;
                if !self.human_delay(cancel_rx.clone()).await {
                    return Decision::none();
                }
                return Decision::reply_and_close(GOODBYE_REPLY);
            }
            return Decision::none();
        }

        // Step 5: the user pasting their own link is engagement-terminal.
        if detectors::contains_link(text) {
            debug!(user_id, "Inbound link, closing without reply");
            self.store.remove(user_id).await;
            return Decision::close_silently();
        }

        // Step 6: resisting the redirect gets an assertive CTA push.
        if detectors::is_cta_avoidance(text) {
            let line = AVOIDANCE_REPLIES
                [rand::thread_rng().gen_range(0..AVOIDANCE_REPLIES.len())];
            let reply = format!("{line} {}", self.config.cta_payload());
            self.store
                .with_user(user_id, |s| {
                    s.last_message_fingerprint = fp.clone();
                    s.message_count += 1;
                    s.link_sent = true;
                })
                .await;
            if !self.human_delay(cancel_rx.clone()).await {
                return Decision::none();
            }
            return Decision::reply(reply);
        }

        // Step 7: tiered matcher, then (policy-dependent) generation.
        let matched = self.run_matcher(text).await;
        let intent = self.classifier.classify(text);

        let response = match self.config.policy {
            FunnelPolicy::TemplateFirst => {
                let confident = matched
                    .as_ref()
                    .filter(|m| m.send_link || m.confidence >= TEMPLATE_FIRST_CONFIDENCE);
                match confident {
                    Some(m) => {
                        debug!(tier = m.tier.label(), confidence = m.confidence, "Template-first shortcut");
                        Some(m.response.clone())
                    }
                    None => self.generate(text, &intent, matched.as_ref()).await,
                }
            }
            FunnelPolicy::AlwaysGenerate => self.generate(text, &intent, matched.as_ref()).await,
        };

        // A miss with no generated text fails closed: silence, not a crash.
        let Some(mut response) = response else {
            return Decision::none();
        };

        // Step 8: attach the CTA when the reply points at the offer, the
        // matcher hit a redirect rule, or the message itself is high-intent.
        let mentions_offer = response.contains(&self.config.cta_destination)
            || response.to_lowercase().contains("my page");
        let high_intent =
            detectors::is_high_intent(text) || intent.category == "explicit_interest";
        let redirect_match = matched.as_ref().is_some_and(|m| m.send_link);
        let send_link = mentions_offer || high_intent || redirect_match;

        if send_link && !response.contains(&self.config.cta_destination) {
            response = format!("{response} {}", self.config.cta_payload());
        }

        // State updates land before the delay, so a concurrent duplicate is
        // recognized as already answered while the reply is in flight.
        self.store
            .with_user(user_id, |s| {
                s.last_message_fingerprint = fp.clone();
                s.message_count += 1;
                if send_link {
                    s.link_sent = true;
                }
            })
            .await;

        // Step 9: human-like delay; cancellation discards the reply.
        if !self.human_delay(cancel_rx).await {
            debug!(user_id, "Reply discarded after cancellation");
            return Decision::none();
        }

        Decision::reply(response)
    }

    /// Run the tiered matcher, applying the caller-side confidence gates on
    /// the reference tiers.
    async fn run_matcher(&self, text: &str) -> Option<TemplateMatch> {
        let embedding = match &self.embedder {
            Some(embedder) => {
                self.prime_example_embeddings(embedder.as_ref()).await;
                match embedder.embed(text).await {
                    Ok(e) => Some(e),
                    Err(e) => {
                        // Tier 3 is best-effort; fall through to lexical.
                        debug!(error = %e, "Embedding failed, skipping semantic tier");
                        None
                    }
                }
            }
            None => None,
        };

        let matched = self.templates.find_match(text, embedding.as_deref())?;
        let gated = match matched.tier {
            MatchTier::Semantic => matched.confidence < SEMANTIC_GATE,
            MatchTier::LexicalReference => matched.confidence <= LEXICAL_GATE,
            _ => false,
        };
        if gated {
            // A reference match below the gate still leaves the trigger
            // tier in play.
            return self.templates.trigger_fallback(text);
        }
        Some(matched)
    }

    /// Fill reference-example embeddings that haven't been computed yet.
    async fn prime_example_embeddings(&self, embedder: &dyn EmbeddingProvider) {
        for example in self.templates.examples() {
            if example.embedding().is_none() {
                if let Ok(embedding) = embedder.embed(&example.text).await {
                    example.set_embedding(embedding);
                }
            }
        }
    }

    /// Ask the provider pool for a generated reply, rotating credentials on
    /// failure. Exhaustion degrades to the template response when one exists;
    /// an unsafe generation is dropped outright, with no fallback.
    async fn generate(
        &self,
        text: &str,
        intent: &IntentMatch,
        matched: Option<&TemplateMatch>,
    ) -> Option<String> {
        let system_prompt = self.build_system_prompt(intent, matched);

        // One attempt per credential at most; rotation is the only retry.
        let attempts = self.generators.len().max(1);
        for _ in 0..attempts {
            let credential = match self.pool.acquire() {
                Ok(c) => c,
                Err(_) => break,
            };
            let Some(provider) = self.generators.get(&credential) else {
                break;
            };

            match provider.generate(text, &system_prompt).await {
                Ok(generated) => {
                    if safety::is_disallowed_generated_text(&generated) {
                        warn!(credential = %credential, "Unsafe generation discarded");
                        self.pool.record_success(&credential);
                        return None;
                    }
                    self.pool.record_success(&credential);
                    return Some(generated);
                }
                Err(e) => {
                    let signal = match &e {
                        ProviderError::RateLimited { .. } => Some(FailureSignal::RateLimited),
                        ProviderError::QuotaExhausted { .. } => {
                            Some(FailureSignal::QuotaExhausted)
                        }
                        _ => None,
                    };
                    warn!(credential = %credential, error = %e, "Provider call failed, rotating");
                    self.pool.record_failure(&credential, signal);
                }
            }
        }

        matched.map(|m| m.response.clone())
    }

    /// System prompt for the generation call: persona, intent style, and
    /// the template match (if any) as style context only.
    fn build_system_prompt(&self, intent: &IntentMatch, matched: Option<&TemplateMatch>) -> String {
        let mut prompt = format!(
            "You are a flirty but tasteful woman chatting in DMs. Reply in one or two \
             short casual sentences, lowercase, with at most one emoji. Never reveal you \
             are an AI. The message intent is '{}' — use a {} tone.",
            intent.category, intent.response_style
        );
        if let Some(m) = matched {
            prompt.push_str(&format!(
                " A reply in your voice for a similar message was: \"{}\". Match that style; \
                 do not copy it verbatim.",
                m.response
            ));
        }
        prompt
    }

    /// Awaitable, cancellable human-like delay. Returns false if cancelled.
    async fn human_delay(&self, mut cancel_rx: watch::Receiver<bool>) -> bool {
        let min = self.config.delay_min.as_millis() as u64;
        let max = self.config.delay_max.as_millis() as u64;
        let millis = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(millis)) => true,
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => false,
        }
    }
}
