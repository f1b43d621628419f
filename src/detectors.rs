//! Message detectors used by the funnel engine's early steps.
//!
//! Small compiled-once regex predicates: links, refusals after the
//! call-to-action, "keep it on the platform" avoidance, and high-intent
//! (explicit) content that qualifies a conversation for the CTA
//! immediately.

use std::sync::LazyLock;

use regex::Regex;

/// External link / URL detection. A user pasting their own link is treated
/// as engagement-terminal by the engine.
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(https?://\S+|www\.\S+|\S+\.(com|net|org|io|me|ly|gg)(/\S*)?)\b").unwrap()
});

/// Refusal phrases, checked only after the CTA has been sent.
static REFUSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(no thanks|no thank you|not interested|nah( im good)?|i'?m good|stop|leave me alone|go away|not for me|pass)\b",
    )
    .unwrap()
});

/// "Avoiding the call-to-action" — the user insists on continuing here
/// instead of following the link.
static AVOIDANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(just talk (here|on here)|stay (here|on this app)|keep (talking|chatting) here|why can'?t we (talk|chat) here|don'?t want to click|not clicking|can'?t you just (text|talk)|talk on here)\b",
    )
    .unwrap()
});

/// High-intent / explicit content that qualifies for the CTA on its own.
static HIGH_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(send (me )?(pics|pictures|photos)|nudes|more of you|see more|your content|onlyfans|of link|spicy (pics|content)|private (pics|content))\b",
    )
    .unwrap()
});

/// True if the text contains an external link or URL-shaped token.
pub fn contains_link(text: &str) -> bool {
    URL_RE.is_match(text)
}

/// True if the text reads as a refusal. Only meaningful after the CTA has
/// been delivered.
pub fn is_refusal(text: &str) -> bool {
    REFUSAL_RE.is_match(text)
}

/// True if the user is resisting the redirect and wants to keep the
/// conversation on-platform.
pub fn is_cta_avoidance(text: &str) -> bool {
    AVOIDANCE_RE.is_match(text)
}

/// True if the message is explicit/high-intent enough to warrant attaching
/// the CTA to the next reply.
pub fn is_high_intent(text: &str) -> bool {
    HIGH_INTENT_RE.is_match(text)
}
