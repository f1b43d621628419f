//! Safety filter — stateless predicates over inbound and outbound text.
//!
//! Three checks, evaluated by the engine before anything else:
//! - age violations (first-person claim of being under 18, or underage
//!   keywords) → fixed safeguard reply, conversation permanently closed
//! - disallowed requests (violence, weapons, drugs, fraud, commercial
//!   sexual services) → no reply, conversation ended
//! - disallowed generated text → the same category list applied to
//!   provider output, so an unsafe generation is discarded before it is
//!   ever returned
//!
//! All patterns compile once. No state, no side effects.

use std::sync::LazyLock;

use regex::Regex;

/// The one fixed reply sent on an age violation. Never varied, never
/// escalated.
pub const MINOR_SAFEGUARD_REPLY: &str =
    "Sorry, this account is strictly 18+ only. Take care!";

/// First-person numeric age claim: "im 15", "i am 16 years old", "I'm 17".
static AGE_CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bi'?\s?a?m\s+(\d{1,2})(\s*(years?\s*old|yo|y/o))?\b").unwrap()
});

/// Underage keyword phrases that count as a violation without a number.
static UNDERAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(under\s?age|a minor\b|still in (middle|high) school|not 18 yet|im not 18|i'?m not 18)")
        .unwrap()
});

/// A unit word right after a low number marks it as a quantity, not an age
/// ("im 5 minutes away", "im 2 blocks over").
static NON_AGE_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(minutes?|mins?|seconds?|secs?|hours?|hrs?|days?|weeks?|months?|miles?|km|blocks?|bucks?|dollars?|percent|%)\b",
    )
    .unwrap()
});

/// Disallowed content categories, applied both to inbound requests and to
/// generated outbound text.
static DISALLOWED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(kill|murder|shoot (him|her|them|someone)|gun for sale|buy a gun|cocaine|heroin|fentanyl|mdma|sell( me)? drugs|buy drugs|money laundering|launder money|wire fraud|cash ?app flip|venmo flip|bank logs?|cvv|fullz|escort service|pay for sex|sell sex|prostitution)\b",
    )
    .unwrap()
});

/// True if the text contains a first-person claim of an age below 18, or an
/// explicit underage phrase.
pub fn is_age_violation(text: &str) -> bool {
    for caps in AGE_CLAIM_RE.captures_iter(text) {
        let Some(num) = caps.get(1) else { continue };
        let Ok(age) = num.as_str().parse::<u32>() else { continue };
        if age >= 18 {
            continue;
        }
        // Any claimed age under 18 counts. An explicit age suffix ("years
        // old", "yo") always does; without one, a trailing unit word means
        // the number was a quantity, not an age.
        if caps.get(2).is_some() || !NON_AGE_UNIT_RE.is_match(&text[num.end()..]) {
            return true;
        }
    }
    UNDERAGE_RE.is_match(text)
}

/// True if the inbound text solicits disallowed content (violence, weapons,
/// controlled substances, financial fraud, commercial sexual services).
pub fn is_disallowed_request(text: &str) -> bool {
    DISALLOWED_RE.is_match(text)
}

/// Applied to provider output before it is returned to the caller. Same
/// category list as [`is_disallowed_request`].
pub fn is_disallowed_generated_text(text: &str) -> bool {
    DISALLOWED_RE.is_match(text)
}
