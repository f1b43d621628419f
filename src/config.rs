//! Engine configuration.

use std::time::Duration;

/// Which response-selection policy the funnel runs.
///
/// Two mutually exclusive modes exist; the switch is explicit rather than
/// baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelPolicy {
    /// Always ask the provider for a generated reply; a template match, if
    /// any, is supplied only as style context. Favors naturalness over
    /// cost.
    AlwaysGenerate,
    /// Return a confident template match (confidence ≥ 0.5, or any
    /// redirect rule) directly; call the provider only on a pipeline miss.
    TemplateFirst,
}

/// Funnel engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Call-to-action payload template. `{link}` is replaced with
    /// `cta_destination`.
    pub cta_template: String,
    /// Destination address substituted into the CTA template.
    pub cta_destination: String,
    /// Lower bound of the randomized human-like reply delay.
    pub delay_min: Duration,
    /// Upper bound of the randomized human-like reply delay.
    pub delay_max: Duration,
    /// Conversations idle for longer than this are reset to a fresh record
    /// on the next read (permanently closed records exempt).
    pub idle_timeout: Duration,
    /// How long a conversation slot stays reserved with no activity before
    /// the polling loop may hand it to another user. Independent from
    /// `idle_timeout`; consumed by the external collaborator, not the
    /// engine.
    pub slot_expiry: Duration,
    /// Identities exempt from permanent closure: a greeting from one of
    /// these resets even a permanently closed record (test/replay).
    pub reset_allowlist: Vec<String>,
    /// Response-selection policy.
    pub policy: FunnelPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cta_template: "Check my page for more: {link}".to_string(),
            cta_destination: "example.com/page".to_string(),
            delay_min: Duration::from_millis(1_500),
            delay_max: Duration::from_millis(4_500),
            idle_timeout: Duration::from_secs(600), // 10 minutes
            slot_expiry: Duration::from_secs(15),
            reset_allowlist: Vec::new(),
            policy: FunnelPolicy::AlwaysGenerate,
        }
    }
}

impl EngineConfig {
    /// Render the call-to-action payload.
    pub fn cta_payload(&self) -> String {
        self.cta_template.replace("{link}", &self.cta_destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cta_payload_substitutes_destination() {
        let config = EngineConfig {
            cta_template: "more here: {link} 😘".into(),
            cta_destination: "site.test/me".into(),
            ..Default::default()
        };
        assert_eq!(config.cta_payload(), "more here: site.test/me 😘");
    }

    #[test]
    fn default_windows_are_independent() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.slot_expiry, Duration::from_secs(15));
    }
}
