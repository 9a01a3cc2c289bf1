use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::CapabilityTag;

const NEGATIONS: &str = r"(?i)\b(don't|do not|shouldn't|not now|if i say|when i say|talking about|the word)\b";
const IMPERATIVE_VERBS: &str = r"(?i)\b(open|close|quit|shut ?down|power off|restart|reboot|mute|unmute|pause|play|resume|skip|stop|kill|end|delete|empty|format|run|launch|start|enable|disable|search|navigate|directions|route|lock|sleep|exit|take|add|show|clear|erase|turn|go|note)\b";

/// Per-utterance gating signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GateSignals {
    pub(crate) addressed: bool,
    pub(crate) negated: bool,
    pub(crate) imperative: bool,
}

/// Decides whether a matched trigger may act on an utterance.
pub(crate) struct SafetyGate {
    names: Regex,
    negations: Regex,
    imperatives: Regex,
    wake_window: Duration,
    legacy_keyword_triggers: bool,
}

impl SafetyGate {
    pub(crate) fn new(
        names: &[String],
        wake_window_secs: u64,
        legacy_keyword_triggers: bool,
    ) -> Result<Self, regex::Error> {
        let aliases = names
            .iter()
            .filter(|n| !n.is_empty())
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let names = if aliases.is_empty() {
            // Never matches: an empty alternation would match everything.
            Regex::new(r"\b\B")?
        } else {
            Regex::new(&format!(r"(?i)\b({aliases})\b"))?
        };
        Ok(Self {
            names,
            negations: Regex::new(NEGATIONS)?,
            imperatives: Regex::new(IMPERATIVE_VERBS)?,
            wake_window: Duration::seconds(wake_window_secs as i64),
            legacy_keyword_triggers,
        })
    }

    pub(crate) fn addressed_recently(
        &self,
        last_wake: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        last_wake.is_some_and(|at| now >= at && now - at < self.wake_window)
    }

    pub(crate) fn evaluate(
        &self,
        text: &str,
        last_wake: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> GateSignals {
        GateSignals {
            addressed: self.names.is_match(text) || self.addressed_recently(last_wake, now),
            negated: self.negations.is_match(text),
            imperative: self.imperatives.is_match(text),
        }
    }

    /// Whether a rule with `tag` may fire. Dangerous rules that pass still only raise a
    /// confirmation.
    pub(crate) fn permits(&self, tag: CapabilityTag, signals: GateSignals) -> bool {
        let full = signals.addressed && signals.imperative && !signals.negated;
        match tag {
            CapabilityTag::Informational => true,
            CapabilityTag::Action if self.legacy_keyword_triggers => !signals.negated,
            CapabilityTag::Action | CapabilityTag::Dangerous => full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gate(legacy: bool) -> SafetyGate {
        SafetyGate::new(&["jarvis".to_string(), "jervis".to_string()], 25, legacy).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn name_in_text_addresses() {
        let s = gate(false).evaluate("jarvis open chrome", None, t0());
        assert_eq!(
            s,
            GateSignals {
                addressed: true,
                negated: false,
                imperative: true
            }
        );
    }

    #[test]
    fn wake_window_is_time_bounded() {
        let g = gate(false);
        let woke = Some(t0());
        assert!(g.evaluate("open chrome", woke, t0() + Duration::seconds(24)).addressed);
        assert!(!g.evaluate("open chrome", woke, t0() + Duration::seconds(25)).addressed);
        assert!(!g.evaluate("open chrome", None, t0()).addressed);
    }

    #[test]
    fn negation_blocks_every_gated_tag() {
        for legacy in [false, true] {
            let g = gate(legacy);
            for text in [
                "jarvis don't open chrome",
                "jarvis do not shut down",
                "jarvis not now, restart later",
                "when i say exit jarvis, quit",
            ] {
                let s = g.evaluate(text, Some(t0()), t0());
                assert!(s.negated, "{text}");
                assert!(!g.permits(CapabilityTag::Action, s), "{text}");
                assert!(!g.permits(CapabilityTag::Dangerous, s), "{text}");
            }
        }
    }

    #[test]
    fn shut_down_counts_as_imperative() {
        assert!(gate(false).evaluate("shut down the computer", None, t0()).imperative);
        assert!(!gate(false).evaluate("what a nice day", None, t0()).imperative);
    }

    #[test]
    fn informational_needs_nothing() {
        let s = gate(false).evaluate("flip a coin", None, t0());
        assert!(gate(false).permits(CapabilityTag::Informational, s));
        assert!(!gate(false).permits(CapabilityTag::Action, s));
    }

    #[test]
    fn legacy_mode_relaxes_actions_only() {
        let s = gate(true).evaluate("mute", None, t0());
        assert!(gate(true).permits(CapabilityTag::Action, s));
        assert!(!gate(true).permits(CapabilityTag::Dangerous, s));
    }
}
