use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::GuardedAction;

pub(crate) const TIMEOUT_MESSAGE: &str = "Confirmation timed out.";
pub(crate) const CANCEL_MESSAGE: &str = "Canceled.";

pub(crate) const AFFIRMATIVES: &[&str] = &["yes", "yeah", "yep", "confirm", "do it", "go ahead", "proceed"];
pub(crate) const NEGATIVES: &[&str] = &["no", "nope", "cancel", "stop", "abort"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfirmationReply {
    Affirmative,
    Negative,
}

/// Exact-phrase match against the yes/no vocabulary, ignoring case and edge punctuation.
pub(crate) fn classify_reply(text: &str) -> Option<ConfirmationReply> {
    let low = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    if AFFIRMATIVES.contains(&low.as_str()) {
        Some(ConfirmationReply::Affirmative)
    } else if NEGATIVES.contains(&low.as_str()) {
        Some(ConfirmationReply::Negative)
    } else {
        None
    }
}

/// What a dangerous handler wants confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfirmationRequest {
    pub(crate) prompt: String,
    pub(crate) action: GuardedAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct PendingConfirmation {
    pub(crate) prompt: String,
    pub(crate) deadline: DateTime<Utc>,
    pub(crate) action: GuardedAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Confirmed(GuardedAction),
    Canceled,
    TimedOut,
}

/// Single-slot confirmation state. Expiry is detected lazily on the next yes/no reply.
#[derive(Debug)]
pub(crate) struct ConfirmationSlot {
    pending: Option<PendingConfirmation>,
    timeout: Duration,
}

impl ConfirmationSlot {
    pub(crate) fn new(timeout_secs: u64) -> Self {
        Self {
            pending: None,
            timeout: Duration::seconds(timeout_secs as i64),
        }
    }

    pub(crate) fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    /// Arm the slot and return the prompt to speak. An unresolved request is replaced.
    pub(crate) fn ask(&mut self, request: ConfirmationRequest, now: DateTime<Utc>) -> String {
        if let Some(previous) = &self.pending {
            warn!(
                abandoned = ?previous.action,
                replacement = ?request.action,
                "confirmation overwritten before it was resolved"
            );
        }
        let prompt = format!(
            "CONFIRM: {} (say 'yes' or 'no' within {} seconds)",
            request.prompt,
            self.timeout.num_seconds()
        );
        self.pending = Some(PendingConfirmation {
            prompt: request.prompt,
            deadline: now + self.timeout,
            action: request.action,
        });
        prompt
    }

    /// Resolve the slot if `text` is a yes/no reply. Anything else leaves it untouched.
    pub(crate) fn resolve(&mut self, text: &str, now: DateTime<Utc>) -> Option<Resolution> {
        let pending = self.pending.as_ref()?;
        let reply = classify_reply(text)?;
        let action = pending.action;
        let expired = now > pending.deadline;
        self.pending = None;

        let resolution = if expired {
            Resolution::TimedOut
        } else {
            match reply {
                ConfirmationReply::Affirmative => Resolution::Confirmed(action),
                ConfirmationReply::Negative => Resolution::Canceled,
            }
        };
        info!(?action, ?resolution, "confirmation resolved");
        Some(resolution)
    }
}
