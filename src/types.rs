use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ConversationTurn {
    pub(crate) role: TurnRole,
    pub(crate) content: String,
}

impl ConversationTurn {
    pub(crate) fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub(crate) fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// Gating class attached to every trigger rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CapabilityTag {
    /// Read-only answers; no gating.
    Informational,
    /// Side effects on the desktop; needs addressed + imperative + not negated.
    Action,
    /// Irreversible; same gate as Action, then always routed through confirmation.
    Dangerous,
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Informational => "informational",
            Self::Action => "action",
            Self::Dangerous => "dangerous",
        })
    }
}

/// Result of running one trigger handler. The dispatcher owns the user-facing wording
/// for failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandlerOutcome {
    Reply(String),
    /// Pattern matched but the handler found nothing it could act on.
    Declined,
    Failed(String),
}

/// Actions that only run after an explicit "yes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum GuardedAction {
    Shutdown,
    Restart,
    ClearNotes,
    ExitAssistant,
}

/// Desktop-level operations delegated to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemAction {
    PlayPause,
    NextTrack,
    PreviousTrack,
    StopMedia,
    Mute,
    Unmute,
    VolumeUp,
    VolumeDown,
    CloseWindow,
    Lock,
    Sleep,
    Shutdown,
    Restart,
    ExitAssistant,
}

impl fmt::Display for SystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PlayPause => "play_pause",
            Self::NextTrack => "next_track",
            Self::PreviousTrack => "previous_track",
            Self::StopMedia => "stop_media",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::VolumeUp => "volume_up",
            Self::VolumeDown => "volume_down",
            Self::CloseWindow => "close_window",
            Self::Lock => "lock",
            Self::Sleep => "sleep",
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
            Self::ExitAssistant => "exit_assistant",
        };
        f.write_str(name)
    }
}
