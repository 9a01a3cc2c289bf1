use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{SystemAction, clean_for_tts, hud_display};

/// Side effects the core asks of whatever embeds it.
pub(crate) trait Host: Send + Sync {
    fn speak(&self, text: &str);
    /// Open a URL or filesystem path with the platform's default handler.
    fn open_external_resource(&self, target: &str) -> bool;
    fn launch_application(&self, name: &str) -> bool;
    fn system_action(&self, action: SystemAction) -> bool;
}

pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Presentation-layer notifications. Delivery is best effort.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Assistant { text: String },
    Speaking(bool),
    Thinking(bool),
    DisplayMode(String),
    Heard { text: String },
}

impl Event {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Assistant { .. } => "assistant",
            Self::Speaking(_) => "speaking",
            Self::Thinking(_) => "thinking",
            Self::DisplayMode(_) => "mode",
            Self::Heard { .. } => "final",
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Assistant { text } | Self::Heard { text } => {
                json!({"type": self.kind(), "text": text})
            }
            Self::Speaking(value) | Self::Thinking(value) => {
                json!({"type": self.kind(), "value": value})
            }
            Self::DisplayMode(mode) => json!({"type": self.kind(), "value": mode}),
        }
    }
}

pub(crate) trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

pub(crate) struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Capability bag handed to every handler. Built once at startup.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub(crate) host: Arc<dyn Host>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) base_dir: PathBuf,
}

impl DispatchContext {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Speak through the host, mirroring the text to the HUD and bracketing it with
    /// speaking events.
    pub(crate) fn say(&self, text: &str) {
        let spoken = clean_for_tts(text);
        if spoken.is_empty() {
            return;
        }
        self.events.emit(Event::Assistant {
            text: hud_display(&spoken),
        });
        self.events.emit(Event::Speaking(true));
        self.host.speak(&spoken);
        self.events.emit(Event::Speaking(false));
    }

    pub(crate) fn notes_path(&self) -> PathBuf {
        self.base_dir.join("notes.txt")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingHost {
        pub(crate) spoken: Mutex<Vec<String>>,
        pub(crate) opened: Mutex<Vec<String>>,
        pub(crate) launched: Mutex<Vec<String>>,
        pub(crate) actions: Mutex<Vec<SystemAction>>,
    }

    impl RecordingHost {
        pub(crate) fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }

        pub(crate) fn last_spoken(&self) -> Option<String> {
            self.spoken.lock().unwrap().last().cloned()
        }

        pub(crate) fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }

        pub(crate) fn actions(&self) -> Vec<SystemAction> {
            self.actions.lock().unwrap().clone()
        }
    }

    impl Host for RecordingHost {
        fn speak(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }

        fn open_external_resource(&self, target: &str) -> bool {
            self.opened.lock().unwrap().push(target.to_string());
            true
        }

        fn launch_application(&self, name: &str) -> bool {
            self.launched.lock().unwrap().push(name.to_string());
            true
        }

        fn system_action(&self, action: SystemAction) -> bool {
            self.actions.lock().unwrap().push(action);
            true
        }
    }

    pub(crate) struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Mutex::new(Utc.with_ymd_and_hms(2025, 3, 3, 15, 7, 0).unwrap()),
            }
        }

        pub(crate) fn advance_secs(&self, secs: i64) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Mutex<Vec<Event>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    pub(crate) struct Fixture {
        pub(crate) host: Arc<RecordingHost>,
        pub(crate) clock: Arc<ManualClock>,
        pub(crate) events: Arc<RecordingSink>,
        pub(crate) ctx: DispatchContext,
    }

    pub(crate) fn fixture(name: &str) -> Fixture {
        let base_dir = std::env::temp_dir()
            .join("aethervoice_test")
            .join(format!("{}_{name}", std::process::id()));
        std::fs::create_dir_all(&base_dir).unwrap();
        let host = Arc::new(RecordingHost::default());
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(RecordingSink::default());
        let ctx = DispatchContext {
            host: host.clone(),
            clock: clock.clone(),
            events: events.clone(),
            base_dir,
        };
        Fixture {
            host,
            clock,
            events,
            ctx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::fixture;
    use super::*;

    #[test]
    fn say_cleans_text_and_brackets_with_speaking_events() {
        let fx = fixture("host_say");
        fx.ctx.say("**Very well**, sir.");
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Very well , sir."));
        let events = fx.events.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                Event::Assistant {
                    text: "Very well , sir.".into()
                },
                Event::Speaking(true),
                Event::Speaking(false),
            ]
        );
    }

    #[test]
    fn say_skips_empty_text() {
        let fx = fixture("host_empty");
        fx.ctx.say("   ");
        assert!(fx.host.spoken().is_empty());
        assert!(fx.events.events.lock().unwrap().is_empty());
    }

    #[test]
    fn event_json_shapes() {
        assert_eq!(
            Event::Speaking(true).to_json(),
            json!({"type": "speaking", "value": true})
        );
        assert_eq!(
            Event::Assistant { text: "hi".into() }.to_json(),
            json!({"type": "assistant", "text": "hi"})
        );
    }
}
