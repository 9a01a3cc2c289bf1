use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::{
    DispatchContext, Dispatcher, Event, Orchestrator, WebSearch, classify_reply, clean_for_tts,
    clean_transcript, contains_name, normalize_quotes, strip_name,
};

pub(crate) const OFFLINE_REPLY: &str = "Apologies, sir. My language model is offline.";
/// What an utterance that was only the assistant's name becomes.
pub(crate) const BARE_NAME_PROMPT: &str = "yes?";
/// Dashboard screen shown once the session accepts utterances.
pub(crate) const READY_DISPLAY_MODE: &str = "home";

const WEB_CONTEXT_HINTS: &[&str] = &[
    "latest", "today", "news", "stock", "price", "weather", "score", "who won", "update",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UtteranceOutcome {
    /// Empty after cleanup, or not addressed while the name is required.
    Ignored,
    /// A built-in command or confirmation reply answered it.
    Handled,
    /// The language model answered.
    Answered(String),
    Offline,
}

pub(crate) struct SessionOptions {
    pub(crate) names: Vec<String>,
    pub(crate) require_name: bool,
}

/// One assistant session: every finalized utterance goes through `handle_utterance`.
pub(crate) struct Session {
    ctx: DispatchContext,
    dispatcher: Dispatcher,
    orchestrator: Option<Orchestrator>,
    search: Option<Arc<dyn WebSearch>>,
    options: SessionOptions,
    processing: Mutex<()>,
}

pub(crate) fn wants_web_context(text: &str) -> bool {
    let low = text.to_lowercase();
    WEB_CONTEXT_HINTS.iter().any(|hint| low.contains(hint))
}

impl Session {
    pub(crate) fn new(
        ctx: DispatchContext,
        dispatcher: Dispatcher,
        orchestrator: Option<Orchestrator>,
        options: SessionOptions,
    ) -> Self {
        Self {
            ctx,
            dispatcher,
            orchestrator,
            search: None,
            options,
            processing: Mutex::new(()),
        }
    }

    /// Prefetch search results for time-sensitive questions before asking the model.
    pub(crate) fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Switch the dashboard off its startup screen.
    pub(crate) fn start(&self) {
        match &self.orchestrator {
            Some(orchestrator) => info!(mode = ?orchestrator.mode(), "session ready"),
            None => info!("session ready without a language model"),
        }
        self.ctx
            .events
            .emit(Event::DisplayMode(READY_DISPLAY_MODE.to_string()));
    }

    /// Process one finalized utterance. Concurrent callers are serialized.
    pub(crate) fn handle_utterance(&self, raw: &str) -> UtteranceOutcome {
        let _turn = self
            .processing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(reply) = self.confirmation_reply(raw) {
            self.dispatcher.dispatch(&reply, &self.ctx);
            return UtteranceOutcome::Handled;
        }

        let cleaned = clean_transcript(raw);
        if cleaned.is_empty() {
            return UtteranceOutcome::Ignored;
        }
        self.heard(&cleaned);

        let named = contains_name(&cleaned, &self.options.names);
        if named {
            self.dispatcher.note_wake_word_heard(self.ctx.now());
        }
        if self.options.require_name && !named {
            debug!("not addressed; ignoring");
            return UtteranceOutcome::Ignored;
        }

        let command = if named {
            strip_name(&cleaned, &self.options.names)
        } else {
            cleaned
        };
        if command.is_empty() {
            return self.delegate(BARE_NAME_PROMPT);
        }
        let command = normalize_quotes(&command);

        if self.dispatcher.dispatch(&command, &self.ctx) {
            return UtteranceOutcome::Handled;
        }
        self.delegate(&command)
    }

    fn heard(&self, text: &str) {
        info!(text, "heard");
        self.ctx.events.emit(Event::Heard {
            text: text.to_string(),
        });
    }

    /// A yes/no answer to a pending confirmation. Read before filler trimming, which
    /// would eat "yeah". The name is optional here.
    fn confirmation_reply(&self, raw: &str) -> Option<String> {
        if self.dispatcher.pending_confirmation().is_none() {
            return None;
        }
        let text = normalize_quotes(raw)
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let named = contains_name(&text, &self.options.names);
        let reply = if named {
            strip_name(&text, &self.options.names)
        } else {
            text.clone()
        };
        classify_reply(&reply)?;
        self.heard(&text);
        if named {
            self.dispatcher.note_wake_word_heard(self.ctx.now());
        }
        Some(reply)
    }

    fn delegate(&self, command: &str) -> UtteranceOutcome {
        let Some(orchestrator) = &self.orchestrator else {
            self.ctx.say(OFFLINE_REPLY);
            return UtteranceOutcome::Offline;
        };
        let web_context = match &self.search {
            Some(search) if wants_web_context(command) => match search.search_text(command) {
                Ok(text) => Some(text),
                Err(err) => {
                    debug!(error = %err, "web context prefetch failed");
                    None
                }
            },
            _ => None,
        };
        let answer = orchestrator.ask(command, web_context.as_deref());
        self.ctx.say(&answer);
        UtteranceOutcome::Answered(clean_for_tts(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{Fixture, fixture};
    use crate::orchestrator::testing::{ScriptedClient, options};
    use crate::{
        AFFIRMATIVES, CANCEL_MESSAGE, ChatReply, DispatcherOptions, KEEPALIVE_REPLY, NEGATIVES,
        SearchError, SystemAction,
    };

    struct StaticSearch;

    impl WebSearch for StaticSearch {
        fn search_text(&self, query: &str) -> Result<String, SearchError> {
            Ok(format!("Title: {query}\nSnippet: fresh\nLink: https://example.com"))
        }
    }

    fn reply(text: &str) -> Result<ChatReply, crate::InferenceError> {
        Ok(ChatReply {
            content: text.into(),
            tool_calls: Vec::new(),
        })
    }

    fn names() -> Vec<String> {
        vec!["jarvis".into(), "jervis".into()]
    }

    fn session(fx: &Fixture, client: Option<Arc<ScriptedClient>>, require_name: bool) -> Session {
        let dispatcher = Dispatcher::new(&DispatcherOptions {
            names: names(),
            wake_window_secs: 25,
            confirm_timeout_secs: 20,
            legacy_keyword_triggers: false,
        })
        .unwrap();
        let orchestrator =
            client.map(|c| Orchestrator::new(c, fx.ctx.events.clone(), options()));
        Session::new(
            fx.ctx.clone(),
            dispatcher,
            orchestrator,
            SessionOptions {
                names: names(),
                require_name,
            },
        )
    }

    #[test]
    fn unnamed_utterances_are_ignored_but_reported() {
        let fx = fixture("session_unnamed");
        let s = session(&fx, None, true);
        assert_eq!(s.handle_utterance("Open Chrome"), UtteranceOutcome::Ignored);
        assert!(fx.host.spoken().is_empty());
        assert_eq!(
            fx.events.events.lock().unwrap().clone(),
            vec![Event::Heard {
                text: "open chrome".into()
            }]
        );
        assert_eq!(s.handle_utterance("  um  "), UtteranceOutcome::Ignored);
    }

    #[test]
    fn named_coin_flip_is_handled_locally() {
        let fx = fixture("session_coin");
        let s = session(&fx, None, true);
        assert_eq!(s.handle_utterance("Jarvis, flip a coin"), UtteranceOutcome::Handled);
        let said = fx.host.last_spoken().unwrap();
        assert!(said == "Heads, sir." || said == "Tails, sir.");
    }

    #[test]
    fn confirmation_reply_needs_no_name() {
        let fx = fixture("session_confirm");
        let s = session(&fx, None, true);
        assert_eq!(
            s.handle_utterance("Jarvis, shut down the computer"),
            UtteranceOutcome::Handled
        );
        assert!(fx.host.last_spoken().unwrap().starts_with("CONFIRM: Shut down this PC now?"));
        assert_eq!(s.handle_utterance("Yes."), UtteranceOutcome::Handled);
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Shutting down, sir."));
        assert_eq!(fx.host.actions(), vec![SystemAction::Shutdown]);
        // Without a pending confirmation the same word is not addressed.
        assert_eq!(s.handle_utterance("yes"), UtteranceOutcome::Ignored);
    }

    #[test]
    fn every_affirmative_confirms_with_or_without_the_name() {
        let fx = fixture("session_affirmatives");
        let s = session(&fx, None, true);
        let mut expected = Vec::new();
        for word in AFFIRMATIVES {
            for reply in [word.to_string(), format!("Jarvis, {word}."), format!("{word}!")] {
                s.handle_utterance("Jarvis, shut down the computer");
                assert!(s.dispatcher.pending_confirmation().is_some());
                assert_eq!(s.handle_utterance(&reply), UtteranceOutcome::Handled, "{reply}");
                expected.push(SystemAction::Shutdown);
                assert_eq!(fx.host.actions(), expected, "{reply}");
                assert_eq!(fx.host.last_spoken().as_deref(), Some("Shutting down, sir."));
                assert!(s.dispatcher.pending_confirmation().is_none(), "{reply}");
            }
        }
    }

    #[test]
    fn every_negative_cancels_with_or_without_the_name() {
        let fx = fixture("session_negatives");
        let s = session(&fx, None, true);
        for word in NEGATIVES {
            for reply in [word.to_string(), format!("jarvis {word}"), format!("{word}.")] {
                s.handle_utterance("Jarvis, shut down the computer");
                assert_eq!(s.handle_utterance(&reply), UtteranceOutcome::Handled, "{reply}");
                assert_eq!(fx.host.last_spoken().as_deref(), Some(CANCEL_MESSAGE), "{reply}");
                assert!(s.dispatcher.pending_confirmation().is_none(), "{reply}");
            }
        }
        assert!(fx.host.actions().is_empty());
    }

    #[test]
    fn filler_words_confirm_a_pending_shutdown() {
        let fx = fixture("session_yeah");
        let client = Arc::new(ScriptedClient::default());
        let s = session(&fx, Some(client.clone()), true);
        s.handle_utterance("Jarvis, shut down the computer");
        assert_eq!(s.handle_utterance("yeah"), UtteranceOutcome::Handled);
        assert_eq!(fx.host.actions(), vec![SystemAction::Shutdown]);

        s.handle_utterance("Jarvis, shut down the computer");
        assert_eq!(s.handle_utterance("jarvis yeah"), UtteranceOutcome::Handled);
        assert_eq!(
            fx.host.actions(),
            vec![SystemAction::Shutdown, SystemAction::Shutdown]
        );
        assert_eq!(client.chat_count(), 0);
    }

    #[test]
    fn start_moves_the_dashboard_home() {
        let fx = fixture("session_start");
        let s = session(&fx, None, true);
        s.start();
        let events = fx.events.events.lock().unwrap().clone();
        assert_eq!(events, vec![Event::DisplayMode("home".into())]);
        assert_eq!(
            events[0].to_json(),
            serde_json::json!({"type": "mode", "value": "home"})
        );
    }

    #[test]
    fn wake_word_opens_the_addressed_window() {
        let fx = fixture("session_window");
        let s = session(&fx, None, false);
        assert_eq!(s.handle_utterance("lock the computer"), UtteranceOutcome::Offline);
        assert!(fx.host.actions().is_empty());
        s.handle_utterance("jarvis what's the date");
        fx.clock.advance_secs(10);
        assert_eq!(s.handle_utterance("lock the computer"), UtteranceOutcome::Handled);
        assert_eq!(fx.host.actions(), vec![SystemAction::Lock]);
    }

    #[test]
    fn negated_command_goes_to_the_model() {
        let fx = fixture("session_negated");
        let client = Arc::new(ScriptedClient::default());
        client.push_chat(reply("Very well, I shall leave it closed."));
        let s = session(&fx, Some(client.clone()), true);
        assert_eq!(
            s.handle_utterance("Jarvis, don't open chrome"),
            UtteranceOutcome::Answered("Very well, I shall leave it closed.".into())
        );
        assert!(fx.host.launched.lock().unwrap().is_empty());
        let requests = client.chat_requests.lock().unwrap();
        assert_eq!(requests[0].0.last().unwrap().content, "don't open chrome");
    }

    #[test]
    fn bare_name_is_a_keepalive() {
        let fx = fixture("session_bare");
        let client = Arc::new(ScriptedClient::default());
        let s = session(&fx, Some(client.clone()), true);
        assert_eq!(
            s.handle_utterance("Jarvis."),
            UtteranceOutcome::Answered(KEEPALIVE_REPLY.into())
        );
        assert_eq!(client.chat_count(), 0);
    }

    #[test]
    fn without_a_model_the_session_apologises() {
        let fx = fixture("session_offline");
        let s = session(&fx, None, true);
        assert_eq!(
            s.handle_utterance("jarvis tell me a story"),
            UtteranceOutcome::Offline
        );
        assert_eq!(fx.host.last_spoken().as_deref(), Some(OFFLINE_REPLY));
    }

    #[test]
    fn time_sensitive_questions_get_web_context() {
        let fx = fixture("session_web");
        let client = Arc::new(ScriptedClient::default());
        client.push_chat(reply("Markets are up, sir."));
        let s = session(&fx, Some(client.clone()), true).with_search(Arc::new(StaticSearch));
        s.handle_utterance("jarvis what's the latest stock news");
        let requests = client.chat_requests.lock().unwrap();
        let web = requests[0]
            .0
            .iter()
            .find(|m| m.content.starts_with("Web context:\n"))
            .unwrap();
        assert!(web.content.contains("Snippet: fresh"));
        assert!(wants_web_context("who won the game"));
        assert!(!wants_web_context("tell me a joke"));
    }
}
