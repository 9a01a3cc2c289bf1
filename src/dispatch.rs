use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::{
    CANCEL_MESSAGE, CommandError, ConfirmationSlot, DispatchContext, Handler, HandlerOutcome,
    PendingConfirmation, Resolution, SafetyGate, TIMEOUT_MESSAGE, TriggerRule, WebSearch,
    resolve_guarded, trigger_table,
};

pub(crate) const HANDLER_FAILED_MESSAGE: &str = "Apologies, sir. That command failed.";
pub(crate) const SEARCH_FAILED_MESSAGE: &str = "Apologies, sir. Web search failed.";
const SPOKEN_SEARCH_MAX_CHARS: usize = 280;

/// Dispatcher state that must only change under one lock.
#[derive(Debug)]
struct DispatchState {
    last_wake: Option<DateTime<Utc>>,
    confirmation: ConfirmationSlot,
}

pub(crate) struct DispatcherOptions {
    pub(crate) names: Vec<String>,
    pub(crate) wake_window_secs: u64,
    pub(crate) confirm_timeout_secs: u64,
    pub(crate) legacy_keyword_triggers: bool,
}

pub(crate) struct Dispatcher {
    rules: Vec<TriggerRule>,
    gate: SafetyGate,
    search: Option<Arc<dyn WebSearch>>,
    search_shortcut: Regex,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub(crate) fn new(options: &DispatcherOptions) -> Result<Self, regex::Error> {
        Ok(Self {
            rules: trigger_table()?,
            gate: SafetyGate::new(
                &options.names,
                options.wake_window_secs,
                options.legacy_keyword_triggers,
            )?,
            search: None,
            search_shortcut: Regex::new(
                r"^(?:search the web for|search|google|look up)\s+(?:for\s+)?(.+)$",
            )?,
            state: Mutex::new(DispatchState {
                last_wake: None,
                confirmation: ConfirmationSlot::new(options.confirm_timeout_secs),
            }),
        })
    }

    /// Answer "search ..." utterances from the search client instead of opening a browser.
    pub(crate) fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn note_wake_word_heard(&self, at: DateTime<Utc>) {
        self.state().last_wake = Some(at);
    }

    pub(crate) fn pending_confirmation(&self) -> Option<PendingConfirmation> {
        self.state().confirmation.pending().cloned()
    }

    /// Route one utterance. Returns false when nothing here handled it and the caller
    /// should fall back to the language model.
    pub(crate) fn dispatch(&self, text: &str, ctx: &DispatchContext) -> bool {
        let low = text.trim().to_lowercase();
        if low.is_empty() {
            return false;
        }
        let now = ctx.now();
        let mut state = self.state();

        if let Some(resolution) = state.confirmation.resolve(&low, now) {
            drop(state);
            let message = match resolution {
                Resolution::Confirmed(action) => {
                    self.speak_outcome("confirmed", resolve_guarded(action, ctx), ctx);
                    return true;
                }
                Resolution::Canceled => CANCEL_MESSAGE,
                Resolution::TimedOut => TIMEOUT_MESSAGE,
            };
            ctx.say(message);
            return true;
        }

        if let Some(search) = &self.search {
            if let Some(query) = self
                .search_shortcut
                .captures(&low)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
            {
                drop(state);
                self.answer_search(search.as_ref(), &query, ctx);
                return true;
            }
        }

        let signals = self.gate.evaluate(&low, state.last_wake, now);
        for rule in &self.rules {
            if !rule.pattern.is_match(&low) {
                continue;
            }
            if !self.gate.permits(rule.tag, signals) {
                debug!(
                    rule = rule.name,
                    tag = %rule.tag,
                    addressed = signals.addressed,
                    imperative = signals.imperative,
                    negated = signals.negated,
                    "rule blocked by gate"
                );
                continue;
            }
            debug!(rule = rule.name, tag = %rule.tag, text = %low, "rule matched");

            let outcome = match &rule.handler {
                Handler::Execute(run) => {
                    drop(state);
                    run(&low, ctx)
                }
                Handler::Confirm(guard) => match guard(&low) {
                    Ok(Some(request)) => {
                        let prompt = state.confirmation.ask(request, now);
                        drop(state);
                        Ok(HandlerOutcome::Reply(prompt))
                    }
                    Ok(None) => Ok(HandlerOutcome::Declined),
                    Err(err) => Err(err),
                },
            };
            return self.speak_outcome(rule.name, outcome, ctx);
        }
        false
    }

    fn speak_outcome(
        &self,
        rule: &str,
        outcome: Result<HandlerOutcome, CommandError>,
        ctx: &DispatchContext,
    ) -> bool {
        let outcome = outcome.unwrap_or_else(|err| HandlerOutcome::Failed(err.to_string()));
        match outcome {
            HandlerOutcome::Reply(text) => {
                ctx.say(&text);
                true
            }
            HandlerOutcome::Declined => false,
            HandlerOutcome::Failed(reason) => {
                warn!(rule, reason = %reason, "handler failed");
                ctx.say(HANDLER_FAILED_MESSAGE);
                true
            }
        }
    }

    fn answer_search(&self, search: &dyn WebSearch, query: &str, ctx: &DispatchContext) {
        match search.search_text(query) {
            Ok(result) if result.chars().count() <= SPOKEN_SEARCH_MAX_CHARS => ctx.say(&result),
            Ok(_) => ctx.say(&format!("Top results for {query}, sir.")),
            Err(err) => {
                warn!(query, error = %err, "search shortcut failed");
                ctx.say(SEARCH_FAILED_MESSAGE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{Fixture, fixture};
    use crate::{GuardedAction, SearchError, SystemAction};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&DispatcherOptions {
            names: vec!["jarvis".into(), "jervis".into()],
            wake_window_secs: 25,
            confirm_timeout_secs: 20,
            legacy_keyword_triggers: false,
        })
        .unwrap()
    }

    fn woken(d: &Dispatcher, fx: &Fixture) {
        d.note_wake_word_heard(fx.ctx.now());
    }

    #[test]
    fn empty_text_is_unhandled() {
        let fx = fixture("dispatch_empty");
        assert!(!dispatcher().dispatch("   ", &fx.ctx));
        assert!(fx.host.spoken().is_empty());
    }

    #[test]
    fn informational_fires_without_addressing() {
        let fx = fixture("dispatch_coin");
        assert!(dispatcher().dispatch("flip a coin", &fx.ctx));
        let said = fx.host.last_spoken().unwrap();
        assert!(said == "Heads, sir." || said == "Tails, sir.");
    }

    #[test]
    fn shutdown_requires_confirmation_then_runs_once() {
        let fx = fixture("dispatch_shutdown");
        let d = dispatcher();
        woken(&d, &fx);
        assert!(d.dispatch("shut down the computer", &fx.ctx));
        assert_eq!(
            fx.host.last_spoken().as_deref(),
            Some("CONFIRM: Shut down this PC now? (say 'yes' or 'no' within 20 seconds)")
        );
        assert!(fx.host.actions().is_empty());
        assert_eq!(d.pending_confirmation().unwrap().action, GuardedAction::Shutdown);

        fx.clock.advance_secs(5);
        assert!(d.dispatch("yes", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Shutting down, sir."));
        assert_eq!(fx.host.actions(), vec![SystemAction::Shutdown]);
        assert!(d.pending_confirmation().is_none());

        // A second yes has nothing to confirm and nothing matches it.
        assert!(!d.dispatch("yes", &fx.ctx));
        assert_eq!(fx.host.actions(), vec![SystemAction::Shutdown]);
    }

    #[test]
    fn late_yes_times_out_without_acting() {
        let fx = fixture("dispatch_late");
        let d = dispatcher();
        woken(&d, &fx);
        d.dispatch("restart the computer", &fx.ctx);
        fx.clock.advance_secs(21);
        assert!(d.dispatch("yes", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(fx.host.actions().is_empty());
    }

    #[test]
    fn no_cancels_and_unrelated_keeps_pending() {
        let fx = fixture("dispatch_cancel");
        let d = dispatcher();
        woken(&d, &fx);
        d.dispatch("exit", &fx.ctx);
        assert!(d.pending_confirmation().is_some());

        assert!(d.dispatch("what's the time", &fx.ctx));
        assert!(fx.host.last_spoken().unwrap().starts_with("It is "));
        assert!(d.pending_confirmation().is_some());

        assert!(d.dispatch("no", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some(CANCEL_MESSAGE));
        assert!(d.pending_confirmation().is_none());
        assert!(fx.host.actions().is_empty());
    }

    #[test]
    fn negated_action_falls_through() {
        let fx = fixture("dispatch_negated");
        let d = dispatcher();
        woken(&d, &fx);
        assert!(!d.dispatch("jarvis don't open chrome", &fx.ctx));
        assert!(fx.host.spoken().is_empty());
        assert!(fx.host.launched.lock().unwrap().is_empty());
    }

    #[test]
    fn unaddressed_action_is_skipped() {
        let fx = fixture("dispatch_unaddressed");
        let d = dispatcher();
        assert!(!d.dispatch("open chrome", &fx.ctx));
        woken(&d, &fx);
        assert!(d.dispatch("open chrome", &fx.ctx));
        assert_eq!(fx.host.launched.lock().unwrap().clone(), vec!["chrome"]);
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Complete, sir."));
    }

    #[test]
    fn wake_window_expires() {
        let fx = fixture("dispatch_window");
        let d = dispatcher();
        woken(&d, &fx);
        fx.clock.advance_secs(26);
        assert!(!d.dispatch("lock the computer", &fx.ctx));
        assert!(fx.host.actions().is_empty());
    }

    #[test]
    fn blocked_rule_lets_later_rules_match() {
        let fx = fixture("dispatch_scan");
        let d = dispatcher();
        // "stop" matches media first, which is blocked because nobody addressed us.
        assert!(d.dispatch("stop, thank you", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Quite so, sir."));
        assert!(fx.host.actions().is_empty());
    }

    #[test]
    fn handler_failure_is_apologised_and_handled() {
        let fx = fixture("dispatch_failure");
        let d = dispatcher();
        woken(&d, &fx);
        // Make the notes path a directory so appending fails.
        std::fs::create_dir_all(fx.ctx.notes_path()).unwrap();
        assert!(d.dispatch("take a note buy milk", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some(HANDLER_FAILED_MESSAGE));
    }

    struct FixedSearch(Result<String, ()>);

    impl WebSearch for FixedSearch {
        fn search_text(&self, _query: &str) -> Result<String, SearchError> {
            self.0.clone().map_err(|_| SearchError::Transport("offline".into()))
        }
    }

    #[test]
    fn search_shortcut_speaks_short_results() {
        let fx = fixture("dispatch_search");
        let d = dispatcher().with_search(Arc::new(FixedSearch(Ok("Paris is the capital.".into()))));
        assert!(d.dispatch("look up capital of france", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Paris is the capital."));

        let d = dispatcher().with_search(Arc::new(FixedSearch(Ok("x".repeat(400)))));
        assert!(d.dispatch("search for rust", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some("Top results for rust, sir."));

        let d = dispatcher().with_search(Arc::new(FixedSearch(Err(()))));
        assert!(d.dispatch("google weather", &fx.ctx));
        assert_eq!(fx.host.last_spoken().as_deref(), Some(SEARCH_FAILED_MESSAGE));
    }
}
