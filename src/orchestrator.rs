//! Tool-augmented inference: one `ask` per unhandled utterance.
//!
//! The chat path may run up to `MAX_TOOL_ROUNDS` rounds of `web_search` calls. Once the
//! rounds are spent the next request goes out without tools, so a single `ask` never
//! issues more than `MAX_TOOL_ROUNDS + 1` chat requests. Any chat failure drops to the
//! prompt-only generate path for that call.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    AssistantConfig, ChatMessage, ChatOptions, ChatReply, ConversationTurn, Event, EventSink,
    InferenceClient, InferenceError, MemoryScope, MemoryStore, SamplingOptions, TurnRole,
    WEB_SEARCH_TOOL, WebSearch, format_memory_prefix,
};

pub(crate) const MAX_TOOL_ROUNDS: usize = 2;

pub(crate) const KEEPALIVE_REPLY: &str = "At your service, sir.";
pub(crate) const EMPTY_REPLY: &str = "Understood, sir.";
pub(crate) const TIMEOUT_REPLY: &str = "Apologies, sir. My model timed out.";
pub(crate) const UNAVAILABLE_REPLY: &str = "Apologies, sir. My language model is unavailable.";

const TOOL_NUDGE: &str =
    "Use the tool results above and answer concisely now. Do not reply with 'searching' or 'query pending'.";
const DIRECT_NUDGE: &str = "Answer directly in 1-2 sentences.";

const MEMORY_SCORE_FLOOR: f64 = 0.20;
const MEMORY_HITS: usize = 5;
const MEMORY_IMPORTANCE: f64 = 0.6;
const MEMORY_SOURCE: &str = "aethervoice";

const KEEPALIVE_WORDS: &[&str] = &["ok", "okay", "yes", "yo", "ya", "hi", "hey", "sup", "yo?", "yes?"];
const CONSULT_TRIGGERS: &[&str] = &[
    "remember", "from now on", "call me", "my ", "i am", "i'm", "favorite", "prefer",
    "birthday", "address", "email", "phone", "roommate", "girlfriend", "class", "course",
    "schedule", "project", "name is", "i like",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InferenceMode {
    /// Chat endpoint with tool declarations.
    Chat,
    /// Single prompt, no tools. Chosen once when the startup probe fails.
    Generate,
}

static KEEPALIVE_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(are you there|you there|hello|hi|hey)$").unwrap());

pub(crate) fn is_keepalive(text: &str) -> bool {
    let s = text.trim().to_lowercase();
    if s.is_empty() {
        return false;
    }
    if s.len() <= 6 && KEEPALIVE_WORDS.contains(&s.as_str()) {
        return true;
    }
    KEEPALIVE_PHRASE.is_match(&s)
}

/// Whether an utterance is worth a memory lookup and, afterwards, a memory write.
pub(crate) fn should_consult_memory(text: &str) -> bool {
    let s = text.to_lowercase();
    if s.chars().count() < 10 || is_keepalive(&s) {
        return false;
    }
    CONSULT_TRIGGERS.iter().any(|t| s.contains(t))
}

pub(crate) struct OrchestratorOptions {
    pub(crate) persona: String,
    pub(crate) memory_turns: usize,
    pub(crate) tool_timeout: Duration,
    pub(crate) direct_timeout: Duration,
    pub(crate) fallback_timeout: Duration,
    pub(crate) scope: MemoryScope,
}

impl OrchestratorOptions {
    pub(crate) fn from_config(config: &AssistantConfig) -> Self {
        Self {
            persona: config.persona.clone(),
            memory_turns: config.memory_turns,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            direct_timeout: Duration::from_secs(config.direct_timeout_secs),
            fallback_timeout: Duration::from_secs(config.fallback_timeout_secs),
            scope: MemoryScope {
                user_id: config.user_id.clone(),
                agent_id: Some(config.agent_id.clone()),
                namespace: config.namespace.clone(),
            },
        }
    }
}

pub(crate) struct Orchestrator {
    client: Arc<dyn InferenceClient>,
    search: Option<Arc<dyn WebSearch>>,
    memory: Option<Arc<MemoryStore>>,
    events: Arc<dyn EventSink>,
    options: OrchestratorOptions,
    mode: InferenceMode,
    history: Mutex<VecDeque<ConversationTurn>>,
}

impl Orchestrator {
    /// Probes the endpoint once; a failed probe pins the orchestrator to generate mode.
    pub(crate) fn new(
        client: Arc<dyn InferenceClient>,
        events: Arc<dyn EventSink>,
        options: OrchestratorOptions,
    ) -> Self {
        let mode = match client.probe() {
            Ok(()) => InferenceMode::Chat,
            Err(err) => {
                warn!(error = %err, "inference probe failed; using generate mode for this session");
                InferenceMode::Generate
            }
        };
        info!(?mode, "orchestrator ready");
        Self {
            client,
            search: None,
            memory: None,
            events,
            options,
            mode,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub(crate) fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub(crate) fn mode(&self) -> InferenceMode {
        self.mode
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<ConversationTurn>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn recent_turns(&self) -> Vec<ConversationTurn> {
        self.history().iter().cloned().collect()
    }

    pub(crate) fn ask(&self, user_text: &str, web_context: Option<&str>) -> String {
        self.events.emit(Event::Thinking(true));
        let answer = self.answer(user_text, web_context);
        self.record(user_text, &answer);
        self.events.emit(Event::Thinking(false));
        answer
    }

    fn answer(&self, user_text: &str, web_context: Option<&str>) -> String {
        if is_keepalive(user_text) {
            return KEEPALIVE_REPLY.to_string();
        }
        let memory_prefix = self.memory_prefix(user_text);
        if self.mode == InferenceMode::Chat {
            match self.chat_answer(user_text, web_context, memory_prefix.as_deref()) {
                Ok(answer) => return answer,
                Err(err) => warn!(error = %err, "chat request failed; falling back to generate"),
            }
        }
        self.generate_answer(user_text, web_context, memory_prefix.as_deref())
    }

    fn memory_prefix(&self, user_text: &str) -> Option<String> {
        let memory = self.memory.as_ref()?;
        if !should_consult_memory(user_text) {
            return None;
        }
        let scope = &self.options.scope;
        let hits = match memory.search(user_text, &scope.user_id, Some(&scope.namespace), MEMORY_HITS) {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "memory search failed");
                return None;
            }
        };
        let hits: Vec<_> = hits
            .into_iter()
            .filter(|h| h.score.is_some_and(|s| s >= MEMORY_SCORE_FLOOR))
            .collect();
        debug!(hits = hits.len(), "memory hits");
        (!hits.is_empty()).then(|| format_memory_prefix(&hits))
    }

    fn opening_messages(
        &self,
        user_text: &str,
        web_context: Option<&str>,
        memory_prefix: Option<&str>,
    ) -> Vec<ChatMessage> {
        let system = match memory_prefix {
            Some(prefix) => format!("{}\n{prefix}", self.options.persona),
            None => self.options.persona.clone(),
        };
        let mut messages = vec![ChatMessage::system(system)];
        if let Some(context) = web_context {
            messages.push(ChatMessage::system(format!("Web context:\n{context}")));
        }
        for turn in self.history().iter() {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.content.clone()),
                TurnRole::Assistant => ChatMessage::assistant(turn.content.clone(), Vec::new()),
            });
        }
        messages.push(ChatMessage::user(user_text));
        messages
    }

    fn chat_answer(
        &self,
        user_text: &str,
        web_context: Option<&str>,
        memory_prefix: Option<&str>,
    ) -> Result<String, InferenceError> {
        let mut messages = self.opening_messages(user_text, web_context, memory_prefix);
        let with_tools = ChatOptions {
            with_tools: true,
            sampling: SamplingOptions::TOOLS,
            timeout: self.options.tool_timeout,
        };

        let mut rounds = 0;
        loop {
            let reply = self.client.chat(&messages, with_tools)?;
            if reply.tool_calls.is_empty() {
                let answer = reply.content.trim();
                if !answer.is_empty() {
                    return Ok(answer.to_string());
                }
                if rounds == 0 {
                    return Ok(EMPTY_REPLY.to_string());
                }
                break;
            }
            rounds += 1;
            debug!(round = rounds, calls = reply.tool_calls.len(), "tool round");
            self.run_tools(&mut messages, reply, user_text);
            if rounds == MAX_TOOL_ROUNDS {
                break;
            }
        }

        messages.push(ChatMessage::system(DIRECT_NUDGE));
        let direct = ChatOptions {
            with_tools: false,
            sampling: SamplingOptions::TOOLS,
            timeout: self.options.direct_timeout,
        };
        let answer = match self.client.chat(&messages, direct) {
            Ok(reply) => reply.content.trim().to_string(),
            Err(err) => {
                warn!(error = %err, "direct answer request failed");
                String::new()
            }
        };
        Ok(if answer.is_empty() { EMPTY_REPLY.to_string() } else { answer })
    }

    fn run_tools(&self, messages: &mut Vec<ChatMessage>, reply: ChatReply, user_text: &str) {
        let calls = reply.tool_calls.clone();
        messages.push(ChatMessage::assistant(reply.content, reply.tool_calls));
        for call in calls {
            if call.name != WEB_SEARCH_TOOL {
                debug!(tool = %call.name, "ignoring unknown tool call");
                continue;
            }
            let query = call.str_arg("query").unwrap_or(user_text);
            let result = match &self.search {
                Some(search) => search
                    .search_text(query)
                    .unwrap_or_else(|err| format!("Error during web search: {err}")),
                None => "Web search is not available.".to_string(),
            };
            messages.push(ChatMessage::tool(WEB_SEARCH_TOOL, result, call.id));
        }
        messages.push(ChatMessage::system(TOOL_NUDGE));
    }

    fn generate_prompt(
        &self,
        user_text: &str,
        web_context: Option<&str>,
        memory_prefix: Option<&str>,
    ) -> String {
        let mut blocks = Vec::new();
        if let Some(prefix) = memory_prefix {
            blocks.push(format!("[MEMORY]\n{prefix}\n[/MEMORY]"));
        }
        if let Some(context) = web_context {
            blocks.push(format!("[WEB RESULTS]\n{context}\n[/WEB RESULTS]"));
        }
        let history = self.history();
        if !history.is_empty() {
            let recent: Vec<String> = history
                .iter()
                .map(|t| match t.role {
                    TurnRole::User => format!("User: {}", t.content),
                    TurnRole::Assistant => format!("Assistant: {}", t.content),
                })
                .collect();
            blocks.push(format!("[RECENT]\n{}\n[/RECENT]", recent.join("\n")));
        }
        let joined = if blocks.is_empty() {
            String::new()
        } else {
            format!("{}\n\n", blocks.join("\n\n"))
        };
        format!(
            "{}\n{joined}Answer briefly and directly.\nUser: {user_text}\n",
            self.options.persona
        )
    }

    fn generate_answer(
        &self,
        user_text: &str,
        web_context: Option<&str>,
        memory_prefix: Option<&str>,
    ) -> String {
        let prompt = self.generate_prompt(user_text, web_context, memory_prefix);
        match self.client.generate(&prompt, self.options.fallback_timeout) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => EMPTY_REPLY.to_string(),
            Err(err) if err.is_timeout() => {
                warn!("generate request timed out");
                TIMEOUT_REPLY.to_string()
            }
            Err(err) => {
                warn!(error = %err, "generate request failed");
                UNAVAILABLE_REPLY.to_string()
            }
        }
    }

    fn record(&self, user_text: &str, answer: &str) {
        let turns = [
            ConversationTurn::user(user_text),
            ConversationTurn::assistant(answer),
        ];
        {
            let mut history = self.history();
            history.extend(turns.iter().cloned());
            let cap = self.options.memory_turns * 2;
            while history.len() > cap {
                history.pop_front();
            }
        }
        let Some(memory) = &self.memory else {
            return;
        };
        if !should_consult_memory(user_text) {
            return;
        }
        match memory.add(&turns, &self.options.scope, MEMORY_SOURCE, MEMORY_IMPORTANCE) {
            Ok(inserted) => debug!(inserted, "memory updated"),
            Err(err) => warn!(error = %err, "memory add failed"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Replays canned results and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        pub(crate) probe_fails: bool,
        pub(crate) chat_script: Mutex<VecDeque<Result<ChatReply, InferenceError>>>,
        pub(crate) generate_script: Mutex<VecDeque<Result<String, InferenceError>>>,
        pub(crate) chat_requests: Mutex<Vec<(Vec<ChatMessage>, ChatOptions)>>,
        pub(crate) generate_requests: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub(crate) fn push_chat(&self, reply: Result<ChatReply, InferenceError>) {
            self.chat_script.lock().unwrap().push_back(reply);
        }

        pub(crate) fn push_generate(&self, reply: Result<String, InferenceError>) {
            self.generate_script.lock().unwrap().push_back(reply);
        }

        pub(crate) fn chat_count(&self) -> usize {
            self.chat_requests.lock().unwrap().len()
        }
    }

    impl InferenceClient for ScriptedClient {
        fn probe(&self) -> Result<(), InferenceError> {
            if self.probe_fails {
                Err(InferenceError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatReply, InferenceError> {
            self.chat_requests
                .lock()
                .unwrap()
                .push((messages.to_vec(), options));
            self.chat_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatReply::default()))
        }

        fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, InferenceError> {
            self.generate_requests.lock().unwrap().push(prompt.to_string());
            self.generate_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    pub(crate) fn options() -> OrchestratorOptions {
        OrchestratorOptions {
            persona: "You are a valet.".into(),
            memory_turns: 2,
            tool_timeout: Duration::from_secs(1),
            direct_timeout: Duration::from_secs(1),
            fallback_timeout: Duration::from_secs(1),
            scope: MemoryScope {
                user_id: "owner".into(),
                agent_id: Some("aethervoice-test".into()),
                namespace: "personal".into(),
            },
        }
    }
}
