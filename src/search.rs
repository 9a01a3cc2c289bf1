//! Web search used both as an LLM tool and as a spoken shortcut.
//!
//! Requests are spaced by a process-wide minimum gap, rate-limit replies are retried with
//! backoff on the primary backend, and everything else falls through to an alternate
//! backend and finally to opening the results page in a browser.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{Host, SearchError, env_optional};

const PRIMARY_ATTEMPTS: u32 = 3;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub(crate) const RATE_LIMITED_FALLBACK: &str =
    "Search engine is rate-limiting at the moment, sir. I've opened results in your browser.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SearchHit {
    pub(crate) title: String,
    pub(crate) snippet: String,
    pub(crate) link: String,
}

pub(crate) fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| format!("Title: {}\nSnippet: {}\nLink: {}", h.title, h.snippet, h.link))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Seconds to wait before retry `attempt` (0-based) after a rate-limit reply.
/// `jitter` is expected in `[0, 1)`.
pub(crate) fn backoff_delay(attempt: u32, jitter: f64) -> f64 {
    1.0 + 1.25 * attempt as f64 + jitter
}

pub(crate) trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

pub(crate) trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub(crate) struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Text search as seen by the dispatcher and the orchestrator.
pub(crate) trait WebSearch: Send + Sync {
    fn search_text(&self, query: &str) -> Result<String, SearchError>;
}

pub(crate) struct SearchClient {
    primary: Box<dyn SearchBackend>,
    alternate: Box<dyn SearchBackend>,
    host: Option<Arc<dyn Host>>,
    sleeper: Arc<dyn Sleeper>,
    min_gap: Duration,
    max_results: usize,
    /// Completion time of the previous provider request.
    last_request: Mutex<Option<Instant>>,
}

impl SearchClient {
    pub(crate) fn new(
        primary: Box<dyn SearchBackend>,
        alternate: Box<dyn SearchBackend>,
        min_gap: Duration,
        max_results: usize,
    ) -> Self {
        Self {
            primary,
            alternate,
            host: None,
            sleeper: Arc::new(ThreadSleeper),
            min_gap,
            max_results: max_results.max(1),
            last_request: Mutex::new(None),
        }
    }

    pub(crate) fn duckduckgo(min_gap: Duration, max_results: usize) -> Self {
        let user_agent = env_optional("AETHERVOICE_UA").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        Self::new(
            Box::new(DuckDuckGo::new(DdgFlavor::Lite, &user_agent)),
            Box::new(DuckDuckGo::new(DdgFlavor::Html, &user_agent)),
            min_gap,
            max_results,
        )
    }

    /// Host used to open the results page when every backend fails.
    pub(crate) fn with_host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// One provider request, spaced at least `min_gap` after the previous one finished.
    /// The lock is held across the wait and the request so concurrent callers queue up.
    fn throttled(
        &self,
        backend: &dyn SearchBackend,
        query: &str,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_gap {
                let wait = self.min_gap - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "search throttle");
                self.sleeper.sleep(wait);
            }
        }
        let result = backend.search(query, self.max_results);
        *last = Some(Instant::now());
        result
    }

    /// Ranked hits from the first backend that produces any, or `None` when all failed.
    pub(crate) fn search_hits(&self, query: &str) -> Option<Vec<SearchHit>> {
        for attempt in 0..PRIMARY_ATTEMPTS {
            match self.throttled(self.primary.as_ref(), query) {
                Ok(hits) if !hits.is_empty() => return Some(hits),
                Ok(_) => break,
                Err(err) if err.is_rate_limit() && attempt + 1 < PRIMARY_ATTEMPTS => {
                    let delay = backoff_delay(attempt, rand::random::<f64>());
                    debug!(backend = self.primary.name(), attempt, delay, "rate limited, backing off");
                    self.sleeper.sleep(Duration::from_secs_f64(delay));
                }
                Err(err) => {
                    warn!(backend = self.primary.name(), error = %err, "search backend failed");
                    break;
                }
            }
        }

        match self.throttled(self.alternate.as_ref(), query) {
            Ok(hits) if !hits.is_empty() => Some(hits),
            Ok(_) => None,
            Err(err) => {
                warn!(backend = self.alternate.name(), error = %err, "search backend failed");
                None
            }
        }
    }
}

impl WebSearch for SearchClient {
    fn search_text(&self, query: &str) -> Result<String, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::Empty);
        }
        if let Some(hits) = self.search_hits(query) {
            return Ok(format_hits(&hits));
        }
        if let Some(host) = &self.host {
            let url = format!("https://duckduckgo.com/?q={}", urlencoding::encode(query));
            host.open_external_resource(&url);
        }
        Ok(RATE_LIMITED_FALLBACK.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DdgFlavor {
    Lite,
    Html,
}

pub(crate) struct DuckDuckGo {
    flavor: DdgFlavor,
    agent: ureq::Agent,
}

impl DuckDuckGo {
    pub(crate) fn new(flavor: DdgFlavor, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(SEARCH_TIMEOUT)
            .timeout_read(SEARCH_TIMEOUT)
            .timeout_write(SEARCH_TIMEOUT)
            .user_agent(user_agent)
            .build();
        Self { flavor, agent }
    }

    fn endpoint(&self) -> &'static str {
        match self.flavor {
            DdgFlavor::Lite => "https://lite.duckduckgo.com/lite/",
            DdgFlavor::Html => "https://html.duckduckgo.com/html/",
        }
    }
}

impl SearchBackend for DuckDuckGo {
    fn name(&self) -> &'static str {
        match self.flavor {
            DdgFlavor::Lite => "duckduckgo-lite",
            DdgFlavor::Html => "duckduckgo-html",
        }
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .agent
            .post(self.endpoint())
            .send_form(&[("q", query), ("kl", "wt-wt")]);
        let body = match response {
            Ok(resp) if resp.status() == 202 => {
                return Err(SearchError::RateLimited { status: 202 });
            }
            Ok(resp) => resp
                .into_string()
                .map_err(|e| SearchError::Transport(e.to_string()))?,
            Err(ureq::Error::Status(429, _)) => {
                return Err(SearchError::RateLimited { status: 429 });
            }
            Err(ureq::Error::Status(code, _)) => return Err(SearchError::Status { code }),
            Err(ureq::Error::Transport(err)) => return Err(SearchError::Transport(err.to_string())),
        };
        if body.to_ascii_lowercase().contains("ratelimit") {
            return Err(SearchError::RateLimited { status: 200 });
        }
        match self.flavor {
            DdgFlavor::Lite => parse_lite_results(&body, max_results),
            DdgFlavor::Html => parse_html_results(&body, max_results),
        }
    }
}

fn selector(css: &str) -> Result<Selector, SearchError> {
    Selector::parse(css).map_err(|e| SearchError::Parse(format!("{css}: {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result links are wrapped in a redirect carrying the target in `uddg`.
pub(crate) fn resolve_result_link(href: &str) -> String {
    let Some(start) = href.find("uddg=") else {
        return if href.starts_with("//") {
            format!("https:{href}")
        } else {
            href.to_string()
        };
    };
    let encoded = &href[start + 5..];
    let encoded = encoded.split('&').next().unwrap_or(encoded);
    urlencoding::decode(encoded)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| encoded.to_string())
}

pub(crate) fn parse_lite_results(body: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
    let document = Html::parse_document(body);
    let link_sel = selector("a.result-link")?;
    let snippet_sel = selector("td.result-snippet")?;

    let snippets: Vec<String> = document.select(&snippet_sel).map(element_text).collect();
    let hits = document
        .select(&link_sel)
        .enumerate()
        .map(|(i, a)| SearchHit {
            title: element_text(a),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
            link: resolve_result_link(a.value().attr("href").unwrap_or_default()),
        })
        .filter(|h| !h.title.is_empty())
        .take(max_results)
        .collect();
    Ok(hits)
}

pub(crate) fn parse_html_results(body: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
    let document = Html::parse_document(body);
    let result_sel = selector("div.result")?;
    let title_sel = selector("a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut hits = Vec::new();
    for result in document.select(&result_sel) {
        let Some(anchor) = result.select(&title_sel).next() else {
            continue;
        };
        let title = element_text(anchor);
        if title.is_empty() {
            continue;
        }
        hits.push(SearchHit {
            title,
            snippet: result.select(&snippet_sel).next().map(element_text).unwrap_or_default(),
            link: resolve_result_link(anchor.value().attr("href").unwrap_or_default()),
        });
        if hits.len() >= max_results {
            break;
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use std::collections::VecDeque;

    /// Backend that replays scripted results and records when it was called.
    struct ScriptedBackend {
        name: &'static str,
        script: Mutex<VecDeque<Result<Vec<SearchHit>, SearchError>>>,
        calls: Arc<Mutex<Vec<(&'static str, Instant)>>>,
    }

    impl ScriptedBackend {
        fn new(
            name: &'static str,
            script: Vec<Result<Vec<SearchHit>, SearchError>>,
            calls: Arc<Mutex<Vec<(&'static str, Instant)>>>,
        ) -> Box<Self> {
            Box::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls,
            })
        }
    }

    impl SearchBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>, SearchError> {
            self.calls.lock().unwrap().push((self.name, Instant::now()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![hit("default")]))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            snippet: format!("about {title}"),
            link: format!("https://example.com/{title}"),
        }
    }

    #[test]
    fn backoff_grows_linearly_with_jitter() {
        assert_eq!(backoff_delay(0, 0.0), 1.0);
        assert_eq!(backoff_delay(1, 0.0), 2.25);
        assert_eq!(backoff_delay(2, 0.5), 4.0);
    }

    #[test]
    fn rate_limits_back_off_then_succeed_on_primary() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = SearchClient::new(
            ScriptedBackend::new(
                "lite",
                vec![
                    Err(SearchError::RateLimited { status: 202 }),
                    Ok(vec![hit("rust")]),
                ],
                calls.clone(),
            ),
            ScriptedBackend::new("html", vec![], calls.clone()),
            Duration::ZERO,
            5,
        )
        .with_sleeper(sleeper.clone());

        let text = client.search_text("rust").unwrap();
        assert_eq!(
            text,
            "Title: rust\nSnippet: about rust\nLink: https://example.com/rust"
        );
        let names: Vec<_> = calls.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["lite", "lite"]);
        let slept = sleeper.slept.lock().unwrap().clone();
        assert_eq!(slept.len(), 1);
        assert!(slept[0] >= Duration::from_secs(1) && slept[0] < Duration::from_secs(2));
    }

    #[test]
    fn non_rate_limit_error_goes_straight_to_alternate() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = SearchClient::new(
            ScriptedBackend::new("lite", vec![Err(SearchError::Status { code: 500 })], calls.clone()),
            ScriptedBackend::new("html", vec![Ok(vec![hit("alt")])], calls.clone()),
            Duration::ZERO,
            5,
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()));

        assert!(client.search_text("q").unwrap().contains("Title: alt"));
        let names: Vec<_> = calls.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["lite", "html"]);
    }

    #[test]
    fn total_failure_opens_browser_and_degrades() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let host = Arc::new(RecordingHost::default());
        let limited = || Err(SearchError::RateLimited { status: 429 });
        let client = SearchClient::new(
            ScriptedBackend::new("lite", vec![limited(), limited(), limited()], calls.clone()),
            ScriptedBackend::new("html", vec![Ok(vec![])], calls.clone()),
            Duration::ZERO,
            5,
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()))
        .with_host(host.clone());

        assert_eq!(client.search_text("rust news").unwrap(), RATE_LIMITED_FALLBACK);
        assert_eq!(calls.lock().unwrap().len(), 4);
        assert_eq!(host.opened(), vec!["https://duckduckgo.com/?q=rust%20news"]);
    }

    #[test]
    fn empty_query_is_rejected() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = SearchClient::new(
            ScriptedBackend::new("lite", vec![], calls.clone()),
            ScriptedBackend::new("html", vec![], calls.clone()),
            Duration::ZERO,
            5,
        );
        assert!(matches!(client.search_text("   "), Err(SearchError::Empty)));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn concurrent_callers_are_spaced_by_min_gap() {
        let gap = Duration::from_millis(50);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::new(SearchClient::new(
            ScriptedBackend::new("lite", vec![], calls.clone()),
            ScriptedBackend::new("html", vec![], calls.clone()),
            gap,
            5,
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let client = client.clone();
                thread::spawn(move || client.search_text(&format!("query {i}")).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut times: Vec<Instant> = calls.lock().unwrap().iter().map(|(_, t)| *t).collect();
        times.sort();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= gap);
        }
    }

    #[test]
    fn lite_page_is_parsed_with_decoded_links() {
        let body = r#"
            <table>
              <tr><td><a class="result-link" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&rut=abc">Rust   Programming Language</a></td></tr>
              <tr><td class="result-snippet">A language empowering everyone.</td></tr>
              <tr><td><a class="result-link" href="https://doc.rust-lang.org/book/">The Book</a></td></tr>
              <tr><td class="result-snippet">Learn Rust.</td></tr>
            </table>"#;
        let hits = parse_lite_results(body, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust Programming Language");
        assert_eq!(hits[0].link, "https://www.rust-lang.org/");
        assert_eq!(hits[1].snippet, "Learn Rust.");
        assert_eq!(parse_lite_results(body, 1).unwrap().len(), 1);
    }

    #[test]
    fn html_page_is_parsed() {
        let body = r#"
            <div class="result">
              <h2><a class="result__a" href="https://example.com/a">First</a></h2>
              <a class="result__snippet">Snippet one</a>
            </div>
            <div class="result"><span>no anchor</span></div>
            <div class="result">
              <h2><a class="result__a" href="https://example.com/b">Second</a></h2>
            </div>"#;
        let hits = parse_html_results(body, 5).unwrap();
        assert_eq!(
            hits,
            vec![
                SearchHit {
                    title: "First".into(),
                    snippet: "Snippet one".into(),
                    link: "https://example.com/a".into(),
                },
                SearchHit {
                    title: "Second".into(),
                    snippet: String::new(),
                    link: "https://example.com/b".into(),
                },
            ]
        );
    }
}
