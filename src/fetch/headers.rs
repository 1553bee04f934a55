use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use std::sync::Arc;

/// Desktop browser User-Agents used when the config supplies none.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml, text/xml;q=0.9, */*;q=0.8";
const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";
const LANGUAGE: &str = "en-US,en;q=0.5";

/// Rotating pool of request headers.
///
/// Every call picks a fresh random User-Agent so concurrent workers do not
/// present one fixed fingerprint to the same origin.
#[derive(Debug, Clone)]
pub struct HeaderPool {
    user_agents: Arc<[String]>,
}

impl Default for HeaderPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl HeaderPool {
    /// Builds a pool from configured agents, falling back to
    /// [`DEFAULT_USER_AGENTS`] when the list is empty.
    pub fn new(user_agents: Vec<String>) -> Self {
        let user_agents: Vec<String> = user_agents
            .into_iter()
            .filter(|ua| HeaderValue::from_str(ua).is_ok())
            .collect();
        let user_agents = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            user_agents
        };
        Self {
            user_agents: Arc::from(user_agents),
        }
    }

    pub fn random_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }

    /// Headers for feed requests.
    pub fn feed_headers(&self) -> HeaderMap {
        self.build(FEED_ACCEPT)
    }

    /// Headers for article page requests (Open-Graph lookups).
    pub fn page_headers(&self) -> HeaderMap {
        self.build(PAGE_ACCEPT)
    }

    fn build(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(self.random_user_agent()) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(LANGUAGE));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers
    }
}
