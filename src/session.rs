//! Per-run mutable state owned by the crawl loop.

use crate::config::{ProxyRoute, TimingPolicy};

/// Request counter, active identity and budget of one crawl session.
#[derive(Debug, Clone)]
pub struct SessionState {
    requests_sent: u64,
    user_agent: String,
    proxy: ProxyRoute,
    timing: TimingPolicy,
    page_budget: Option<u64>,
}

impl SessionState {
    pub fn new(proxy: ProxyRoute, timing: TimingPolicy, page_budget: Option<u64>) -> Self {
        Self {
            requests_sent: 0,
            user_agent: String::new(),
            proxy,
            timing,
            page_budget,
        }
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    /// Counted once per dispatch attempt, whatever its outcome.
    pub fn record_request(&mut self) -> u64 {
        self.requests_sent += 1;
        self.requests_sent
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: String) {
        self.user_agent = user_agent;
    }

    pub fn proxy(&self) -> &ProxyRoute {
        &self.proxy
    }

    pub fn timing(&self) -> &TimingPolicy {
        &self.timing
    }

    /// `None` means unlimited.
    pub fn budget_remaining(&self) -> Option<u64> {
        self.page_budget
            .map(|budget| budget.saturating_sub(self.requests_sent))
    }

    pub fn budget_exhausted(&self) -> bool {
        self.budget_remaining() == Some(0)
    }
}
