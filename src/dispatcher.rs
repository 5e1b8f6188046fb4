//! One fetch per frontier pop, with user-agent and cookie rotation.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::num::NonZeroU32;
use tracing::debug;

use crate::network::{FetchError, FetchResult, PageRequest, Transport};
use crate::session::SessionState;

/// A fetched page plus the cookie it was requested with.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub page: FetchResult,
    pub cookie: Option<String>,
}

pub struct Dispatcher {
    transport: Box<dyn Transport>,
    user_agents: Vec<String>,
    rotate_every: NonZeroU32,
    cookies: Vec<String>,
    rng: StdRng,
}

impl Dispatcher {
    pub fn new(
        transport: Box<dyn Transport>,
        user_agents: Vec<String>,
        rotate_every: NonZeroU32,
        cookies: Vec<String>,
    ) -> Self {
        Self::with_rng(
            transport,
            user_agents,
            rotate_every,
            cookies,
            StdRng::from_entropy(),
        )
    }

    pub fn with_rng(
        transport: Box<dyn Transport>,
        user_agents: Vec<String>,
        rotate_every: NonZeroU32,
        cookies: Vec<String>,
        rng: StdRng,
    ) -> Self {
        Self {
            transport,
            user_agents: user_agents
                .into_iter()
                .filter(|ua| !ua.trim().is_empty())
                .collect(),
            rotate_every,
            cookies: cookies
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect(),
            rng,
        }
    }

    /// Issue exactly one request for `url`.
    ///
    /// The request counter moves before the transport is awaited, so
    /// failures count against the budget and the rotation cadence.
    pub async fn dispatch(
        &mut self,
        session: &mut SessionState,
        url: &str,
    ) -> Result<Dispatched, FetchError> {
        if session.requests_sent() % u64::from(self.rotate_every.get()) == 0 {
            let next = self.next_user_agent(session.user_agent());
            debug!(user_agent = %next, "rotating user agent");
            session.set_user_agent(next);
        }

        let cookie = self.cookies.choose(&mut self.rng).cloned();
        let sequence = session.record_request();
        debug!(url, sequence, with_cookie = cookie.is_some(), "dispatching");

        let request = PageRequest {
            url,
            user_agent: session.user_agent(),
            cookie: cookie.as_deref(),
        };
        let page = self.transport.get(request).await?;

        Ok(Dispatched { page, cookie })
    }

    /// Remove a cookie from the pool, returning how many remain.
    pub fn remove_cookie(&mut self, cookie: &str) -> usize {
        self.cookies.retain(|c| c != cookie);
        self.cookies.len()
    }

    pub fn cookies_remaining(&self) -> usize {
        self.cookies.len()
    }

    /// Random pick that differs from the current agent whenever the pool allows.
    fn next_user_agent(&mut self, current: &str) -> String {
        let candidates: Vec<&String> = self
            .user_agents
            .iter()
            .filter(|ua| ua.as_str() != current)
            .collect();

        if candidates.is_empty() {
            return self
                .user_agents
                .first()
                .cloned()
                .unwrap_or_else(|| current.to_string());
        }
        let index = self.rng.gen_range(0..candidates.len());
        candidates[index].clone()
    }
}
