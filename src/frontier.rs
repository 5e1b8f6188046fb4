use std::collections::{HashSet, VecDeque};

use crate::link_graph::LinkGraph;
use crate::url_utils::{self, Fingerprint};

/// FIFO crawl queue plus the fingerprints visited in this process.
///
/// A fingerprint is never held twice across the queue, the deferred list,
/// the visited set and the link graph handed to `offer`.
///
/// Deferred URLs failed in this process. They are not dispatched again
/// until the next run, which loads them from the checkpoint.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<String>,
    queued: HashSet<Fingerprint>,
    visited: HashSet<Fingerprint>,
    deferred: Vec<String>,
    deferred_fps: HashSet<Fingerprint>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a frontier from a checkpoint, dropping repeated fingerprints.
    pub fn from_urls<I>(urls: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut frontier = Self::new();
        for url in urls {
            frontier.push_back(url);
        }
        frontier
    }

    /// Queue `url` if it is not queued, visited or already in the graph.
    pub fn offer(&mut self, url: String, graph: &LinkGraph) -> bool {
        let fp = url_utils::fingerprint(&url);
        if self.visited.contains(&fp) || self.deferred_fps.contains(&fp) || graph.contains(&fp) {
            return false;
        }
        self.push_back(url)
    }

    /// Park a URL that failed in this run so the checkpoint keeps it.
    pub fn defer(&mut self, url: String) -> bool {
        let fp = url_utils::fingerprint(&url);
        if self.queued.contains(&fp) || !self.deferred_fps.insert(fp) {
            return false;
        }
        self.deferred.push(url);
        true
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Put a dispatched URL back at the head so it is tried first next time.
    pub fn requeue_front(&mut self, url: String) -> bool {
        let fp = url_utils::fingerprint(&url);
        if !self.queued.insert(fp) {
            return false;
        }
        self.queue.push_front(url);
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        let url = self.queue.pop_front()?;
        self.queued.remove(&url_utils::fingerprint(&url));
        Some(url)
    }

    pub fn mark_visited(&mut self, fp: Fingerprint) {
        self.visited.insert(fp);
    }

    pub fn is_visited(&self, fp: &Fingerprint) -> bool {
        self.visited.contains(fp)
    }

    pub fn is_queued(&self, fp: &Fingerprint) -> bool {
        self.queued.contains(fp)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Pending URLs in dispatch order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    /// What a checkpoint must hold: the queue, then the deferred URLs.
    pub fn checkpoint_urls(&self) -> impl Iterator<Item = &str> {
        self.urls().chain(self.deferred.iter().map(String::as_str))
    }

    fn push_back(&mut self, url: String) -> bool {
        let fp = url_utils::fingerprint(&url);
        if !self.queued.insert(fp) {
            return false;
        }
        self.queue.push_back(url);
        true
    }
}
