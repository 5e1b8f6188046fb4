pub mod backoff;
pub mod captcha;
pub mod checkpoint;
pub mod circuit;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod dispatcher;
pub mod export;
pub mod frontier;
pub mod link_graph;
pub mod logging;
pub mod network;
pub mod orchestration;
pub mod page_store;
pub mod parser;
pub mod parsing_modules;
pub mod session;
pub mod sync;
pub mod url_utils;

// Re-export main types for library usage
pub use captcha::{CaptchaOracle, FingerprintDetector};
pub use checkpoint::{Checkpoint, CheckpointError};
pub use config::{ConfigError, CrawlConfig, FailurePolicy, ProxyRoute, TimingPolicy};
pub use crawler::{CrawlError, CrawlReport, Crawler, StopReason};
pub use frontier::Frontier;
pub use link_graph::{GraphError, LinkGraph};
pub use network::{FetchError, FetchResult, HttpClient, PageRequest, Transport};
pub use parser::extract_links;
pub use url_utils::{Fingerprint, fingerprint};
