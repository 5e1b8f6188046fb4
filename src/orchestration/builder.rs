//! Wires the production transport and captcha gate into a crawler.

use crate::captcha::FingerprintDetector;
use crate::config::CrawlConfig;
use crate::crawler::{CrawlError, Crawler};
use crate::network::HttpClient;

/// Builds a crawler that tunnels through `config.proxy` and uses the
/// built-in block-page markers.
#[tracing::instrument(skip(config), fields(crawl = %config.target))]
pub fn build_crawler(config: &CrawlConfig) -> Result<Crawler, CrawlError> {
    config.validate()?;
    let http = HttpClient::new(&config.proxy, config.request_timeout)?;
    Crawler::open(config, Box::new(http), Box::new(FingerprintDetector::default()))
}
