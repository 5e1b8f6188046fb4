//! Captcha gate: a boolean oracle consulted for every fetched page.

/// Decides whether a fetched page is a block or captcha page.
///
/// Implementations may be imperfect; the crawl loop tolerates both false
/// positives and false negatives.
pub trait CaptchaOracle: Send + Sync {
    fn is_captcha(&self, page: &str) -> bool;
}

impl<F> CaptchaOracle for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_captcha(&self, page: &str) -> bool {
        self(page)
    }
}

/// Phrases seen on the block pages of the markets we crawl.
pub const DEFAULT_MARKERS: &[&str] = &[
    "strike",
    "strikes",
    "security breach detected",
    "captcha",
    "ddos 2-factor-protection",
];

/// Case-insensitive substring match against known block-page phrases.
#[derive(Debug, Clone)]
pub struct FingerprintDetector {
    markers: Vec<String>,
}

impl FingerprintDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for FingerprintDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS)
    }
}

impl CaptchaOracle for FingerprintDetector {
    fn is_captcha(&self, page: &str) -> bool {
        let page = page.to_lowercase();
        self.markers.iter().any(|marker| page.contains(marker.as_str()))
    }
}
