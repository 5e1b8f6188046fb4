// Global configuration constants - single source of truth

use rand::Rng;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::url_utils;

pub struct Config;

impl Config {
    // Proxy and control channel
    pub const DEFAULT_PROXY: &'static str = "127.0.0.1:9050";
    pub const DEFAULT_CONTROL_ADDR: &'static str = "127.0.0.1:9051";
    pub const CIRCUIT_ROTATION_SECS: u64 = 30;

    // HTTP
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
    pub const MAX_REDIRECTS: usize = 5;

    // Anti-detection
    pub const ROTATE_USER_AGENT_EVERY: u32 = 3;
    pub const CAPTCHA_COOLDOWN_SECS: u64 = 30;
    pub const DEFAULT_DELAY: &'static str = "2-5";

    // Persistence
    pub const GRAPH_FLUSH_BYTES: usize = 10 * 1024 * 1024;
    pub const DATA_DIR: &'static str = "./resources";
    pub const QUARANTINE_DIR: &'static str = "quarantine";

    // Reporting
    pub const PROGRESS_INTERVAL: u64 = 25;
}

/// Browser identities the dispatcher rotates through when none are configured.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; rv:115.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:115.0) Gecko/20100101 Firefox/115.0",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a target name is required before crawling")]
    MissingTarget,

    #[error("invalid target name '{0}': use letters, digits, '-' or '_'")]
    InvalidTarget(String),

    #[error("no checkpoint found for target '{0}' and no seed URL configured")]
    MissingSeed(String),

    #[error("seed '{0}' is not an http(s) onion URL")]
    InvalidSeed(String),

    #[error("invalid timing policy: {0}")]
    InvalidTiming(String),

    #[error("user agent rotation cadence must be at least 1")]
    InvalidRotation,

    #[error("invalid proxy route '{0}': expected host:port")]
    InvalidProxy(String),

    #[error("user agent pool is empty")]
    EmptyUserAgentPool,

    #[error("cannot read cookies file {0}")]
    CookiesFile(String),
}

/// Delay applied after every successfully processed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPolicy {
    Fixed(Duration),
    Uniform { low: Duration, high: Duration },
}

impl TimingPolicy {
    pub fn fixed_secs(secs: u64) -> Self {
        Self::Fixed(Duration::from_secs(secs))
    }

    pub fn uniform_secs(low: u64, high: u64) -> Result<Self, ConfigError> {
        let policy = Self::Uniform {
            low: Duration::from_secs(low),
            high: Duration::from_secs(high),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Fixed(_) => Ok(()),
            Self::Uniform { low, high } if low > high => Err(ConfigError::InvalidTiming(format!(
                "low bound {}s exceeds high bound {}s",
                low.as_secs_f64(),
                high.as_secs_f64()
            ))),
            Self::Uniform { .. } => Ok(()),
        }
    }

    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Uniform { low, high } if low >= high => low,
            Self::Uniform { low, high } => {
                Duration::from_secs_f64(rng.gen_range(low.as_secs_f64()..=high.as_secs_f64()))
            }
        }
    }
}

impl FromStr for TimingPolicy {
    type Err = ConfigError;

    /// `"3"` is a fixed three-second delay, `"2-5"` a uniform range.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTiming(format!("'{}' is not a whole number of seconds", part.trim())))
        };

        match s.split_once('-') {
            Some((low, high)) => Self::uniform_secs(parse(low)?, parse(high)?),
            None => Ok(Self::fixed_secs(parse(s)?)),
        }
    }
}

/// Local SOCKS endpoint all requests are tunneled through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub host: String,
    pub port: u16,
}

impl ProxyRoute {
    /// `socks5h` so name resolution happens inside the proxy.
    pub fn socks_url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ProxyRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyRoute {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidProxy(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidProxy(s.to_string()))?;
        if host.is_empty() || port == 0 {
            return Err(ConfigError::InvalidProxy(s.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl Default for ProxyRoute {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9050,
        }
    }
}

/// What the loop does when a fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Requeue the URL at the head of the frontier, flush and stop.
    Abort,
    /// Log the failure and continue with the next URL.
    Skip,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub target: String,
    pub seed: Option<String>,
    pub data_dir: PathBuf,
    pub cookies: Vec<String>,
    pub user_agents: Vec<String>,
    pub page_budget: Option<u64>,
    pub timing: TimingPolicy,
    pub rotate_user_agent_every: u32,
    pub proxy: ProxyRoute,
    pub request_timeout: Duration,
    pub captcha_cooldown: Duration,
    pub graph_flush_bytes: usize,
    pub on_fetch_failure: FailurePolicy,
    pub drop_cookie_on_captcha: bool,
}

impl CrawlConfig {
    pub fn new(target: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            seed: None,
            data_dir: data_dir.into(),
            cookies: Vec::new(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            page_budget: None,
            timing: TimingPolicy::Uniform {
                low: Duration::from_secs(2),
                high: Duration::from_secs(5),
            },
            rotate_user_agent_every: Config::ROTATE_USER_AGENT_EVERY,
            proxy: ProxyRoute::default(),
            request_timeout: Duration::from_secs(Config::REQUEST_TIMEOUT_SECS),
            captcha_cooldown: Duration::from_secs(Config::CAPTCHA_COOLDOWN_SECS),
            graph_flush_bytes: Config::GRAPH_FLUSH_BYTES,
            on_fetch_failure: FailurePolicy::Abort,
            drop_cookie_on_captcha: false,
        }
    }

    /// Fail fast on anything that would otherwise surface mid-crawl.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_target(&self.target)?;

        if let Some(seed) = &self.seed {
            if !url_utils::is_onion_url(seed) {
                return Err(ConfigError::InvalidSeed(seed.clone()));
            }
        }

        self.rotation_cadence()?;
        self.timing.validate()?;

        if self.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::EmptyUserAgentPool);
        }

        Ok(())
    }

    pub fn rotation_cadence(&self) -> Result<NonZeroU32, ConfigError> {
        NonZeroU32::new(self.rotate_user_agent_every).ok_or(ConfigError::InvalidRotation)
    }
}

/// Target names become directory and file names.
pub fn validate_target(target: &str) -> Result<(), ConfigError> {
    if target.trim().is_empty() {
        return Err(ConfigError::MissingTarget);
    }
    let safe = target
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !safe {
        return Err(ConfigError::InvalidTarget(target.to_string()));
    }
    Ok(())
}

/// One cookie header per non-empty line; `#` starts a comment line.
pub fn parse_cookie_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn valid_config() -> CrawlConfig {
        let mut config = CrawlConfig::new("nexus", "/tmp/resources");
        config.seed = Some("http://abc.onion/".to_string());
        config
    }

    #[test]
    fn test_timing_policy_parsing() {
        assert_eq!("3".parse::<TimingPolicy>().unwrap(), TimingPolicy::fixed_secs(3));
        assert_eq!(
            "2-5".parse::<TimingPolicy>().unwrap(),
            TimingPolicy::Uniform {
                low: Duration::from_secs(2),
                high: Duration::from_secs(5)
            }
        );
        assert!(matches!(
            "5-2".parse::<TimingPolicy>(),
            Err(ConfigError::InvalidTiming(_))
        ));
        assert!("fast".parse::<TimingPolicy>().is_err());
    }

    #[test]
    fn test_uniform_delay_stays_in_range() {
        let policy = TimingPolicy::uniform_secs(2, 5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let delay = policy.next_delay(&mut rng);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(5));
        }
        let degenerate = TimingPolicy::uniform_secs(4, 4).unwrap();
        assert_eq!(degenerate.next_delay(&mut rng), Duration::from_secs(4));
    }

    #[test]
    fn test_proxy_route_parsing() {
        let route: ProxyRoute = "127.0.0.1:9150".parse().unwrap();
        assert_eq!(route.port, 9150);
        assert_eq!(route.socks_url(), "socks5h://127.0.0.1:9150");
        assert!("localhost".parse::<ProxyRoute>().is_err());
        assert!("localhost:notaport".parse::<ProxyRoute>().is_err());
        assert!(":9050".parse::<ProxyRoute>().is_err());
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_zero_rotation_cadence_rejected() {
        let mut config = valid_config();
        config.rotate_user_agent_every = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRotation));
    }

    #[test]
    fn test_clearnet_seed_rejected() {
        let mut config = valid_config();
        config.seed = Some("https://example.com/".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSeed(_))));
    }

    #[test]
    fn test_target_name_rules() {
        assert_eq!(validate_target(""), Err(ConfigError::MissingTarget));
        assert!(matches!(
            validate_target("../etc"),
            Err(ConfigError::InvalidTarget(_))
        ));
        assert!(validate_target("nexus_market-2").is_ok());
    }

    #[test]
    fn test_empty_user_agent_pool_rejected() {
        let mut config = valid_config();
        config.user_agents = vec!["  ".to_string()];
        assert_eq!(config.validate(), Err(ConfigError::EmptyUserAgentPool));
    }

    #[test]
    fn test_parse_cookie_lines() {
        let cookies = parse_cookie_lines("# session cookies\n\ndcap=abc; XSRF=1\n  session=xyz  \n");
        assert_eq!(cookies, vec!["dcap=abc; XSRF=1", "session=xyz"]);
    }
}
