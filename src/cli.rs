use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, ConfigError, CrawlConfig, FailurePolicy, TimingPolicy, parse_cookie_lines};

/// Command line front end.
/// Exit codes: 0=success, 2=invalid arguments, 3=I/O or config error, 4=network error
#[derive(Parser, Debug)]
#[command(name = "crawl_scout")]
#[command(about = "Resumable, polite crawler for onion services")]
#[command(version)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level when RUST_LOG is not set"
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl a target, resuming from its checkpoint when one exists.
    Crawl(CrawlArgs),

    /// Request a new proxy identity on every wall-clock boundary of the period.
    RotateCircuits {
        #[arg(
            long,
            default_value = Config::DEFAULT_CONTROL_ADDR,
            help = "Proxy control port address"
        )]
        control_addr: String,

        #[arg(
            long,
            env = "TOR_CONTROL_PASSWORD",
            hide_env_values = true,
            help = "Control port password"
        )]
        control_password: Option<String>,

        #[arg(
            long,
            default_value_t = Config::CIRCUIT_ROTATION_SECS,
            help = "Rotation period in seconds"
        )]
        period: u64,

        #[arg(
            short,
            long,
            default_value = Config::DATA_DIR,
            help = "Directory holding the logs folder"
        )]
        data_dir: PathBuf,
    },

    /// Extract product, vendor and review records from stored pages.
    Scrape {
        #[arg(short, long, help = "Crawl target whose pages are scraped")]
        target: String,

        #[arg(long, help = "Site parser to use (defaults to the target name)")]
        parser: Option<String>,

        #[arg(
            short,
            long,
            default_value = Config::DATA_DIR,
            help = "Directory holding crawled resources"
        )]
        data_dir: PathBuf,

        #[arg(
            short,
            long,
            default_value = "./scraped",
            help = "Directory for the JSON lines output"
        )]
        output: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    #[arg(short, long, help = "Target name; also names the resource directory")]
    pub target: String,

    #[arg(short, long, help = "Seed URL (ignored when a checkpoint is resumed)")]
    pub seed: Option<String>,

    #[arg(long = "cookie", help = "Cookie header value; repeat for a pool")]
    pub cookies: Vec<String>,

    #[arg(long, help = "File with one cookie header per line")]
    pub cookies_file: Option<PathBuf>,

    #[arg(long = "user-agent", help = "User agent; repeat to replace the built-in pool")]
    pub user_agents: Vec<String>,

    #[arg(long, help = "Stop after this many requests (unlimited when absent)")]
    pub max_pages: Option<u64>,

    #[arg(
        long,
        default_value = Config::DEFAULT_DELAY,
        help = "Delay after each page: N seconds, or LOW-HIGH for a random range"
    )]
    pub delay: String,

    #[arg(
        long,
        default_value_t = Config::ROTATE_USER_AGENT_EVERY,
        help = "Replace the user agent every N requests"
    )]
    pub rotate_ua_every: u32,

    #[arg(
        long,
        default_value = Config::DEFAULT_PROXY,
        help = "SOCKS proxy host:port"
    )]
    pub proxy: String,

    #[arg(
        long,
        default_value_t = Config::REQUEST_TIMEOUT_SECS,
        help = "Request timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(
        short,
        long,
        default_value = Config::DATA_DIR,
        help = "Directory to store crawled resources"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        default_value_t = Config::CAPTCHA_COOLDOWN_SECS,
        help = "Pause in seconds after a captcha page"
    )]
    pub captcha_cooldown: u64,

    #[arg(long, value_enum, default_value = "abort", help = "What to do when a fetch fails")]
    pub on_fetch_failure: FailurePolicy,

    #[arg(long, help = "Drop a cookie from the pool when it hits a captcha; stop when none are left")]
    pub drop_captcha_cookies: bool,

    #[arg(
        long,
        default_value_t = Config::GRAPH_FLUSH_BYTES,
        help = "Flush the link graph once its buffer exceeds this many bytes"
    )]
    pub graph_flush_bytes: usize,

    #[arg(long, help = "Command run after a clean crawl; {dir} and {target} are substituted")]
    pub sync_command: Option<String>,

    #[arg(long, help = "Rotate proxy circuits alongside the crawl")]
    pub rotate_circuits: bool,

    #[arg(long, default_value = Config::DEFAULT_CONTROL_ADDR, help = "Proxy control port address")]
    pub control_addr: String,

    #[arg(
        long,
        env = "TOR_CONTROL_PASSWORD",
        hide_env_values = true,
        help = "Control port password"
    )]
    pub control_password: Option<String>,
}

impl CrawlArgs {
    /// Build and validate the crawl configuration, reading the cookies file
    /// if one was given.
    pub fn to_config(&self) -> Result<CrawlConfig, ConfigError> {
        let mut config = CrawlConfig::new(self.target.clone(), self.data_dir.clone());
        config.seed = self.seed.clone();

        config.cookies = self.cookies.clone();
        if let Some(path) = &self.cookies_file {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::CookiesFile(format!("{}: {e}", path.display())))?;
            config.cookies.extend(parse_cookie_lines(&contents));
        }

        if !self.user_agents.is_empty() {
            config.user_agents = self.user_agents.clone();
        }
        config.page_budget = self.max_pages;
        config.timing = self.delay.parse::<TimingPolicy>()?;
        config.rotate_user_agent_every = self.rotate_ua_every;
        config.proxy = self.proxy.parse()?;
        config.request_timeout = Duration::from_secs(self.timeout);
        config.captcha_cooldown = Duration::from_secs(self.captcha_cooldown);
        config.graph_flush_bytes = self.graph_flush_bytes;
        config.on_fetch_failure = self.on_fetch_failure;
        config.drop_cookie_on_captcha = self.drop_captcha_cookies;

        config.validate()?;
        Ok(config)
    }
}

impl Cli {
    /// Parse CLI arguments so the rest of the program can rely on structured options.
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
