//! Run settings gathered from flags, environment variables and `.env`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use restaker::config::{DEFAULT_BONDS_URL, DEFAULT_SELECTOR_RETRY_ATTEMPTS, DEFAULT_STAKE_URL};
use restaker::{
    BrowserConfig, Countdown, NetworkConfig, PageConfig, StageDeadlines, WalletCredentials,
    WalletSelectors, WorkflowConfig,
};
use serde::Deserialize;

#[derive(Args, Debug, Clone)]
pub struct WorkflowArgs {
    /// Act when the countdown is at or below this many seconds
    #[arg(long, env = "ELIGIBILITY_THRESHOLD_SECS")]
    pub threshold_secs: u64,

    /// Password set on the wallet during import
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Seed phrase of the wallet holding the bonds
    #[arg(long, env = "SEED", hide_env_values = true)]
    pub seed: String,

    #[arg(long, env = "NETWORK_NAME", default_value = "Fantom Opera")]
    pub network_name: String,

    #[arg(long, env = "NETWORK_RPC", default_value = "https://rpc.ftm.tools")]
    pub network_rpc: String,

    #[arg(long, env = "NETWORK_CHAIN_ID", default_value_t = 250)]
    pub network_chain_id: u64,

    #[arg(long, env = "NETWORK_SYMBOL")]
    pub network_symbol: Option<String>,

    /// Expected wallet extension version, or `latest`
    #[arg(long, env = "METAMASK_VERSION", default_value = "latest")]
    pub metamask_version: String,

    /// Unpacked wallet extension directory
    #[arg(long, env = "METAMASK_EXTENSION_DIR")]
    pub metamask_extension_dir: Option<PathBuf>,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, env = "CHROME_DEBUG_PORT", default_value_t = 9222)]
    pub chrome_debug_port: u16,

    /// Run the browser without a window; `--headless false` shows it
    #[arg(
        long,
        env = "HEADLESS",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub headless: bool,

    #[arg(long, env = "STAKE_URL")]
    pub stake_url: Option<String>,

    #[arg(long, env = "BONDS_URL")]
    pub bonds_url: Option<String>,

    /// JSON file overriding dashboard (`pages`) and wallet (`wallet`) selectors
    #[arg(long, env = "SELECTORS_FILE")]
    pub selectors_file: Option<PathBuf>,

    /// Directory receiving the screencast frames of each run
    #[arg(long, env = "RECORDING_PATH")]
    pub recording_path: Option<PathBuf>,

    #[arg(long, env = "STATUS_PATH", default_value = "./status.json")]
    pub status_path: PathBuf,

    #[arg(long, env = "SELECTOR_RETRY_ATTEMPTS", default_value_t = DEFAULT_SELECTOR_RETRY_ATTEMPTS)]
    pub selector_retry_attempts: u32,

    #[arg(long, env = "SELECTOR_TIMEOUT_MS", default_value_t = 30_000)]
    pub selector_timeout_ms: u64,

    #[arg(long, env = "WALLET_SETUP_TIMEOUT_MS", default_value_t = 30_000)]
    pub wallet_setup_timeout_ms: u64,

    #[arg(long, env = "NAVIGATION_TIMEOUT_MS", default_value_t = 60_000)]
    pub navigation_timeout_ms: u64,

    #[arg(long, env = "WALLET_ACTION_TIMEOUT_MS", default_value_t = 60_000)]
    pub wallet_action_timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectorOverrides {
    pages: Option<PageConfig>,
    wallet: WalletSelectors,
}

/// A fully resolved run: what the library needs plus where the CLI puts the outcome.
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub config: WorkflowConfig,
    pub selectors: WalletSelectors,
    pub status_path: PathBuf,
}

impl WorkflowArgs {
    pub fn resolve(&self) -> Result<ResolvedRun> {
        let overrides = match &self.selectors_file {
            Some(path) => load_overrides(path)?,
            None => SelectorOverrides::default(),
        };

        let mut pages = overrides.pages.unwrap_or_default();
        pages.stake_url = self
            .stake_url
            .clone()
            .unwrap_or_else(|| or_default_url(&pages.stake_url, DEFAULT_STAKE_URL));
        pages.bonds_url = self
            .bonds_url
            .clone()
            .unwrap_or_else(|| or_default_url(&pages.bonds_url, DEFAULT_BONDS_URL));

        let browser = BrowserConfig {
            executable: self.chrome_path.clone(),
            debug_port: self.chrome_debug_port,
            headless: self.headless,
            extension_dir: self.metamask_extension_dir.clone(),
            extension_version: self.metamask_version.clone(),
            ..BrowserConfig::default()
        };
        let deadlines = StageDeadlines {
            wallet_setup_ms: self.wallet_setup_timeout_ms,
            navigation_ms: self.navigation_timeout_ms,
            selector_wait_ms: self.selector_timeout_ms,
            wallet_action_ms: self.wallet_action_timeout_ms,
            ..StageDeadlines::default()
        };
        let network = NetworkConfig {
            name: self.network_name.clone(),
            rpc_url: self.network_rpc.clone(),
            chain_id: self.network_chain_id,
            currency_symbol: self.network_symbol.clone(),
        };

        let mut config = WorkflowConfig::new(
            Countdown::from_secs(self.threshold_secs),
            WalletCredentials::new(self.password.as_str(), self.seed.as_str()),
            network,
        )
        .with_browser(browser)
        .with_pages(pages)
        .with_deadlines(deadlines);
        config.selector_retry_attempts = self.selector_retry_attempts;
        if let Some(path) = &self.recording_path {
            config = config.with_recording(path);
        }

        Ok(ResolvedRun {
            config,
            selectors: overrides.wallet,
            status_path: self.status_path.clone(),
        })
    }
}

fn or_default_url(current: &str, fallback: &str) -> String {
    if current.trim().is_empty() {
        fallback.to_string()
    } else {
        current.to_string()
    }
}

fn load_overrides(path: &Path) -> Result<SelectorOverrides> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read selectors file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid selectors file {}", path.display()))
}
