//! Run configuration
//!
//! The library never reads the process environment. The CLI collects flags
//! and environment variables into a [`WorkflowConfig`] and hands it over.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::countdown::Countdown;
use crate::errors::RestakeError;

pub const DEFAULT_STAKE_URL: &str = "https://app.spartacus.finance/#/stake";
pub const DEFAULT_BONDS_URL: &str = "https://app.spartacus.finance/#/bonds";
pub const DEFAULT_SELECTOR_RETRY_ATTEMPTS: u32 = 3;

/// Secret material for unlocking the wallet extension. Never logged.
///
/// Secrets are left out when serialized, so a config read back from its own
/// JSON has empty credentials and fails [`WorkflowConfig::validate`] until
/// they are supplied again.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct WalletCredentials {
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub seed: String,
}

impl WalletCredentials {
    pub fn new(password: impl Into<String>, seed: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            seed: seed.into(),
        }
    }

    pub fn seed_words(&self) -> Vec<&str> {
        self.seed.split_whitespace().collect()
    }
}

impl fmt::Debug for WalletCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletCredentials")
            .field("password", &"<redacted>")
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// The chain the dashboard's wallet-connect flow expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser binary. When unset, common Chrome/Chromium names are tried in order.
    pub executable: Option<PathBuf>,
    pub debug_port: u16,
    pub headless: bool,
    /// Unpacked wallet extension to load.
    pub extension_dir: Option<PathBuf>,
    /// Expected extension version, or `latest` to accept whatever is unpacked.
    pub extension_version: String,
    /// Profile directory. A throwaway directory is used when unset.
    pub user_data_dir: Option<PathBuf>,
    pub startup_timeout_ms: u64,
    /// Upper bound for a single DevTools command round trip.
    pub command_timeout_ms: u64,
    /// Reload the wallet extension's page once if it opens outside its welcome screen.
    pub reload_extension_on_open: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            debug_port: 9222,
            headless: true,
            extension_dir: None,
            extension_version: "latest".to_string(),
            user_data_dir: None,
            startup_timeout_ms: 30_000,
            command_timeout_ms: 30_000,
            reload_extension_on_open: true,
        }
    }
}

impl BrowserConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Addresses and selectors of the staking dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub stake_url: String,
    pub bonds_url: String,
    /// Becomes visible once the countdown has rendered.
    pub timer_selector: String,
    /// Class of the element wrapping the countdown.
    pub timer_container_class: String,
    /// Tag of the emphasis element inside the wrapper holding the countdown text.
    pub timer_emphasis_tag: String,
    pub wallet_menu_selector: String,
    pub provider_selector: String,
    pub claim_selector: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            stake_url: DEFAULT_STAKE_URL.to_string(),
            bonds_url: DEFAULT_BONDS_URL.to_string(),
            timer_selector: ".rebase-timer strong".to_string(),
            timer_container_class: "rebase-timer".to_string(),
            timer_emphasis_tag: "strong".to_string(),
            wallet_menu_selector: "#wallet-button".to_string(),
            provider_selector: ".web3modal-provider-wrapper".to_string(),
            claim_selector: "#claim-all-and-stake-btn".to_string(),
        }
    }
}

/// Per-stage deadlines, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageDeadlines {
    pub launch_ms: u64,
    pub wallet_setup_ms: u64,
    pub navigation_ms: u64,
    pub selector_wait_ms: u64,
    pub wallet_action_ms: u64,
    pub cleanup_ms: u64,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            launch_ms: 60_000,
            wallet_setup_ms: 30_000,
            navigation_ms: 60_000,
            selector_wait_ms: 30_000,
            wallet_action_ms: 60_000,
            cleanup_ms: 15_000,
        }
    }
}

impl StageDeadlines {
    pub fn launch(&self) -> Duration {
        Duration::from_millis(self.launch_ms)
    }

    pub fn wallet_setup(&self) -> Duration {
        Duration::from_millis(self.wallet_setup_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn selector_wait(&self) -> Duration {
        Duration::from_millis(self.selector_wait_ms)
    }

    pub fn wallet_action(&self) -> Duration {
        Duration::from_millis(self.wallet_action_ms)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_millis(self.cleanup_ms)
    }
}

fn default_selector_retry_attempts() -> u32 {
    DEFAULT_SELECTOR_RETRY_ATTEMPTS
}

/// Everything one run needs. The eligibility threshold has no default: it
/// must be chosen by whoever schedules the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub threshold: Countdown,
    pub credentials: WalletCredentials,
    pub network: NetworkConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pages: PageConfig,
    #[serde(default)]
    pub deadlines: StageDeadlines,
    #[serde(default = "default_selector_retry_attempts")]
    pub selector_retry_attempts: u32,
    /// Directory receiving the session recording. No recording when unset.
    #[serde(default)]
    pub recording_path: Option<PathBuf>,
}

impl WorkflowConfig {
    pub fn new(threshold: Countdown, credentials: WalletCredentials, network: NetworkConfig) -> Self {
        Self {
            threshold,
            credentials,
            network,
            browser: BrowserConfig::default(),
            pages: PageConfig::default(),
            deadlines: StageDeadlines::default(),
            selector_retry_attempts: DEFAULT_SELECTOR_RETRY_ATTEMPTS,
            recording_path: None,
        }
    }

    pub fn with_browser(mut self, browser: BrowserConfig) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_pages(mut self, pages: PageConfig) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_deadlines(mut self, deadlines: StageDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn with_recording(mut self, path: impl Into<PathBuf>) -> Self {
        self.recording_path = Some(path.into());
        self
    }

    /// Reject settings that would make a run meaningless. Values that are only
    /// passed through to collaborators are not inspected.
    pub fn validate(&self) -> Result<(), RestakeError> {
        if self.credentials.password.is_empty() || self.credentials.seed_words().is_empty() {
            return Err(RestakeError::InvalidArgument(
                "wallet password and seed are required".into(),
            ));
        }
        if self.selector_retry_attempts == 0 {
            return Err(RestakeError::InvalidArgument(
                "selector_retry_attempts must be at least 1".into(),
            ));
        }
        for (name, url) in [
            ("stake_url", &self.pages.stake_url),
            ("bonds_url", &self.pages.bonds_url),
        ] {
            if url.trim().is_empty() {
                return Err(RestakeError::InvalidArgument(format!("{name} is empty")));
            }
        }
        Ok(())
    }
}
