//! MetaMask driven through its own extension pages
//!
//! Works against any [`Environment`]: the driver finds the extension's
//! onboarding page, imports the seed phrase, and afterwards acts on the
//! `notification.html` popup the extension opens for pending requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{NetworkConfig, WalletCredentials};
use crate::deadline::poll_until;
use crate::errors::RestakeError;
use crate::scripts;
use crate::surface::{Environment, Page, WaitOptions, WaitPolicy, Wallet, WalletSurface};

const EXTENSION_SCHEME: &str = "chrome-extension://";
const HOME_PAGE: &str = "home.html";
const NOTIFICATION_PAGE: &str = "notification.html";
const ADD_NETWORK_ROUTE: &str = "home.html#settings/networks/add-network";
const PAGE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Selectors of the extension UI. The defaults match the `data-testid`
/// attributes of MetaMask 11.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSelectors {
    pub onboarding_terms: String,
    pub import_wallet: String,
    pub metametrics_decline: String,
    /// Seed word inputs; `{index}` is replaced by the zero-based word position.
    pub seed_word_input: String,
    pub seed_confirm: String,
    pub new_password: String,
    pub confirm_password: String,
    pub password_terms: String,
    pub create_password: String,
    pub onboarding_done: String,
    pub pin_next: String,
    pub pin_done: String,
    pub network_name_input: String,
    pub network_rpc_input: String,
    pub network_chain_id_input: String,
    pub network_symbol_input: String,
    pub network_save: String,
    pub network_display: String,
    pub network_list_item: String,
    /// Clicked in order to approve a connection request.
    pub approve_steps: Vec<String>,
    pub confirm_button: String,
}

impl Default for WalletSelectors {
    fn default() -> Self {
        let testid = |id: &str| format!("[data-testid=\"{id}\"]");
        Self {
            onboarding_terms: testid("onboarding-terms-checkbox"),
            import_wallet: testid("onboarding-import-wallet"),
            metametrics_decline: testid("metametrics-no-thanks"),
            seed_word_input: testid("import-srp__srp-word-{index}"),
            seed_confirm: testid("import-srp-confirm"),
            new_password: testid("create-password-new"),
            confirm_password: testid("create-password-confirm"),
            password_terms: testid("create-password-terms"),
            create_password: testid("create-password-import"),
            onboarding_done: testid("onboarding-complete-done"),
            pin_next: testid("pin-extension-next"),
            pin_done: testid("pin-extension-done"),
            network_name_input: testid("network-form-network-name"),
            network_rpc_input: testid("network-form-rpc-url"),
            network_chain_id_input: testid("network-form-chain-id"),
            network_symbol_input: testid("network-form-ticker-input"),
            network_save: ".networks-tab__add-network-form-footer .btn-primary".to_string(),
            network_display: testid("network-display"),
            network_list_item: ".network-list-item".to_string(),
            approve_steps: vec![
                testid("page-container-footer-next"),
                testid("page-container-footer-next"),
            ],
            confirm_button: testid("page-container-footer-next"),
        }
    }
}

impl WalletSelectors {
    fn seed_word(&self, index: usize) -> String {
        self.seed_word_input.replace("{index}", &index.to_string())
    }
}

/// Timing knobs for the extension UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletTimings {
    /// How long to wait for an extension control or popup to appear.
    pub element_timeout: Duration,
    /// Pause between consecutive clicks in a multi-step popup.
    pub step_settle: Duration,
}

impl Default for WalletTimings {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(20),
            step_settle: Duration::from_millis(500),
        }
    }
}

/// [`WalletSurface`] for an unpacked MetaMask loaded into the browser.
#[derive(Debug, Clone, Default)]
pub struct MetaMaskSurface {
    selectors: WalletSelectors,
    timings: WalletTimings,
}

impl MetaMaskSurface {
    pub fn new(selectors: WalletSelectors, timings: WalletTimings) -> Self {
        Self { selectors, timings }
    }
}

#[async_trait]
impl WalletSurface for MetaMaskSurface {
    #[instrument(level = "info", skip_all)]
    async fn setup(
        &self,
        environment: Arc<dyn Environment>,
        credentials: &WalletCredentials,
    ) -> Result<Box<dyn Wallet>, RestakeError> {
        let home = find_page(
            environment.as_ref(),
            "extension home page",
            self.timings.element_timeout,
            |url| url.starts_with(EXTENSION_SCHEME) && url.contains(HOME_PAGE),
        )
        .await?;
        let url = home.url().await?;
        let base_url = extension_base_url(&url).ok_or_else(|| {
            RestakeError::Internal(format!("cannot derive extension origin from {url}"))
        })?;
        info!(%base_url, "Found wallet extension");

        let wallet = MetaMaskWallet {
            environment,
            home,
            base_url,
            selectors: self.selectors.clone(),
            timings: self.timings,
        };
        wallet.import(credentials).await?;
        Ok(Box::new(wallet))
    }
}

pub struct MetaMaskWallet {
    environment: Arc<dyn Environment>,
    home: Arc<dyn Page>,
    base_url: String,
    selectors: WalletSelectors,
    timings: WalletTimings,
}

impl MetaMaskWallet {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn import(&self, credentials: &WalletCredentials) -> Result<(), RestakeError> {
        let s = &self.selectors;
        let page = &self.home;
        let words = credentials.seed_words();
        if words.is_empty() {
            return Err(RestakeError::InvalidArgument("seed phrase is empty".into()));
        }

        self.click(page, &s.onboarding_terms).await?;
        self.click(page, &s.import_wallet).await?;
        self.click(page, &s.metametrics_decline).await?;

        for (index, word) in words.iter().enumerate() {
            self.fill(page, &s.seed_word(index), word).await?;
        }
        debug!(words = words.len(), "Entered seed phrase");
        self.click(page, &s.seed_confirm).await?;

        self.fill(page, &s.new_password, &credentials.password).await?;
        self.fill(page, &s.confirm_password, &credentials.password).await?;
        self.click(page, &s.password_terms).await?;
        self.click(page, &s.create_password).await?;

        self.click(page, &s.onboarding_done).await?;
        self.click(page, &s.pin_next).await?;
        self.click(page, &s.pin_done).await?;
        info!("Wallet imported and unlocked");
        Ok(())
    }

    async fn click(&self, page: &Arc<dyn Page>, selector: &str) -> Result<(), RestakeError> {
        page.wait_for_selector(selector, WaitOptions::visible(self.timings.element_timeout))
            .await?;
        page.click(selector).await
    }

    async fn fill(&self, page: &Arc<dyn Page>, selector: &str, value: &str) -> Result<(), RestakeError> {
        page.wait_for_selector(selector, WaitOptions::visible(self.timings.element_timeout))
            .await?;
        page.fill(selector, value).await
    }

    /// The popup the extension opened for the pending request, or the
    /// notification page opened by hand if the popup never showed up.
    async fn notification_page(&self) -> Result<Arc<dyn Page>, RestakeError> {
        let found = find_page(
            self.environment.as_ref(),
            "wallet notification",
            self.timings.element_timeout,
            |url| url.starts_with(EXTENSION_SCHEME) && url.contains(NOTIFICATION_PAGE),
        )
        .await;
        match found {
            Ok(page) => Ok(page),
            Err(e) if e.is_deadline() => {
                warn!("No wallet popup appeared, opening the notification page directly");
                let page = self.environment.new_page().await?;
                page.goto(
                    &format!("{}{NOTIFICATION_PAGE}", self.base_url),
                    WaitPolicy::DomContentLoaded,
                )
                .await?;
                Ok(page)
            }
            Err(e) => Err(e),
        }
    }

    /// Fail with [`RestakeError::WalletRejected`] if the popup's primary
    /// button cannot be pressed, e.g. for insufficient gas.
    async fn ensure_enabled(&self, page: &Arc<dyn Page>, selector: &str) -> Result<(), RestakeError> {
        match page.evaluate(&scripts::is_disabled(selector)).await? {
            Value::Bool(false) => Ok(()),
            Value::Bool(true) => Err(RestakeError::WalletRejected(format!(
                "{selector} is disabled"
            ))),
            Value::Null => Err(RestakeError::ElementNotFound(selector.to_string())),
            other => Err(RestakeError::Script(format!(
                "unexpected disabled state for {selector}: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Wallet for MetaMaskWallet {
    #[instrument(level = "info", skip_all, fields(network = %network.name, chain_id = network.chain_id))]
    async fn add_network(&self, network: &NetworkConfig) -> Result<(), RestakeError> {
        let s = &self.selectors;
        let page = &self.home;
        page.goto(
            &format!("{}{ADD_NETWORK_ROUTE}", self.base_url),
            WaitPolicy::DomContentLoaded,
        )
        .await?;

        self.fill(page, &s.network_name_input, &network.name).await?;
        self.fill(page, &s.network_rpc_input, &network.rpc_url).await?;
        self.fill(page, &s.network_chain_id_input, &network.chain_id.to_string())
            .await?;
        if let Some(symbol) = &network.currency_symbol {
            self.fill(page, &s.network_symbol_input, symbol).await?;
        }
        tokio::time::sleep(self.timings.step_settle).await;
        self.ensure_enabled(page, &s.network_save).await?;
        self.click(page, &s.network_save).await?;
        info!("Network added");
        Ok(())
    }

    #[instrument(level = "info", skip(self))]
    async fn switch_network(&self, name: &str) -> Result<(), RestakeError> {
        let s = &self.selectors;
        let page = &self.home;
        page.goto(&format!("{}{HOME_PAGE}", self.base_url), WaitPolicy::DomContentLoaded)
            .await?;
        self.click(page, &s.network_display).await?;
        page.wait_for_selector(
            &s.network_list_item,
            WaitOptions::visible(self.timings.element_timeout),
        )
        .await?;

        let clicked = page
            .evaluate(&scripts::click_by_text(&s.network_list_item, name))
            .await?;
        if clicked != Value::Bool(true) {
            return Err(RestakeError::ElementNotFound(format!(
                "network '{name}' in {}",
                s.network_list_item
            )));
        }
        info!("Switched network");
        Ok(())
    }

    #[instrument(level = "info", skip_all)]
    async fn approve(&self) -> Result<(), RestakeError> {
        let page = self.notification_page().await?;
        for (step, selector) in self.selectors.approve_steps.iter().enumerate() {
            if step > 0 {
                tokio::time::sleep(self.timings.step_settle).await;
            }
            self.click(&page, selector)
                .await
                .map_err(as_wallet_timeout("approve connection"))?;
            debug!(step, "Approval step clicked");
        }
        info!("Connection approved");
        Ok(())
    }

    #[instrument(level = "info", skip_all)]
    async fn confirm_transaction(&self) -> Result<(), RestakeError> {
        let page = self.notification_page().await?;
        let confirm = &self.selectors.confirm_button;
        page.wait_for_selector(confirm, WaitOptions::visible(self.timings.element_timeout))
            .await
            .map_err(as_wallet_timeout("confirm transaction"))?;
        tokio::time::sleep(self.timings.step_settle).await;
        self.ensure_enabled(&page, confirm).await?;
        page.click(confirm).await?;
        info!("Transaction confirmed");
        Ok(())
    }
}

/// Report a wait that ran out inside the wallet UI as a wallet timeout.
fn as_wallet_timeout(action: &'static str) -> impl Fn(RestakeError) -> RestakeError {
    move |e| match e {
        RestakeError::DeadlineExceeded { operation, timeout } => {
            RestakeError::WalletTimeout(format!("{action}: {operation} after {timeout:?}"))
        }
        other => other,
    }
}

/// Poll the environment's pages until one has a URL matching `matches`.
async fn find_page(
    environment: &dyn Environment,
    what: &str,
    timeout: Duration,
    matches: impl Fn(&str) -> bool,
) -> Result<Arc<dyn Page>, RestakeError> {
    let matches = &matches;
    poll_until(what, timeout, PAGE_POLL_INTERVAL, move || async move {
        for page in environment.pages().await? {
            match page.url().await {
                Ok(url) if matches(&url) => return Ok(Some(page)),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Skipping page whose URL could not be read"),
            }
        }
        Ok(None)
    })
    .await
}

/// `chrome-extension://<id>/` for any URL inside that extension.
pub fn extension_base_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix(EXTENSION_SCHEME)?;
    let id = rest.split('/').next().filter(|id| !id.is_empty())?;
    Some(format!("{EXTENSION_SCHEME}{id}/"))
}
