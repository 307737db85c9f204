//! Contracts for the external collaborators a run drives
//!
//! The orchestrator only ever talks to these traits. The [`crate::cdp`]
//! module implements the browser side over the Chrome DevTools Protocol and
//! [`crate::wallet`] implements the wallet side on top of any [`Environment`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{BrowserConfig, NetworkConfig, WalletCredentials};
use crate::errors::RestakeError;

/// How long a navigation waits before it is considered settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// The document has been parsed.
    DomContentLoaded,
    /// The page is fully loaded and the network has gone quiet.
    NetworkIdle,
}

/// Options for [`Page::wait_for_selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Require the element to be rendered with a non-empty box, not merely attached.
    pub visible: bool,
    pub timeout: Duration,
}

impl WaitOptions {
    pub fn visible(timeout: Duration) -> Self {
        Self {
            visible: true,
            timeout,
        }
    }

    pub fn attached(timeout: Duration) -> Self {
        Self {
            visible: false,
            timeout,
        }
    }
}

/// A browser target (tab, extension page, worker) announced by the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub target_id: String,
    /// DevTools target type, e.g. `page`, `service_worker`, `background_page`.
    pub kind: String,
    pub url: String,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

/// Starts browser environments.
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn Environment>, RestakeError>;
}

/// One running browser instance, owned by a single run.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>, RestakeError>;

    /// All open page targets, extension pages included.
    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>, RestakeError>;

    /// Get a handle on an announced target.
    async fn attach(&self, target: &TargetInfo) -> Result<Arc<dyn Page>, RestakeError>;

    /// Stream of targets created from now on.
    fn target_events(&self) -> broadcast::Receiver<TargetInfo>;

    /// Create a recorder that captures `page`.
    async fn recorder(&self, page: &Arc<dyn Page>) -> Result<Box<dyn Recorder>, RestakeError>;

    async fn close(&self) -> Result<(), RestakeError>;
}

#[async_trait]
pub trait Page: Send + Sync {
    fn target_id(&self) -> &str;

    async fn url(&self) -> Result<String, RestakeError>;

    async fn goto(&self, url: &str, wait: WaitPolicy) -> Result<(), RestakeError>;

    async fn reload(&self, wait: WaitPolicy) -> Result<(), RestakeError>;

    /// Wait for `selector` to match. Fails with [`RestakeError::DeadlineExceeded`]
    /// once `options.timeout` has passed.
    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitOptions,
    ) -> Result<(), RestakeError>;

    async fn click(&self, selector: &str) -> Result<(), RestakeError>;

    /// Replace the value of the input matched by `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), RestakeError>;

    /// Evaluate a script expression in the page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, RestakeError>;
}

/// Screen recording of a page.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start(&mut self, path: &Path) -> Result<(), RestakeError>;

    /// Stop recording. Stopping a recorder that is not running is a no-op.
    async fn stop(&mut self) -> Result<(), RestakeError>;
}

/// Brings a wallet extension into a usable, unlocked state.
#[async_trait]
pub trait WalletSurface: Send + Sync {
    async fn setup(
        &self,
        environment: Arc<dyn Environment>,
        credentials: &WalletCredentials,
    ) -> Result<Box<dyn Wallet>, RestakeError>;
}

/// An unlocked wallet that can act on pending requests.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn add_network(&self, network: &NetworkConfig) -> Result<(), RestakeError>;

    async fn switch_network(&self, name: &str) -> Result<(), RestakeError>;

    /// Approve the pending connection request.
    async fn approve(&self) -> Result<(), RestakeError>;

    /// Confirm the pending transaction request.
    async fn confirm_transaction(&self) -> Result<(), RestakeError>;
}
