//! In-memory stand-ins for the browser and the wallet.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use restaker::config::{BrowserConfig, NetworkConfig, WalletCredentials};
use restaker::surface::{
    AutomationSurface, Environment, Page, Recorder, TargetInfo, WaitOptions, WaitPolicy, Wallet,
    WalletSurface,
};
use restaker::{Countdown, RestakeError, WorkflowConfig};
use serde_json::Value;
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn sample_network() -> NetworkConfig {
    NetworkConfig {
        name: "Fantom Opera".into(),
        rpc_url: "https://rpc.ftm.tools".into(),
        chain_id: 250,
        currency_symbol: Some("FTM".into()),
    }
}

pub fn sample_config(threshold_secs: u64) -> WorkflowConfig {
    WorkflowConfig::new(
        Countdown::from_secs(threshold_secs),
        WalletCredentials::new(
            "correct horse",
            "test test test test test test test test test test test junk",
        ),
        sample_network(),
    )
}

/// A page whose script results and selector waits are scripted up front.
pub struct FakePage {
    id: String,
    url: Mutex<String>,
    responses: Mutex<HashMap<String, Value>>,
    wait_failures: Mutex<HashMap<String, u32>>,
    pub gotos: Mutex<Vec<(String, WaitPolicy)>>,
    pub reloads: AtomicU32,
    pub waits: Mutex<Vec<String>>,
    pub clicks: Mutex<Vec<String>>,
    pub fills: Mutex<Vec<(String, String)>>,
}

impl FakePage {
    pub fn new(id: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            url: Mutex::new(url.to_string()),
            responses: Mutex::new(HashMap::new()),
            wait_failures: Mutex::new(HashMap::new()),
            gotos: Mutex::new(Vec::new()),
            reloads: AtomicU32::new(0),
            waits: Mutex::new(Vec::new()),
            clicks: Mutex::new(Vec::new()),
            fills: Mutex::new(Vec::new()),
        })
    }

    /// Make `evaluate(script)` return `value`. Unscripted scripts yield null.
    pub fn respond(&self, script: impl Into<String>, value: Value) {
        self.responses.lock().unwrap().insert(script.into(), value);
    }

    /// Make the next `times` waits for `selector` time out.
    pub fn fail_waits(&self, selector: &str, times: u32) {
        self.wait_failures
            .lock()
            .unwrap()
            .insert(selector.to_string(), times);
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.fills.lock().unwrap().clone()
    }

    pub fn gotos(&self) -> Vec<String> {
        self.gotos
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn reloads(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Page for FakePage {
    fn target_id(&self) -> &str {
        &self.id
    }

    async fn url(&self) -> Result<String, RestakeError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn goto(&self, url: &str, wait: WaitPolicy) -> Result<(), RestakeError> {
        *self.url.lock().unwrap() = url.to_string();
        self.gotos.lock().unwrap().push((url.to_string(), wait));
        Ok(())
    }

    async fn reload(&self, _wait: WaitPolicy) -> Result<(), RestakeError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitOptions,
    ) -> Result<(), RestakeError> {
        self.waits.lock().unwrap().push(selector.to_string());
        let mut failures = self.wait_failures.lock().unwrap();
        match failures.get_mut(selector) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RestakeError::DeadlineExceeded {
                    operation: format!("wait for {selector}"),
                    timeout: options.timeout,
                })
            }
            _ => Ok(()),
        }
    }

    async fn click(&self, selector: &str) -> Result<(), RestakeError> {
        self.clicks.lock().unwrap().push(selector.to_string());
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), RestakeError> {
        self.fills
            .lock()
            .unwrap()
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, RestakeError> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(expression)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[derive(Default)]
pub struct RecorderCounters {
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub paths: Mutex<Vec<PathBuf>>,
}

pub struct FakeRecorder {
    counters: Arc<RecorderCounters>,
    running: bool,
    fail_start: bool,
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn start(&mut self, path: &Path) -> Result<(), RestakeError> {
        if self.fail_start {
            return Err(RestakeError::Protocol("screencast unsupported".into()));
        }
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.counters.paths.lock().unwrap().push(path.to_path_buf());
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RestakeError> {
        if self.running {
            self.running = false;
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A browser holding a fixed set of pages. `new_page` hands out `dashboard`.
pub struct FakeEnvironment {
    pub dashboard: Arc<FakePage>,
    pages: Mutex<Vec<Arc<FakePage>>>,
    targets: broadcast::Sender<TargetInfo>,
    pub recorder: Arc<RecorderCounters>,
    pub closes: AtomicU32,
    pub fail_close: bool,
    pub fail_recorder_start: bool,
}

impl FakeEnvironment {
    pub fn new() -> Self {
        let (targets, _) = broadcast::channel(16);
        Self {
            dashboard: FakePage::new("dashboard", "about:blank"),
            pages: Mutex::new(Vec::new()),
            targets,
            recorder: Arc::new(RecorderCounters::default()),
            closes: AtomicU32::new(0),
            fail_close: false,
            fail_recorder_start: false,
        }
    }

    pub fn add_page(&self, page: Arc<FakePage>) {
        self.pages.lock().unwrap().push(page);
    }

    /// Announce a target to subscribers of `target_events`.
    pub fn announce(&self, target: TargetInfo) {
        let _ = self.targets.send(target);
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn recorder_stops(&self) -> u32 {
        self.recorder.stops.load(Ordering::SeqCst)
    }

    fn find(&self, id: &str) -> Option<Arc<FakePage>> {
        if self.dashboard.target_id() == id {
            return Some(self.dashboard.clone());
        }
        self.pages
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.target_id() == id)
            .cloned()
    }
}

#[async_trait]
impl Environment for FakeEnvironment {
    async fn new_page(&self) -> Result<Arc<dyn Page>, RestakeError> {
        Ok(self.dashboard.clone())
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>, RestakeError> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.clone() as Arc<dyn Page>)
            .collect())
    }

    async fn attach(&self, target: &TargetInfo) -> Result<Arc<dyn Page>, RestakeError> {
        match self.find(&target.target_id) {
            Some(page) => Ok(page),
            None => Err(RestakeError::Protocol(format!(
                "no target {}",
                target.target_id
            ))),
        }
    }

    fn target_events(&self) -> broadcast::Receiver<TargetInfo> {
        self.targets.subscribe()
    }

    async fn recorder(&self, _page: &Arc<dyn Page>) -> Result<Box<dyn Recorder>, RestakeError> {
        Ok(Box::new(FakeRecorder {
            counters: self.recorder.clone(),
            running: false,
            fail_start: self.fail_recorder_start,
        }))
    }

    async fn close(&self) -> Result<(), RestakeError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(RestakeError::Protocol("browser already gone".into()));
        }
        Ok(())
    }
}

pub struct FakeSurface {
    pub environment: Arc<FakeEnvironment>,
    pub launches: AtomicU32,
    pub fail_launch: bool,
}

impl FakeSurface {
    pub fn new(environment: Arc<FakeEnvironment>) -> Self {
        Self {
            environment,
            launches: AtomicU32::new(0),
            fail_launch: false,
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationSurface for FakeSurface {
    async fn launch(&self, _config: &BrowserConfig) -> Result<Arc<dyn Environment>, RestakeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(RestakeError::Launch("no browser".into()));
        }
        Ok(self.environment.clone())
    }
}

/// Records every wallet call as a short string.
#[derive(Default)]
pub struct FakeWalletSurface {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub setup_delay: Option<Duration>,
    pub confirm_delay: Option<Duration>,
    pub reject_confirm: bool,
}

impl FakeWalletSurface {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletSurface for FakeWalletSurface {
    async fn setup(
        &self,
        _environment: Arc<dyn Environment>,
        credentials: &WalletCredentials,
    ) -> Result<Box<dyn Wallet>, RestakeError> {
        if let Some(delay) = self.setup_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("setup:{}", credentials.seed_words().len()));
        Ok(Box::new(FakeWallet {
            calls: self.calls.clone(),
            confirm_delay: self.confirm_delay,
            reject_confirm: self.reject_confirm,
        }))
    }
}

pub struct FakeWallet {
    calls: Arc<Mutex<Vec<String>>>,
    confirm_delay: Option<Duration>,
    reject_confirm: bool,
}

impl FakeWallet {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    async fn add_network(&self, network: &NetworkConfig) -> Result<(), RestakeError> {
        self.record(format!("add_network:{}", network.chain_id));
        Ok(())
    }

    async fn switch_network(&self, name: &str) -> Result<(), RestakeError> {
        self.record(format!("switch_network:{name}"));
        Ok(())
    }

    async fn approve(&self) -> Result<(), RestakeError> {
        self.record("approve".into());
        Ok(())
    }

    async fn confirm_transaction(&self) -> Result<(), RestakeError> {
        self.record("confirm".into());
        if let Some(delay) = self.confirm_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_confirm {
            return Err(RestakeError::WalletRejected("insufficient funds for gas".into()));
        }
        Ok(())
    }
}
