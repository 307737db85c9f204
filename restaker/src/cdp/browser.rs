use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::connection::CdpConnection;
use super::page::CdpPage;
use super::recorder::ScreencastRecorder;
use crate::config::BrowserConfig;
use crate::deadline::poll_until;
use crate::errors::RestakeError;
use crate::surface::{AutomationSurface, Environment, Page, Recorder, TargetInfo};

const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const TARGET_CHANNEL_CAPACITY: usize = 64;
/// Bound on a single page load inside the browser; callers usually apply
/// a tighter deadline of their own.
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    #[serde(rename = "Browser")]
    browser: Option<String>,
    web_socket_debugger_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdpTargetInfo {
    target_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
}

impl From<CdpTargetInfo> for TargetInfo {
    fn from(info: CdpTargetInfo) -> Self {
        TargetInfo {
            target_id: info.target_id,
            kind: info.kind,
            url: info.url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfos {
    target_infos: Vec<CdpTargetInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCreated {
    target_info: CdpTargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedTarget {
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct ExtensionManifest {
    version: String,
}

/// Launches a local Chrome or Chromium and drives it over DevTools.
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpSurface;

impl CdpSurface {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AutomationSurface for CdpSurface {
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn Environment>, RestakeError> {
        let browser = CdpBrowser::launch(config).await?;
        Ok(browser)
    }
}

/// A running browser process and its DevTools sessions.
pub struct CdpBrowser {
    port: u16,
    command_timeout: Duration,
    connection: Arc<CdpConnection>,
    child: Mutex<Option<Child>>,
    pages: Mutex<HashMap<String, Arc<CdpPage>>>,
    targets: broadcast::Sender<TargetInfo>,
    forwarder: JoinHandle<()>,
    // Removed with the browser when no profile directory was configured.
    _profile: Option<TempDir>,
}

impl CdpBrowser {
    #[instrument(level = "info", skip_all, fields(port = config.debug_port, headless = config.headless))]
    pub async fn launch(config: &BrowserConfig) -> Result<Arc<Self>, RestakeError> {
        if let Some(dir) = &config.extension_dir {
            check_extension_version(dir, &config.extension_version).await;
        }

        let executable = match &config.executable {
            Some(path) => path.clone(),
            None => find_browser().ok_or_else(|| {
                RestakeError::Launch(format!(
                    "no browser found on PATH (tried {}); set the executable explicitly",
                    BROWSER_CANDIDATES.join(", ")
                ))
            })?,
        };

        let (profile_dir, profile) = match &config.user_data_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let temp = tempfile::Builder::new().prefix("restaker-profile-").tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let args = browser_args(config, &profile_dir);
        debug!(executable = %executable.display(), ?args, "Starting browser");
        let child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RestakeError::Launch(format!("{}: {e}", executable.display())))?;

        let version = discover(config.debug_port, config.startup_timeout()).await?;
        info!(
            browser = version.browser.as_deref().unwrap_or("unknown"),
            "DevTools endpoint is up"
        );

        let connection =
            CdpConnection::connect(&version.web_socket_debugger_url, config.command_timeout())
                .await?;
        let (targets, _) = broadcast::channel(TARGET_CHANNEL_CAPACITY);
        let forwarder = spawn_target_forwarder(&connection, targets.clone());
        connection
            .call("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;

        Ok(Arc::new(Self {
            port: config.debug_port,
            command_timeout: config.command_timeout(),
            connection,
            child: Mutex::new(Some(child)),
            pages: Mutex::new(HashMap::new()),
            targets,
            forwarder,
            _profile: profile,
        }))
    }

    async fn attach_page(&self, target_id: &str) -> Result<Arc<CdpPage>, RestakeError> {
        let mut pages = self.pages.lock().await;
        if let Some(page) = pages.get(target_id) {
            return Ok(page.clone());
        }
        let ws_url = format!("ws://127.0.0.1:{}/devtools/page/{target_id}", self.port);
        let page = CdpPage::attach(&ws_url, target_id, self.command_timeout, PAGE_LOAD_TIMEOUT).await?;
        pages.insert(target_id.to_string(), page.clone());
        Ok(page)
    }
}

#[async_trait]
impl Environment for CdpBrowser {
    async fn new_page(&self) -> Result<Arc<dyn Page>, RestakeError> {
        let created = self
            .connection
            .call("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let created: CreatedTarget = serde_json::from_value(created)?;
        let page = self.attach_page(&created.target_id).await?;
        Ok(page)
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>, RestakeError> {
        let targets = self.connection.call("Target.getTargets", json!({})).await?;
        let targets: TargetInfos = serde_json::from_value(targets)?;
        let live: Vec<CdpTargetInfo> = targets
            .target_infos
            .into_iter()
            .filter(|t| t.kind == "page")
            .collect();

        self.pages
            .lock()
            .await
            .retain(|id, _| live.iter().any(|t| &t.target_id == id));

        let mut pages: Vec<Arc<dyn Page>> = Vec::with_capacity(live.len());
        for target in live {
            match self.attach_page(&target.target_id).await {
                Ok(page) => pages.push(page),
                Err(e) => debug!(target = %target.target_id, error = %e, "Skipping page"),
            }
        }
        Ok(pages)
    }

    async fn attach(&self, target: &TargetInfo) -> Result<Arc<dyn Page>, RestakeError> {
        let page = self.attach_page(&target.target_id).await?;
        Ok(page)
    }

    fn target_events(&self) -> broadcast::Receiver<TargetInfo> {
        self.targets.subscribe()
    }

    async fn recorder(&self, page: &Arc<dyn Page>) -> Result<Box<dyn Recorder>, RestakeError> {
        let page = self.attach_page(page.target_id()).await?;
        Ok(Box::new(ScreencastRecorder::new(page.connection())))
    }

    async fn close(&self) -> Result<(), RestakeError> {
        self.forwarder.abort();
        self.pages.lock().await.clear();
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = self.connection.call("Browser.close", json!({})).await {
            debug!(error = %e, "Browser.close failed, killing the process");
        }
        if let Err(e) = child.kill().await {
            // Already exited after Browser.close.
            debug!(error = %e, "Browser process kill");
        }
        info!("Browser closed");
        Ok(())
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn browser_args(config: &BrowserConfig, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", config.debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-timer-throttling".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(extension) = &config.extension_dir {
        args.push(format!("--disable-extensions-except={}", extension.display()));
        args.push(format!("--load-extension={}", extension.display()));
    }
    args.push("about:blank".to_string());
    args
}

fn find_browser() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        BROWSER_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Poll `/json/version` until the browser answers.
async fn discover(port: u16, timeout: Duration) -> Result<VersionInfo, RestakeError> {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/json/version");
    let url = url.as_str();
    let client = &client;
    poll_until("devtools endpoint", timeout, DISCOVERY_POLL_INTERVAL, move || async move {
        match client.get(url).send().await {
            Ok(response) => match response.json::<VersionInfo>().await {
                Ok(info) => Ok(Some(info)),
                Err(e) => {
                    debug!(error = %e, "DevTools endpoint not ready");
                    Ok(None)
                }
            },
            Err(e) => {
                debug!(error = %e, "DevTools endpoint not reachable yet");
                Ok(None)
            }
        }
    })
    .await
    .map_err(|e| match e {
        RestakeError::DeadlineExceeded { timeout, .. } => RestakeError::Launch(format!(
            "DevTools did not come up on port {port} within {timeout:?}"
        )),
        other => other,
    })
}

fn spawn_target_forwarder(
    connection: &CdpConnection,
    targets: broadcast::Sender<TargetInfo>,
) -> JoinHandle<()> {
    let mut events = connection.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Target event forwarder lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if event.method != "Target.targetCreated" {
                continue;
            }
            match serde_json::from_value::<TargetCreated>(event.params) {
                Ok(created) => {
                    let target = TargetInfo::from(created.target_info);
                    debug!(target = %target.target_id, kind = %target.kind, url = %target.url, "Target created");
                    // No receivers is fine.
                    let _ = targets.send(target);
                }
                Err(e) => debug!(error = %e, "Ignoring malformed targetCreated"),
            }
        }
    })
}

/// Compare the unpacked extension's version with the expected one. Only
/// warns: a different build usually still works with the default selectors.
async fn check_extension_version(dir: &Path, expected: &str) {
    if expected.eq_ignore_ascii_case("latest") {
        return;
    }
    let manifest_path = dir.join("manifest.json");
    let manifest = match tokio::fs::read(&manifest_path).await {
        Ok(bytes) => serde_json::from_slice::<ExtensionManifest>(&bytes),
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "Cannot read extension manifest");
            return;
        }
    };
    match manifest {
        Ok(manifest) if version_matches(&manifest.version, expected) => {
            debug!(version = %manifest.version, "Extension version matches")
        }
        Ok(manifest) => warn!(
            expected,
            found = %manifest.version,
            "Unpacked extension version differs from the configured one"
        ),
        Err(e) => warn!(path = %manifest_path.display(), error = %e, "Invalid extension manifest"),
    }
}

fn version_matches(found: &str, expected: &str) -> bool {
    found.trim_start_matches('v') == expected.trim_start_matches('v')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_args_with_extension() {
        let config = BrowserConfig {
            extension_dir: Some(PathBuf::from("/opt/metamask")),
            ..BrowserConfig::default()
        };
        let args = browser_args(&config, Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--load-extension=/opt/metamask".to_string()));
        assert!(args.contains(&"--disable-extensions-except=/opt/metamask".to_string()));
    }

    #[test]
    fn test_browser_args_headed_without_extension() {
        let config = BrowserConfig {
            headless: false,
            ..BrowserConfig::default()
        };
        let args = browser_args(&config, Path::new("/tmp/profile"));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.iter().any(|a| a.starts_with("--load-extension")));
    }

    #[test]
    fn test_version_matching() {
        assert!(version_matches("11.16.0", "11.16.0"));
        assert!(version_matches("11.16.0", "v11.16.0"));
        assert!(!version_matches("11.15.0", "11.16.0"));
    }

    #[test]
    fn test_target_created_event_parses() {
        let created: TargetCreated = serde_json::from_value(json!({
            "targetInfo": {
                "targetId": "ABC",
                "type": "page",
                "title": "MetaMask",
                "url": "chrome-extension://abc/home.html",
                "attached": false
            }
        }))
        .unwrap();
        let target = TargetInfo::from(created.target_info);
        assert!(target.is_page());
        assert_eq!(target.target_id, "ABC");
    }

    #[tokio::test]
    #[ignore = "requires a local Chrome or Chromium"]
    async fn test_launch_and_close_real_browser() {
        let browser = CdpBrowser::launch(&BrowserConfig::default()).await.unwrap();
        let page = browser.new_page().await.unwrap();
        assert_eq!(page.url().await.unwrap(), "about:blank");
        browser.close().await.unwrap();
    }
}
