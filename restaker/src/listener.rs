//! One-shot reload of the wallet extension page during bring-up
//!
//! Some extension builds open their first page in a broken state unless it
//! is the onboarding welcome screen; reloading it once fixes it. The reload
//! runs from a background listener while the wallet is being set up, so it
//! is serialized against the main sequence through [`ExtensionReloadGuard`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deadline::with_deadline;
use crate::errors::RestakeError;
use crate::surface::{Environment, TargetInfo, WaitPolicy};

const EXTENSION_SCHEME: &str = "chrome-extension://";
const WELCOME_MARKER: &str = "welcome";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    /// Bring-up is in progress and no reload has happened yet.
    Armed,
    /// The single reload has been performed.
    Reloaded,
    /// Bring-up finished before any reload was needed.
    Disarmed,
}

/// Allows at most one extension reload, and none after bring-up completes.
///
/// The reload itself runs while the state lock is held, so [`disarm`] waits
/// for an in-flight reload to finish rather than racing it.
///
/// [`disarm`]: ExtensionReloadGuard::disarm
#[derive(Debug)]
pub struct ExtensionReloadGuard {
    state: Mutex<ReloadState>,
}

impl ExtensionReloadGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReloadState::Armed),
        })
    }

    pub async fn state(&self) -> ReloadState {
        *self.state.lock().await
    }

    /// Run `reload` if the guard is still armed. Returns whether it ran.
    ///
    /// The guard is spent even when `reload` fails.
    pub async fn reload_once<F, Fut>(&self, reload: F) -> Result<bool, RestakeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), RestakeError>>,
    {
        let mut state = self.state.lock().await;
        if *state != ReloadState::Armed {
            return Ok(false);
        }
        *state = ReloadState::Reloaded;
        reload().await.map(|_| true)
    }

    /// Mark bring-up as complete and return the final state.
    pub async fn disarm(&self) -> ReloadState {
        let mut state = self.state.lock().await;
        if *state == ReloadState::Armed {
            *state = ReloadState::Disarmed;
        }
        *state
    }
}

/// Whether a freshly created target is an extension page that needs the reload.
pub fn needs_reload(target: &TargetInfo) -> bool {
    target.is_page() && target.url.starts_with(EXTENSION_SCHEME) && !target.url.contains(WELCOME_MARKER)
}

/// Subscribe to target creation on `environment` and reload the first
/// qualifying extension page, at most once. Subscription happens before this
/// returns, so no target created afterwards is missed.
pub fn spawn_extension_reload_listener(
    environment: Arc<dyn Environment>,
    guard: Arc<ExtensionReloadGuard>,
    reload_timeout: Duration,
) -> JoinHandle<()> {
    let events = environment.target_events();
    tokio::spawn(listen(environment, guard, events, reload_timeout))
}

async fn listen(
    environment: Arc<dyn Environment>,
    guard: Arc<ExtensionReloadGuard>,
    mut events: broadcast::Receiver<TargetInfo>,
    reload_timeout: Duration,
) {
    loop {
        let target = match events.recv().await {
            Ok(target) => target,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Target listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        if !target.is_page() || !target.url.starts_with(EXTENSION_SCHEME) {
            continue;
        }
        if !needs_reload(&target) {
            debug!(url = %target.url, "Extension opened on its welcome page, leaving it alone");
            return;
        }

        let result = guard
            .reload_once(|| async {
                let page = environment.attach(&target).await?;
                with_deadline(
                    "reload extension page",
                    reload_timeout,
                    page.reload(WaitPolicy::DomContentLoaded),
                )
                .await
            })
            .await;

        match result {
            Ok(true) => info!(url = %target.url, "Reloaded extension page"),
            Ok(false) => debug!("Extension reload no longer allowed"),
            Err(e) => warn!(url = %target.url, error = %e, "Extension page reload failed"),
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(kind: &str, url: &str) -> TargetInfo {
        TargetInfo {
            target_id: "T1".into(),
            kind: kind.into(),
            url: url.into(),
        }
    }

    #[test]
    fn test_needs_reload() {
        assert!(needs_reload(&target("page", "chrome-extension://abc/home.html")));
        assert!(!needs_reload(&target(
            "page",
            "chrome-extension://abc/home.html#onboarding/welcome"
        )));
        assert!(!needs_reload(&target("service_worker", "chrome-extension://abc/bg.js")));
        assert!(!needs_reload(&target("page", "https://app.spartacus.finance/")));
    }

    #[tokio::test]
    async fn test_reload_happens_once() {
        let guard = ExtensionReloadGuard::new();
        assert!(guard.reload_once(|| async { Ok(()) }).await.unwrap());
        assert!(!guard.reload_once(|| async { Ok(()) }).await.unwrap());
        assert_eq!(guard.state().await, ReloadState::Reloaded);
        assert_eq!(guard.disarm().await, ReloadState::Reloaded);
    }

    #[tokio::test]
    async fn test_no_reload_after_disarm() {
        let guard = ExtensionReloadGuard::new();
        assert_eq!(guard.disarm().await, ReloadState::Disarmed);

        let called = std::sync::atomic::AtomicBool::new(false);
        let ran = guard
            .reload_once(|| async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert!(!ran);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_reload_spends_guard() {
        let guard = ExtensionReloadGuard::new();
        let result = guard
            .reload_once(|| async { Err(RestakeError::NavigationFailed("gone".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(guard.disarm().await, ReloadState::Reloaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_waits_for_inflight_reload() {
        let guard = ExtensionReloadGuard::new();
        let reloading = guard.clone();
        let handle = tokio::spawn(async move {
            reloading
                .reload_once(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(guard.disarm().await, ReloadState::Reloaded);
        assert!(handle.await.unwrap().unwrap());
    }
}
