//! The claim-and-restake run
//!
//! A run is a linear sequence of [`Stage`]s with two early exits that are not
//! failures: the countdown is still too far away, or there is nothing to
//! claim. Any error ends the run as failed. Cleanup (stop the recording, close
//! the browser) runs on every path, exactly once, and never changes the
//! outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::cdp::CdpSurface;
use crate::config::WorkflowConfig;
use crate::countdown::{parse_countdown, Countdown};
use crate::deadline::with_deadline;
use crate::eligibility::EligibilityDecision;
use crate::errors::RestakeError;
use crate::listener::{spawn_extension_reload_listener, ExtensionReloadGuard};
use crate::report::{RunOutcome, RunReport, RunReporter, SkipReason};
use crate::retry::wait_with_recovery;
use crate::scripts;
use crate::surface::{
    AutomationSurface, Environment, Page, Recorder, WaitOptions, WaitPolicy, Wallet, WalletSurface,
};
use crate::wallet::{MetaMaskSurface, WalletSelectors, WalletTimings};

/// Slack added on top of a page-side selector timeout before the outer
/// deadline gives up on the page entirely.
const SELECTOR_DEADLINE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    EnvironmentBringUp,
    WalletBringUp,
    NavigateToSource,
    ReadTimer,
    EligibilityGate,
    NetworkConfiguration,
    WalletConnection,
    NavigateToAction,
    AvailabilityGate,
    PerformAction,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::EnvironmentBringUp => "environment_bring_up",
            Stage::WalletBringUp => "wallet_bring_up",
            Stage::NavigateToSource => "navigate_to_source",
            Stage::ReadTimer => "read_timer",
            Stage::EligibilityGate => "eligibility_gate",
            Stage::NetworkConfiguration => "network_configuration",
            Stage::WalletConnection => "wallet_connection",
            Stage::NavigateToAction => "navigate_to_action",
            Stage::AvailabilityGate => "availability_gate",
            Stage::PerformAction => "perform_action",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The external systems a run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub automation: Arc<dyn AutomationSurface>,
    pub wallet: Arc<dyn WalletSurface>,
}

impl Collaborators {
    /// Local Chrome over DevTools with the MetaMask driver.
    pub fn chrome_metamask(selectors: WalletSelectors) -> Self {
        Self {
            automation: Arc::new(CdpSurface::new()),
            wallet: Arc::new(MetaMaskSurface::new(selectors, WalletTimings::default())),
        }
    }
}

enum Flow {
    Claimed,
    Skipped(SkipReason),
}

/// Handles acquired during a run, released by cleanup.
#[derive(Default)]
struct Session {
    environment: Option<Arc<dyn Environment>>,
    recorder: Option<Box<dyn Recorder>>,
    decision: Option<EligibilityDecision>,
    completed: Vec<Stage>,
    current: Option<(Stage, Instant)>,
}

impl Session {
    fn begin(&mut self, stage: Stage) {
        info!(stage = %stage, "Stage started");
        self.current = Some((stage, Instant::now()));
    }

    fn finish(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            info!(
                stage = %stage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed"
            );
            self.completed.push(stage);
        }
    }
}

pub struct RestakeWorkflow {
    config: WorkflowConfig,
    collaborators: Collaborators,
}

impl RestakeWorkflow {
    pub fn new(config: WorkflowConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Execute one run from a cold start and return its report.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let mut session = Session::default();

        let result = match self.config.validate() {
            Ok(()) => self.drive(&mut session).await,
            Err(e) => Err(e),
        };
        let failed_stage = session.current.take().map(|(stage, _)| stage);

        self.cleanup(&mut session).await;

        let (outcome, skip_reason, error) = match result {
            Ok(Flow::Claimed) => (RunOutcome::Succeeded, None, None),
            Ok(Flow::Skipped(reason)) => {
                info!(reason = %reason.describe(), "Run skipped");
                (RunOutcome::Skipped, Some(reason), None)
            }
            Err(e) => {
                error!(stage = ?failed_stage.map(|s| s.name()), error = %e, "Run failed");
                (RunOutcome::Failed, None, Some(e.to_string()))
            }
        };

        let report = RunReport {
            outcome,
            skip_reason,
            decision: session.decision,
            completed_stages: session.completed,
            failed_stage: if outcome == RunOutcome::Failed {
                failed_stage
            } else {
                None
            },
            error,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            outcome = %report.outcome,
            duration_ms = report.duration_ms(),
            "Run finished"
        );
        report
    }

    /// Execute one run and persist its outcome. A reporter failure is logged
    /// and does not change the outcome.
    pub async fn run_and_report(&self, reporter: &dyn RunReporter) -> RunReport {
        let report = self.run().await;
        if let Err(e) = reporter.report(&report).await {
            error!(error = %e, outcome = %report.outcome, "Failed to persist run status");
        }
        report
    }

    async fn drive(&self, session: &mut Session) -> Result<Flow, RestakeError> {
        let pages = &self.config.pages;

        session.begin(Stage::EnvironmentBringUp);
        let environment = self.bring_up_environment().await?;
        session.environment = Some(environment.clone());
        session.finish();

        session.begin(Stage::WalletBringUp);
        let wallet = self.bring_up_wallet(&environment).await?;
        session.finish();

        session.begin(Stage::NavigateToSource);
        let page = environment.new_page().await?;
        self.start_recording(&environment, &page, session).await;
        self.navigate(&page, &pages.stake_url, WaitPolicy::NetworkIdle)
            .await?;
        session.finish();

        session.begin(Stage::ReadTimer);
        let remaining = self.read_timer(&page).await?;
        session.finish();

        session.begin(Stage::EligibilityGate);
        let decision = EligibilityDecision::evaluate(remaining, self.config.threshold);
        session.decision = Some(decision);
        info!(
            remaining = %decision.remaining,
            threshold = %decision.threshold,
            act_now = decision.act_now,
            "Eligibility decided"
        );
        session.finish();
        if !decision.act_now {
            return Ok(Flow::Skipped(SkipReason::PlentyOfTime {
                remaining: decision.remaining,
                threshold: decision.threshold,
            }));
        }

        session.begin(Stage::NetworkConfiguration);
        self.configure_network(wallet.as_ref()).await?;
        session.finish();

        session.begin(Stage::WalletConnection);
        self.connect_wallet(&page, wallet.as_ref()).await?;
        session.finish();

        session.begin(Stage::NavigateToAction);
        self.navigate(&page, &pages.bonds_url, WaitPolicy::DomContentLoaded)
            .await?;
        session.finish();

        session.begin(Stage::AvailabilityGate);
        let available = self.claim_available(&page).await?;
        session.finish();
        if !available {
            return Ok(Flow::Skipped(SkipReason::NothingToClaim));
        }

        session.begin(Stage::PerformAction);
        self.claim(&page, wallet.as_ref()).await?;
        session.finish();

        Ok(Flow::Claimed)
    }

    #[instrument(level = "debug", skip(self))]
    async fn bring_up_environment(&self) -> Result<Arc<dyn Environment>, RestakeError> {
        with_deadline(
            "launch browser",
            self.config.deadlines.launch(),
            self.collaborators.automation.launch(&self.config.browser),
        )
        .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn bring_up_wallet(
        &self,
        environment: &Arc<dyn Environment>,
    ) -> Result<Box<dyn Wallet>, RestakeError> {
        let guard = ExtensionReloadGuard::new();
        let listener = self.config.browser.reload_extension_on_open.then(|| {
            spawn_extension_reload_listener(
                environment.clone(),
                guard.clone(),
                self.config.deadlines.navigation(),
            )
        });

        let result = with_deadline(
            "wallet bring-up",
            self.config.deadlines.wallet_setup(),
            self.collaborators
                .wallet
                .setup(environment.clone(), &self.config.credentials),
        )
        .await;

        let state = guard.disarm().await;
        if let Some(listener) = listener {
            listener.abort();
        }
        debug!(?state, "Extension reload listener stopped");
        result
    }

    async fn start_recording(
        &self,
        environment: &Arc<dyn Environment>,
        page: &Arc<dyn Page>,
        session: &mut Session,
    ) {
        let Some(path) = &self.config.recording_path else {
            return;
        };
        let mut recorder = match environment.recorder(page).await {
            Ok(recorder) => recorder,
            Err(e) => {
                warn!(error = %e, "Could not create recorder, continuing without recording");
                return;
            }
        };
        match recorder.start(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Recording started");
                session.recorder = Some(recorder);
            }
            Err(e) => warn!(error = %e, "Could not start recording, continuing without it"),
        }
    }

    #[instrument(level = "debug", skip(self, page))]
    async fn navigate(
        &self,
        page: &Arc<dyn Page>,
        url: &str,
        wait: WaitPolicy,
    ) -> Result<(), RestakeError> {
        with_deadline(
            "navigate",
            self.config.deadlines.navigation(),
            page.goto(url, wait),
        )
        .await
    }

    /// Wait for the countdown to render, reloading between failed waits, then
    /// read and parse it.
    #[instrument(level = "debug", skip_all)]
    async fn read_timer(&self, page: &Arc<dyn Page>) -> Result<Countdown, RestakeError> {
        let pages = &self.config.pages;
        let selector = pages.timer_selector.as_str();
        let wait = WaitOptions::visible(self.config.deadlines.selector_wait());
        let navigation = self.config.deadlines.navigation();

        wait_with_recovery(
            "countdown visible",
            self.config.selector_retry_attempts,
            move || {
                with_deadline(
                    "wait for countdown",
                    wait.timeout + SELECTOR_DEADLINE_GRACE,
                    page.wait_for_selector(selector, wait),
                )
            },
            move || with_deadline("reload", navigation, page.reload(WaitPolicy::NetworkIdle)),
        )
        .await?;

        let script = scripts::countdown_text(&pages.timer_container_class, &pages.timer_emphasis_tag);
        let text = match page.evaluate(&script).await? {
            Value::String(text) => text,
            Value::Null => {
                return Err(RestakeError::ElementNotFound(format!(
                    "<{}> inside .{}",
                    pages.timer_emphasis_tag, pages.timer_container_class
                )))
            }
            other => {
                return Err(RestakeError::Script(format!(
                    "countdown text is not a string: {other}"
                )))
            }
        };
        info!(text = %text, "Read countdown");
        parse_countdown(&text)
    }

    #[instrument(level = "debug", skip_all, fields(network = %self.config.network.name))]
    async fn configure_network(&self, wallet: &dyn Wallet) -> Result<(), RestakeError> {
        let network = &self.config.network;
        let timeout = self.config.deadlines.wallet_action();
        wallet_action("add network", timeout, wallet.add_network(network)).await?;
        wallet_action("switch network", timeout, wallet.switch_network(&network.name)).await
    }

    #[instrument(level = "debug", skip_all)]
    async fn connect_wallet(
        &self,
        page: &Arc<dyn Page>,
        wallet: &dyn Wallet,
    ) -> Result<(), RestakeError> {
        let pages = &self.config.pages;
        self.wait_visible(page, &pages.wallet_menu_selector).await?;
        page.click(&pages.wallet_menu_selector).await?;
        self.wait_visible(page, &pages.provider_selector).await?;
        page.click(&pages.provider_selector).await?;
        wallet_action(
            "approve connection",
            self.config.deadlines.wallet_action(),
            wallet.approve(),
        )
        .await
    }

    /// Whether the claim control is present and enabled.
    #[instrument(level = "debug", skip_all)]
    async fn claim_available(&self, page: &Arc<dyn Page>) -> Result<bool, RestakeError> {
        let selector = &self.config.pages.claim_selector;
        self.wait_visible(page, selector).await?;
        match page.evaluate(&scripts::is_disabled(selector)).await? {
            Value::Bool(disabled) => {
                debug!(disabled, "Claim control state");
                Ok(!disabled)
            }
            Value::Null => Err(RestakeError::ElementNotFound(selector.clone())),
            other => Err(RestakeError::Script(format!(
                "unexpected disabled state for {selector}: {other}"
            ))),
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn claim(&self, page: &Arc<dyn Page>, wallet: &dyn Wallet) -> Result<(), RestakeError> {
        page.click(&self.config.pages.claim_selector).await?;
        wallet_action(
            "confirm transaction",
            self.config.deadlines.wallet_action(),
            wallet.confirm_transaction(),
        )
        .await?;
        info!("Claim-and-stake transaction confirmed");
        Ok(())
    }

    async fn wait_visible(&self, page: &Arc<dyn Page>, selector: &str) -> Result<(), RestakeError> {
        let wait = WaitOptions::visible(self.config.deadlines.selector_wait());
        with_deadline(
            "wait for selector",
            wait.timeout + SELECTOR_DEADLINE_GRACE,
            page.wait_for_selector(selector, wait),
        )
        .await
    }

    /// Stop the recorder and close the environment if they were started. Each
    /// step is guarded separately and failures are only logged.
    async fn cleanup(&self, session: &mut Session) {
        let timeout = self.config.deadlines.cleanup();

        if let Some(mut recorder) = session.recorder.take() {
            match with_deadline("stop recorder", timeout, recorder.stop()).await {
                Ok(()) => debug!("Recorder stopped"),
                Err(e) => warn!(error = %e, "Failed to stop recorder"),
            }
        }

        if let Some(environment) = session.environment.take() {
            match with_deadline("close environment", timeout, environment.close()).await {
                Ok(()) => debug!("Environment closed"),
                Err(e) => warn!(error = %e, "Failed to close environment"),
            }
        }
    }
}

/// Bound a wallet step; running out of time is reported as a wallet timeout.
async fn wallet_action<F>(operation: &str, timeout: Duration, action: F) -> Result<(), RestakeError>
where
    F: std::future::Future<Output = Result<(), RestakeError>>,
{
    with_deadline(operation, timeout, action)
        .await
        .map_err(|e| match e {
            RestakeError::DeadlineExceeded { operation, timeout } => {
                RestakeError::WalletTimeout(format!("{operation} did not finish within {timeout:?}"))
            }
            other => other,
        })
}
