//! Unattended claim-and-restake automation
//!
//! This crate drives a staking dashboard through a browser with a wallet
//! extension: it reads the countdown to the next rebase, decides whether the
//! run is close enough to act, and if so claims and restakes every bond in one
//! wallet-confirmed transaction. Each run is self-contained and leaves a
//! single status artifact behind.

pub mod cdp;
pub mod config;
pub mod countdown;
pub mod deadline;
pub mod eligibility;
pub mod errors;
pub mod listener;
pub mod report;
pub mod retry;
pub mod scripts;
pub mod surface;
pub mod wallet;
pub mod workflow;

pub use cdp::CdpSurface;
pub use config::{
    BrowserConfig, NetworkConfig, PageConfig, StageDeadlines, WalletCredentials, WorkflowConfig,
};
pub use countdown::{parse_countdown, Countdown};
pub use deadline::{poll_until, with_deadline};
pub use eligibility::{should_act_now, EligibilityDecision};
pub use errors::RestakeError;
pub use listener::{ExtensionReloadGuard, ReloadState};
pub use report::{JsonStatusReporter, RunOutcome, RunReport, RunReporter, SkipReason, StatusArtifact};
pub use retry::wait_with_recovery;
pub use surface::{
    AutomationSurface, Environment, Page, Recorder, TargetInfo, WaitOptions, WaitPolicy, Wallet,
    WalletSurface,
};
pub use wallet::{MetaMaskSurface, WalletSelectors, WalletTimings};
pub use workflow::{Collaborators, RestakeWorkflow, Stage};
