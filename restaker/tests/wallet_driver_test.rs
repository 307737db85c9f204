mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, sample_network, FakeEnvironment, FakePage};
use restaker::config::WalletCredentials;
use restaker::surface::{Environment, Wallet, WalletSurface};
use restaker::{scripts, MetaMaskSurface, RestakeError, WalletSelectors, WalletTimings};
use serde_json::Value;

const EXTENSION: &str = "chrome-extension://nkbihfbeogaeaoehlefnkodbefgpgknn/";

fn timings() -> WalletTimings {
    WalletTimings {
        element_timeout: Duration::from_secs(2),
        step_settle: Duration::ZERO,
    }
}

fn credentials() -> WalletCredentials {
    WalletCredentials::new("correct horse", "alpha bravo charlie delta")
}

/// An environment with the extension's onboarding page already open.
fn extension_environment() -> (Arc<FakeEnvironment>, Arc<FakePage>) {
    let environment = FakeEnvironment::new();
    let home = FakePage::new(
        "home",
        &format!("{EXTENSION}home.html#onboarding/welcome"),
    );
    environment.add_page(home.clone());
    (Arc::new(environment), home)
}

#[tokio::test]
async fn test_setup_imports_seed_and_password() {
    init_tracing();
    let (environment, home) = extension_environment();
    let selectors = WalletSelectors::default();
    let surface = MetaMaskSurface::new(selectors.clone(), timings());

    surface
        .setup(environment.clone() as Arc<dyn Environment>, &credentials())
        .await
        .unwrap();

    let fills = home.fills();
    assert_eq!(
        fills[..4],
        [
            ("[data-testid=\"import-srp__srp-word-0\"]".to_string(), "alpha".to_string()),
            ("[data-testid=\"import-srp__srp-word-1\"]".to_string(), "bravo".to_string()),
            ("[data-testid=\"import-srp__srp-word-2\"]".to_string(), "charlie".to_string()),
            ("[data-testid=\"import-srp__srp-word-3\"]".to_string(), "delta".to_string()),
        ]
    );
    assert!(fills.contains(&(selectors.new_password.clone(), "correct horse".to_string())));
    assert!(fills.contains(&(selectors.confirm_password.clone(), "correct horse".to_string())));

    let clicks = home.clicks();
    assert_eq!(clicks.first(), Some(&selectors.onboarding_terms));
    assert_eq!(clicks.last(), Some(&selectors.pin_done));
}

#[tokio::test]
async fn test_setup_times_out_without_extension_page() {
    let environment = Arc::new(FakeEnvironment::new());
    let surface = MetaMaskSurface::new(
        WalletSelectors::default(),
        WalletTimings {
            element_timeout: Duration::from_millis(300),
            step_settle: Duration::ZERO,
        },
    );

    let result = surface.setup(environment, &credentials()).await;

    assert!(matches!(result, Err(RestakeError::DeadlineExceeded { .. })));
}

#[tokio::test]
async fn test_add_and_switch_network() {
    let (environment, home) = extension_environment();
    let selectors = WalletSelectors::default();
    home.respond(scripts::is_disabled(&selectors.network_save), Value::Bool(false));
    home.respond(
        scripts::click_by_text(&selectors.network_list_item, "Fantom Opera"),
        Value::Bool(true),
    );
    let surface = MetaMaskSurface::new(selectors.clone(), timings());
    let wallet = surface.setup(environment, &credentials()).await.unwrap();
    let network = sample_network();

    wallet.add_network(&network).await.unwrap();
    wallet.switch_network(&network.name).await.unwrap();

    assert!(home
        .gotos()
        .contains(&format!("{EXTENSION}home.html#settings/networks/add-network")));
    let fills = home.fills();
    assert!(fills.contains(&(selectors.network_chain_id_input.clone(), "250".to_string())));
    assert!(fills.contains(&(selectors.network_symbol_input.clone(), "FTM".to_string())));
    assert!(home.clicks().contains(&selectors.network_save));
    assert!(home.clicks().contains(&selectors.network_display));
}

#[tokio::test]
async fn test_switch_to_unknown_network_fails() {
    let (environment, _home) = extension_environment();
    let surface = MetaMaskSurface::new(WalletSelectors::default(), timings());
    let wallet = surface.setup(environment, &credentials()).await.unwrap();

    let result = wallet.switch_network("Nowhere Mainnet").await;

    assert!(matches!(result, Err(RestakeError::ElementNotFound(_))));
}

#[tokio::test]
async fn test_approve_and_confirm_on_notification_popup() {
    let (environment, _home) = extension_environment();
    let selectors = WalletSelectors::default();
    let popup = FakePage::new("popup", &format!("{EXTENSION}notification.html"));
    popup.respond(scripts::is_disabled(&selectors.confirm_button), Value::Bool(false));
    environment.add_page(popup.clone());
    let surface = MetaMaskSurface::new(selectors.clone(), timings());
    let wallet = surface.setup(environment, &credentials()).await.unwrap();

    wallet.approve().await.unwrap();
    wallet.confirm_transaction().await.unwrap();

    let clicks = popup.clicks();
    assert_eq!(clicks.len(), selectors.approve_steps.len() + 1);
    assert_eq!(clicks.last(), Some(&selectors.confirm_button));
}

#[tokio::test]
async fn test_disabled_confirm_is_a_rejection() {
    let (environment, _home) = extension_environment();
    let selectors = WalletSelectors::default();
    let popup = FakePage::new("popup", &format!("{EXTENSION}notification.html"));
    popup.respond(scripts::is_disabled(&selectors.confirm_button), Value::Bool(true));
    environment.add_page(popup.clone());
    let surface = MetaMaskSurface::new(selectors, timings());
    let wallet = surface.setup(environment, &credentials()).await.unwrap();

    let result = wallet.confirm_transaction().await;

    assert!(matches!(result, Err(RestakeError::WalletRejected(_))));
    assert!(popup.clicks().is_empty());
}

#[tokio::test]
async fn test_confirm_times_out_as_wallet_timeout() {
    let (environment, _home) = extension_environment();
    let selectors = WalletSelectors::default();
    let popup = FakePage::new("popup", &format!("{EXTENSION}notification.html"));
    popup.fail_waits(&selectors.confirm_button, 1);
    environment.add_page(popup);
    let surface = MetaMaskSurface::new(selectors, timings());
    let wallet = surface.setup(environment, &credentials()).await.unwrap();

    let result = wallet.confirm_transaction().await;

    assert!(matches!(result, Err(RestakeError::WalletTimeout(_))));
}
