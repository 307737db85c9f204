use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use super::connection::{CdpConnection, CdpEvent};
use crate::deadline::{poll_until, with_deadline};
use crate::errors::RestakeError;
use crate::scripts;
use crate::surface::{Page, WaitOptions, WaitPolicy};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl WaitPolicy {
    fn lifecycle_event(&self) -> &'static str {
        match self {
            WaitPolicy::DomContentLoaded => "DOMContentLoaded",
            WaitPolicy::NetworkIdle => "networkIdle",
        }
    }

    fn ready_state_reached(&self, state: &str) -> bool {
        match self {
            WaitPolicy::DomContentLoaded => state == "interactive" || state == "complete",
            WaitPolicy::NetworkIdle => state == "complete",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateResult {
    loader_id: Option<String>,
    error_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LifecycleEvent {
    frame_id: String,
    loader_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SelectorState {
    found: bool,
    visible: bool,
}

#[derive(Debug, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// A page target with its own DevTools socket.
pub struct CdpPage {
    target_id: String,
    connection: Arc<CdpConnection>,
    navigation_timeout: Duration,
}

impl CdpPage {
    pub(crate) async fn attach(
        ws_url: &str,
        target_id: &str,
        command_timeout: Duration,
        navigation_timeout: Duration,
    ) -> Result<Arc<Self>, RestakeError> {
        let connection = CdpConnection::connect(ws_url, command_timeout).await?;
        connection.call("Page.enable", json!({})).await?;
        connection
            .call("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        debug!(target_id, "Attached to page");
        Ok(Arc::new(Self {
            target_id: target_id.to_string(),
            connection,
            navigation_timeout,
        }))
    }

    pub(crate) fn connection(&self) -> Arc<CdpConnection> {
        self.connection.clone()
    }

    /// Wait for the main frame to reach `wait`. With no loader id, the loader
    /// of the next `init` event in the main frame is tracked.
    async fn wait_for_lifecycle(
        &self,
        events: &mut broadcast::Receiver<CdpEvent>,
        mut loader: Option<String>,
        wait: WaitPolicy,
    ) -> Result<(), RestakeError> {
        let wanted = wait.lifecycle_event();
        with_deadline("page lifecycle", self.navigation_timeout, async {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Lifecycle listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(RestakeError::Protocol("page socket closed".into()))
                    }
                };
                if event.method != "Page.lifecycleEvent" {
                    continue;
                }
                let Ok(lifecycle) = serde_json::from_value::<LifecycleEvent>(event.params) else {
                    continue;
                };
                if lifecycle.frame_id != self.target_id {
                    continue;
                }
                if loader.is_none() && lifecycle.name == "init" {
                    loader = Some(lifecycle.loader_id);
                    continue;
                }
                if loader.as_deref() == Some(lifecycle.loader_id.as_str()) && lifecycle.name == wanted
                {
                    return Ok(());
                }
            }
        })
        .await
    }

    /// Same-document navigations (hash routes) fire no lifecycle events, so
    /// poll `document.readyState` instead.
    async fn wait_for_ready_state(&self, wait: WaitPolicy) -> Result<(), RestakeError> {
        poll_until("document ready", self.navigation_timeout, POLL_INTERVAL, move || async move {
            let state = self.evaluate(scripts::READY_STATE).await?;
            Ok(state
                .as_str()
                .filter(|state| wait.ready_state_reached(state))
                .map(|_| ()))
        })
        .await
    }

    async fn dispatch_mouse(&self, kind: &str, point: &Point) -> Result<(), RestakeError> {
        self.connection
            .call(
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": point.x,
                    "y": point.y,
                    "button": "left",
                    "clickCount": 1,
                }),
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Page for CdpPage {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn url(&self) -> Result<String, RestakeError> {
        match self.evaluate(scripts::LOCATION_HREF).await? {
            Value::String(url) => Ok(url),
            other => Err(RestakeError::Script(format!("location.href returned {other}"))),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn goto(&self, url: &str, wait: WaitPolicy) -> Result<(), RestakeError> {
        let mut events = self.connection.subscribe();
        let result = self
            .connection
            .call("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| RestakeError::NavigationFailed(format!("{url}: {e}")))?;
        let result: NavigateResult = serde_json::from_value(result)?;

        if let Some(error_text) = result.error_text {
            return Err(RestakeError::NavigationFailed(format!("{url}: {error_text}")));
        }
        match result.loader_id {
            Some(loader) => {
                self.wait_for_lifecycle(&mut events, Some(loader), wait)
                    .await
            }
            None => self.wait_for_ready_state(wait).await,
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn reload(&self, wait: WaitPolicy) -> Result<(), RestakeError> {
        let mut events = self.connection.subscribe();
        self.connection
            .call("Page.reload", json!({ "ignoreCache": false }))
            .await
            .map_err(|e| RestakeError::NavigationFailed(format!("reload: {e}")))?;
        self.wait_for_lifecycle(&mut events, None, wait).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitOptions,
    ) -> Result<(), RestakeError> {
        let script = scripts::selector_state(selector);
        let script = script.as_str();
        let operation = format!("wait for {selector}");
        poll_until(&operation, options.timeout, POLL_INTERVAL, move || async move {
            let state: SelectorState = match self.evaluate(script).await? {
                Value::Null => return Ok(None),
                value => serde_json::from_value(value)?,
            };
            Ok((state.found && (state.visible || !options.visible)).then_some(()))
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn click(&self, selector: &str) -> Result<(), RestakeError> {
        let point: Point = match self.evaluate(&scripts::element_center(selector)).await? {
            Value::Null => return Err(RestakeError::ElementNotFound(selector.to_string())),
            value => serde_json::from_value(value)?,
        };
        self.dispatch_mouse("mouseMoved", &point).await?;
        self.dispatch_mouse("mousePressed", &point).await?;
        self.dispatch_mouse("mouseReleased", &point).await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), RestakeError> {
        let focused = self.evaluate(&scripts::focus_and_select(selector)).await?;
        if focused != Value::Bool(true) {
            return Err(RestakeError::ElementNotFound(selector.to_string()));
        }
        self.connection
            .call("Input.insertText", json!({ "text": value }))
            .await
            .map(|_| ())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, RestakeError> {
        let response = self
            .connection
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("JavaScript execution error");
            return Err(RestakeError::Script(message.to_string()));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}
