use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::deadline::with_deadline;
use crate::errors::RestakeError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

type CallResult = Result<Value, String>;
type PendingMap = HashMap<u64, oneshot::Sender<CallResult>>;
type Pending = Arc<Mutex<PendingMap>>;

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
}

/// An unsolicited DevTools notification, e.g. `Page.lifecycleEvent`.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CdpIncoming {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<CdpErrorBody>,
    },
    Event(CdpEvent),
}

/// JSON-RPC over one DevTools WebSocket.
///
/// Requests are matched to responses by id through a pending map; events are
/// fanned out on a broadcast channel. When the socket closes every pending
/// call fails.
pub struct CdpConnection {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    next_id: AtomicU64,
    command_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpConnection {
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Arc<Self>, RestakeError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RestakeError::Protocol(format!("connect {url}: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        // writer task
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!("cdp send error: {}", e);
                    break;
                }
            }
        });

        // reader loop
        let reader_pending = pending.clone();
        let reader_events = events.clone();
        let reader_url = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if !msg.is_text() {
                    continue;
                }
                let txt = msg.into_text().unwrap_or_default();
                match serde_json::from_str::<CdpIncoming>(&txt) {
                    Ok(CdpIncoming::Response { id, result, error }) => {
                        let reply = match error {
                            Some(err) => Err(format!("{} (code {})", err.message, err.code)),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        if let Some(tx) = reader_pending.lock().await.remove(&id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Ok(CdpIncoming::Event(event)) => {
                        tracing::trace!(method = %event.method, "cdp event");
                        let _ = reader_events.send(event);
                    }
                    Err(e) => {
                        let head: String = txt.chars().take(200).collect();
                        tracing::debug!(error = %e, message = %head, "Unrecognised cdp message");
                    }
                }
            }
            tracing::debug!(url = %reader_url, "cdp socket closed");
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err("connection closed".into()));
            }
        });

        Ok(Arc::new(Self {
            url: url.to_string(),
            outgoing: tx,
            pending,
            events,
            next_id: AtomicU64::new(1),
            command_timeout,
            tasks: vec![writer, reader],
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Events received from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Send a command and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RestakeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = serde_json::to_string(&CdpRequest { id, method, params })?;
        tracing::debug!(id, method, "cdp call");
        if self.outgoing.send(Message::Text(request)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RestakeError::Protocol(format!(
                "{method}: connection to {} is closed",
                self.url
            )));
        }

        let reply = with_deadline(method, self.command_timeout, async {
            rx.await
                .map_err(|_| RestakeError::Protocol(format!("{method}: response channel dropped")))
        })
        .await;

        match reply {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(RestakeError::Protocol(format!("{method}: {message}"))),
            Err(e) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
