use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{CdpConnection, CdpEvent};
use crate::errors::RestakeError;
use crate::surface::Recorder;

const MANIFEST_FILE: &str = "frames.json";
const JPEG_QUALITY: u8 = 70;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameEntry {
    pub file: String,
    /// Seconds since the epoch, as reported by the browser.
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameManifest {
    pub frame_count: usize,
    pub frames: Vec<FrameEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreencastFrame {
    data: String,
    session_id: i64,
    #[serde(default)]
    metadata: FrameMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct FrameMetadata {
    timestamp: Option<f64>,
}

struct ActiveScreencast {
    dir: PathBuf,
    frames: Arc<Mutex<Vec<FrameEntry>>>,
    task: JoinHandle<()>,
}

/// Records a page as a directory of JPEG frames using `Page.startScreencast`.
pub struct ScreencastRecorder {
    connection: Arc<CdpConnection>,
    active: Option<ActiveScreencast>,
}

impl ScreencastRecorder {
    pub(crate) fn new(connection: Arc<CdpConnection>) -> Self {
        Self {
            connection,
            active: None,
        }
    }
}

#[async_trait]
impl Recorder for ScreencastRecorder {
    async fn start(&mut self, path: &Path) -> Result<(), RestakeError> {
        if self.active.is_some() {
            return Err(RestakeError::InvalidArgument(
                "screencast is already running".into(),
            ));
        }
        tokio::fs::create_dir_all(path).await?;

        let events = self.connection.subscribe();
        self.connection
            .call(
                "Page.startScreencast",
                json!({ "format": "jpeg", "quality": JPEG_QUALITY, "everyNthFrame": 1 }),
            )
            .await?;

        let frames = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(capture_frames(
            self.connection.clone(),
            events,
            path.to_path_buf(),
            frames.clone(),
        ));
        info!(dir = %path.display(), "Screencast started");
        self.active = Some(ActiveScreencast {
            dir: path.to_path_buf(),
            frames,
            task,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RestakeError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        if let Err(e) = self.connection.call("Page.stopScreencast", json!({})).await {
            warn!(error = %e, "Failed to stop screencast cleanly");
        }
        active.task.abort();

        let frames = std::mem::take(&mut *active.frames.lock().await);
        let manifest = FrameManifest {
            frame_count: frames.len(),
            frames,
        };
        let manifest_path = active.dir.join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?).await?;
        info!(
            frames = manifest.frame_count,
            manifest = %manifest_path.display(),
            "Screencast stopped"
        );
        Ok(())
    }
}

impl Drop for ScreencastRecorder {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.task.abort();
        }
    }
}

async fn capture_frames(
    connection: Arc<CdpConnection>,
    mut events: broadcast::Receiver<CdpEvent>,
    dir: PathBuf,
    frames: Arc<Mutex<Vec<FrameEntry>>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Screencast dropped frames");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if event.method != "Page.screencastFrame" {
            continue;
        }
        let frame: ScreencastFrame = match serde_json::from_value(event.params) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed screencast frame");
                continue;
            }
        };

        // The browser stops sending until the frame is acknowledged.
        if let Err(e) = connection
            .call(
                "Page.screencastFrameAck",
                json!({ "sessionId": frame.session_id }),
            )
            .await
        {
            warn!(error = %e, "Failed to acknowledge screencast frame");
        }

        let bytes = match STANDARD.decode(frame.data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable screencast frame");
                continue;
            }
        };
        let mut frames = frames.lock().await;
        let file = frame_file_name(frames.len());
        if let Err(e) = tokio::fs::write(dir.join(&file), bytes).await {
            warn!(error = %e, file = %file, "Failed to write screencast frame");
            continue;
        }
        frames.push(FrameEntry {
            file,
            timestamp: frame.metadata.timestamp,
        });
    }
}

fn frame_file_name(index: usize) -> String {
    format!("frame_{index:05}.jpg")
}
