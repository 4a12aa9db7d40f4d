//! Subscription to the authority's `/ws/updates` change feed.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use shared::protocol::PushEvent;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    arbiter::ModeArbiter,
    error::SyncError,
    state::{MergeOutcome, SyncStore, UpdateSource},
    task::BackgroundTask,
    ClientEvent,
};

/// What a single inbound frame did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushApplied {
    Mode(MergeOutcome),
    Actuator(MergeOutcome),
    Ignored,
}

pub struct PushSynchronizer {
    store: Arc<SyncStore>,
    arbiter: Arc<ModeArbiter>,
    events: broadcast::Sender<ClientEvent>,
}

impl PushSynchronizer {
    pub fn new(
        store: Arc<SyncStore>,
        arbiter: Arc<ModeArbiter>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            store,
            arbiter,
            events,
        }
    }

    /// Applies one text frame. Unknown event kinds are ignored; malformed
    /// frames are reported as protocol errors and change nothing.
    pub async fn handle_frame(&self, text: &str) -> Result<PushApplied, SyncError> {
        let stamp = self.store.stamp();
        let event: PushEvent = serde_json::from_str(text)
            .map_err(|err| SyncError::Protocol(format!("invalid push frame: {err}")))?;
        match event {
            PushEvent::ModeUpdate { mode, threshold } => {
                let outcome = self.arbiter.apply_pushed_mode(mode, threshold, stamp).await?;
                debug!(%mode, ?threshold, ?outcome, "push: mode_update");
                Ok(PushApplied::Mode(outcome))
            }
            PushEvent::ActuatorUpdate { actuator, value } => {
                let outcome = self
                    .store
                    .merge_actuator(actuator.clone(), value, stamp, UpdateSource::Push)
                    .await;
                if outcome == MergeOutcome::UnknownActuator {
                    return Err(SyncError::Protocol(format!(
                        "actuator_update for unknown actuator '{actuator}'"
                    )));
                }
                debug!(%actuator, %value, ?outcome, "push: actuator_update");
                Ok(PushApplied::Actuator(outcome))
            }
            PushEvent::Unknown => {
                debug!("push: ignoring unrecognized event type");
                Ok(PushApplied::Ignored)
            }
        }
    }

    /// Opens the subscription and spawns the reader. The reader exits on close,
    /// on a receive error, or when the returned task is stopped; it never
    /// reconnects by itself.
    pub async fn connect(self: &Arc<Self>, url: &Url) -> Result<BackgroundTask, SyncError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SyncError::Transport {
                operation: "connect push channel",
                message: err.to_string(),
            })?;
        info!(%url, "push channel connected");
        let _ = self.events.send(ClientEvent::PushConnected);

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let sync = Arc::clone(self);
        Ok(BackgroundTask::spawn("push", move |mut shutdown| async move {
            let reason = loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        let _ = ws_writer.send(Message::Close(None)).await;
                        let _ = ws_writer.close().await;
                        info!("push channel closed");
                        return;
                    }
                    msg = ws_reader.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(error) = sync.handle_frame(&text).await {
                                warn!(%error, "push: dropping frame");
                            }
                        }
                        Some(Ok(Message::Close(_))) => break "closed by authority".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break format!("receive failed: {err}"),
                        None => break "stream ended".to_string(),
                    }
                }
            };
            warn!(%reason, "push channel lost; continuing with pulls only");
            let _ = sync.events.send(ClientEvent::PushDisconnected { reason });
        }))
    }
}

#[cfg(test)]
#[path = "tests/push_tests.rs"]
mod tests;
