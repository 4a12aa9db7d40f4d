use std::future::Future;

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error};

/// A spawned loop scoped to a dashboard session. `stop` asks the loop to wind
/// down and waits for it; dropping the handle aborts the loop instead.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(shutdown_rx));
        Self {
            name,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(()) => debug!(task = self.name, "background task stopped"),
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!(task = self.name, %err, "background task panicked"),
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
