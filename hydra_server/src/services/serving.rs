//! One static file listener per directly served submission.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::error::{HydraError, HydraResult};

/// How long a stopping listener may spend draining connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind the site listener for `port`.
pub async fn bind(bind_addr: &str, port: u16) -> HydraResult<TcpListener> {
    TcpListener::bind((bind_addr, port))
        .await
        .map_err(|source| HydraError::Bind { port, source })
}

struct ActiveSite {
    port: u16,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Listeners owned by this process, keyed by submission id.
pub struct SiteListeners {
    root: CancellationToken,
    active: Mutex<HashMap<i64, ActiveSite>>,
}

impl Default for SiteListeners {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteListeners {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `dir` on `listener` until stopped or shut down.
    pub async fn start(&self, submission_id: i64, listener: TcpListener, dir: PathBuf) -> HydraResult<u16> {
        let port = listener
            .local_addr()
            .map_err(|source| HydraError::io("reading listener address", dir.clone(), source))?
            .port();
        let token = self.root.child_token();
        let app = Router::new().fallback_service(ServeDir::new(&dir).append_index_html_on_directories(true));

        let shutdown = token.clone();
        let task = tokio::spawn(async move {
            tracing::info!(submission_id, port, dir = %dir.display(), "Serving site");
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(submission_id, port, "Site listener failed: {e}");
            }
            tracing::info!(submission_id, port, "Site listener closed");
        });

        let previous = {
            let mut active = self.active.lock().await;
            let previous = active.insert(submission_id, ActiveSite { port, token, task });
            crate::metrics::active_sites(active.len());
            previous
        };
        if let Some(previous) = previous {
            tracing::warn!(submission_id, port = previous.port, "Replacing a listener that was still registered");
            close(submission_id, previous).await;
        }
        Ok(port)
    }

    /// Stop the listener for a submission and wait for the socket to close.
    /// Returns the port it was bound to.
    pub async fn stop(&self, submission_id: i64) -> Option<u16> {
        let site = {
            let mut active = self.active.lock().await;
            let site = active.remove(&submission_id);
            crate::metrics::active_sites(active.len());
            site
        }?;
        let port = site.port;
        close(submission_id, site).await;
        Some(port)
    }

    /// Stop every listener.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let sites: Vec<(i64, ActiveSite)> = self.active.lock().await.drain().collect();
        for (submission_id, site) in sites {
            close(submission_id, site).await;
        }
        crate::metrics::active_sites(0);
    }
}

async fn close(submission_id: i64, site: ActiveSite) {
    site.token.cancel();
    let abort = site.task.abort_handle();
    if tokio::time::timeout(DRAIN_TIMEOUT, site.task).await.is_err() {
        tracing::warn!(submission_id, port = site.port, "Listener did not drain in time, aborting");
        abort.abort();
    }
}
