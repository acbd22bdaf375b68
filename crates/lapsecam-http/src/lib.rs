//! HTTP boundary: snapshot, lapse download and status endpoints.

use std::{net::SocketAddr, sync::Arc};

use axum::{routing::get, Router};
use lapsecam_archive::ArchivePipeline;
use lapsecam_camera::FrameCache;
use lapsecam_ops::JobLog;
use tracing::info;

mod handlers;

pub use handlers::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FrameCache>,
    pub archive: Arc<ArchivePipeline>,
    pub jobs: JobLog,
    /// Shared secret compared verbatim against `?token=`; `None` accepts every request.
    pub token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        cache: Arc<FrameCache>,
        archive: Arc<ArchivePipeline>,
        jobs: JobLog,
        token: Option<String>,
    ) -> Self {
        Self {
            cache,
            archive,
            jobs,
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    pub(crate) fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.token {
            Some(expected) => presented == Some(expected.as_ref()),
            None => true,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/snapshot", get(handlers::snapshot))
        .route("/timelapse", get(handlers::timelapse))
        .route("/status", get(handlers::status))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(state);

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
