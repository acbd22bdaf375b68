use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lapsecam_ops::JobReport;
use lapsecam_types::{frame::FrameInfo, LapseError};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::AppState;

const USAGE: &str = r#"/snapshot - returns a live snapshot that is refreshed at most once a minute
/timelapse - returns a timelapse for the current day which is refreshed every hour
  params
    range
      "" - the timelapse for the current day
      "complete" - a complete timelapse including all frames
      "2023-05-15" - the timelapse for the provided date
/status - cached frame, published lapses and recent job runs"#;

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    token: Option<String>,
    #[serde(default)]
    range: String,
}

/// Boundary view of a core error.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Core(LapseError),
}

impl From<LapseError> for ApiError {
    fn from(err: LapseError) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "bad token").into_response(),
            ApiError::Core(LapseError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "no data for date").into_response()
            }
            ApiError::Core(err @ LapseError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string()).into_response()
            }
            ApiError::Core(err) => {
                warn!("request failed: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

fn authorize(state: &AppState, query: &AccessQuery) -> Result<(), ApiError> {
    if state.authorized(query.token.as_deref()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

pub async fn root() -> &'static str {
    USAGE
}

pub async fn snapshot(
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Result<Response, ApiError> {
    authorize(&state, &query)?;
    let frame = state.cache.get_frame().await?;
    Ok((
        [(header::CONTENT_TYPE, "image/jpeg")],
        frame.into_payload(),
    )
        .into_response())
}

pub async fn timelapse(
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Result<Response, ApiError> {
    authorize(&state, &query)?;
    let reader = state.archive.open_lapse_key(&query.range).await?;
    let len = reader.len();
    // The reader keeps the archive's shared lock until the body is fully sent.
    let body = Body::from_stream(ReaderStream::new(reader));
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    cached_frame: Option<FrameInfo>,
    lapses: Vec<String>,
    jobs: Vec<JobReport>,
}

pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<StatusReport>, ApiError> {
    authorize(&state, &query)?;
    Ok(Json(StatusReport {
        cached_frame: state.cache.cached().await,
        lapses: state.archive.published_lapses().await?,
        jobs: state.jobs.recent().await,
    }))
}
