use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stream::{ClientGuard, FrameSource, MjpegResponder};
use crate::video::{JpegEncoder, SessionInfo, SessionState};
use crate::web::index::{self, IndexPage};

// ============================================================================
// Index
// ============================================================================

pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let session = state.session.info();
    Html(index::render(&IndexPage {
        title: &state.config.web.title,
        devices: &state.devices,
        session: &session,
        quality: state.config.video.jpeg_quality,
    }))
}

// ============================================================================
// Camera control
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CameraQuery {
    pub id: Option<String>,
}

/// Switch the active camera
///
/// `GET /api/camera?id=<int>` answers `OK` once the switch is done.
pub async fn camera_switch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CameraQuery>,
) -> Result<&'static str> {
    let raw = query
        .id
        .ok_or_else(|| AppError::BadRequest("missing camera id".to_string()))?;
    let id: u32 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid camera id '{}'", raw)))?;

    if !state.devices.contains_key(&id) {
        return Err(AppError::NotFound(format!("camera {}", id)));
    }

    state.session.switch_device(id).await?;
    Ok("OK")
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: SessionInfo,
    pub device_name: Option<String>,
    pub quality: u32,
    pub clients: usize,
    pub frames_sent: u64,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let session = state.session.info();
    Json(StatusResponse {
        device_name: state.device_name(session.device_id).map(str::to_string),
        session,
        quality: state.config.video.jpeg_quality,
        clients: state.clients.client_count(),
        frames_sent: state.clients.total_frames_sent(),
    })
}

// ============================================================================
// MJPEG stream
// ============================================================================

/// Multipart MJPEG stream
///
/// One responder task per request. The task ends as soon as the response
/// body is dropped, which is how a client disconnect shows up here.
pub async fn mjpeg_stream(State(state): State<Arc<AppState>>) -> Result<Response> {
    if state.session.state() == SessionState::Closed {
        return Err(AppError::ServiceUnavailable(
            "stream session is closed".to_string(),
        ));
    }

    let video = &state.config.video;
    let stream = &state.config.stream;
    let encoder = JpegEncoder::new(video.jpeg_quality, video.jpeg_optimize)?;

    let client_id = uuid::Uuid::new_v4().to_string();
    let guard = ClientGuard::new(client_id, state.clients.clone());

    // Capacity 1: the responder waits until the previous part is taken
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Bytes>(1);
    let source: Arc<dyn FrameSource> = state.session.clone();
    let responder =
        MjpegResponder::new(source, encoder, stream.frame_interval(), stream.boundary.clone());
    tokio::spawn(responder.run(tx));

    let body_stream = async_stream::stream! {
        while let Some(data) = rx.recv().await {
            // Counted before handing it over; the next poll may never come
            guard.record_frame_sent();
            yield Ok::<Bytes, std::io::Error>(data);
        }
        info!(
            "MJPEG stream for client {} closed after {} frames",
            guard.id(),
            guard.frames_sent()
        );
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", stream.boundary),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "close")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("failed to build stream response: {}", e)))
}

/// Fallback for unknown paths
pub async fn not_found() -> impl IntoResponse {
    AppError::NotFound("no such page".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::video::catalog::DeviceCatalog;
    use crate::video::testing::{FakeCatalog, FakeOpener};
    use crate::video::{Resolution, StreamSession};
    use std::time::Duration;

    async fn test_state(opener: &FakeOpener) -> Arc<AppState> {
        let catalog = FakeCatalog::new()
            .with_device(0, "Integrated", &[Resolution::new(32, 24)])
            .with_device(2, "USB", &[Resolution::new(16, 12)]);
        let devices = catalog.list_devices();

        let mut config = AppConfig::default();
        config.video.settle_delay_ms = 5;
        config.stream.frame_interval_ms = 10;

        let session = Arc::new(StreamSession::new(
            Arc::new(opener.clone()),
            Arc::new(catalog),
            config.video.clone(),
        ));
        session.start(0).await.unwrap();
        AppState::new(Arc::new(config), session, devices)
    }

    fn query(id: Option<&str>) -> Query<CameraQuery> {
        Query(CameraQuery {
            id: id.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_camera_switch() {
        let opener = FakeOpener::new();
        let state = test_state(&opener).await;

        let body = camera_switch(State(state.clone()), query(Some("2")))
            .await
            .unwrap();
        assert_eq!(body, "OK");
        assert_eq!(state.session.device_id(), 2);

        state.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_camera_switch_rejects_bad_ids() {
        let opener = FakeOpener::new();
        let state = test_state(&opener).await;

        for id in [None, Some("abc"), Some("-1")] {
            let err = camera_switch(State(state.clone()), query(id))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }

        let err = camera_switch(State(state.clone()), query(Some("9")))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(state.session.device_id(), 0);

        state.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_camera_switch_failure_is_unavailable() {
        let opener = FakeOpener::new();
        let state = test_state(&opener).await;
        opener.set_failing(2, true);

        let err = camera_switch(State(state.clone()), query(Some("2")))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.session.state(), SessionState::Opening);

        state.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_status() {
        let opener = FakeOpener::new();
        let state = test_state(&opener).await;

        let Json(status) = status(State(state.clone())).await;
        assert_eq!(status.session.device_id, 0);
        assert_eq!(status.device_name.as_deref(), Some("Integrated"));
        assert_eq!(status.quality, 85);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "streaming");
        assert_eq!(json["width"], 32);
        assert_eq!(json["clients"], 0);
        assert_eq!(json["frames_sent"], 0);

        state.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_mjpeg_stream_headers_and_client_lifecycle() {
        let opener = FakeOpener::new();
        let state = test_state(&opener).await;

        let response = mjpeg_stream(State(state.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "close");
        assert_eq!(state.clients.client_count(), 1);

        // Dropping the body is what a disconnect looks like
        drop(response);
        for _ in 0..50 {
            if state.clients.client_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(state.clients.client_count(), 0);

        state.session.shutdown().await;
        assert!(mjpeg_stream(State(state.clone())).await.is_err());
    }

    #[tokio::test]
    async fn test_mjpeg_stream_counts_each_delivered_part() {
        use axum::body::HttpBody;
        use std::pin::Pin;

        let opener = FakeOpener::new();
        let state = test_state(&opener).await;

        let mut body = mjpeg_stream(State(state.clone())).await.unwrap().into_body();
        let frame = tokio::time::timeout(
            Duration::from_secs(2),
            std::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)),
        )
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        let part = frame.into_data().unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));

        // The part just received is already counted without polling again
        assert_eq!(state.clients.client_count(), 1);
        assert_eq!(state.clients.total_frames_sent(), 1);

        drop(body);
        state.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_index_lists_devices() {
        let opener = FakeOpener::new();
        let state = test_state(&opener).await;

        let Html(html) = index(State(state.clone())).await;
        assert!(html.contains("Webcam Streamer"));
        assert!(html.contains(r#"<option value="0" selected>Integrated</option>"#));
        assert!(html.contains(r#"<option value="2">USB</option>"#));

        state.session.shutdown().await;
    }
}
