//! MJPEG streaming responder
//!
//! Every HTTP client gets its own responder task. It samples the newest
//! frame at a fixed cadence, encodes it and hands one multipart part at a
//! time to the response body.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::FrameSource;
use crate::utils::LogThrottler;
use crate::video::encoder::JpegEncoder;

/// Client ID type (UUID string)
pub type ClientId = String;

/// Per-client session information
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: ClientId,
    pub connected_at: Instant,
    pub frames_sent: u64,
}

impl ClientSession {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            frames_sent: 0,
        }
    }

    pub fn connected_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Connected MJPEG clients
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientSession>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn register_client(&self, client_id: ClientId) {
        let count = {
            let mut clients = self.clients.write();
            clients.insert(client_id.clone(), ClientSession::new(client_id.clone()));
            clients.len()
        };
        info!("Client {} connected (total: {})", client_id, count);
    }

    pub fn unregister_client(&self, client_id: &str) {
        if let Some(session) = self.clients.write().remove(client_id) {
            let duration_secs = session.connected_duration().as_secs_f32();
            let avg_fps = if duration_secs > 0.1 {
                session.frames_sent as f32 / duration_secs
            } else {
                0.0
            };
            info!(
                "Client {} disconnected after {:.1}s ({} frames, {:.1} avg FPS)",
                client_id, duration_secs, session.frames_sent, avg_fps
            );
        }
    }

    pub fn record_frame_sent(&self, client_id: &str) {
        if let Some(session) = self.clients.write().get_mut(client_id) {
            session.frames_sent += 1;
        }
    }

    pub fn frames_sent(&self, client_id: &str) -> Option<u64> {
        self.clients.read().get(client_id).map(|s| s.frames_sent)
    }

    /// Parts delivered to the clients connected right now
    pub fn total_frames_sent(&self) -> u64 {
        self.clients.read().values().map(|s| s.frames_sent).sum()
    }
}

/// RAII guard for client lifecycle management
/// Ensures cleanup even on panic or abrupt disconnection
pub struct ClientGuard {
    client_id: ClientId,
    registry: Arc<ClientRegistry>,
}

impl ClientGuard {
    pub fn new(client_id: ClientId, registry: Arc<ClientRegistry>) -> Self {
        registry.register_client(client_id.clone());
        Self {
            client_id,
            registry,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn record_frame_sent(&self) {
        self.registry.record_frame_sent(&self.client_id);
    }

    pub fn frames_sent(&self) -> u64 {
        self.registry.frames_sent(&self.client_id).unwrap_or(0)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.unregister_client(&self.client_id);
    }
}

/// Create MJPEG multipart frame bytes
pub fn create_mjpeg_part(boundary: &str, jpeg_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + jpeg_data.len());

    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", jpeg_data.len()).as_bytes());
    buf.put_slice(b"\r\n");

    buf.put_slice(jpeg_data);
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// Last part this responder produced, keyed by the frame it came from
struct LastPart {
    generation: u64,
    sequence: u64,
    part: Bytes,
}

/// Per-client frame pump
pub struct MjpegResponder {
    source: Arc<dyn FrameSource>,
    encoder: JpegEncoder,
    frame_interval: Duration,
    boundary: String,
    throttler: LogThrottler,
    last: Option<LastPart>,
}

impl MjpegResponder {
    pub fn new(
        source: Arc<dyn FrameSource>,
        encoder: JpegEncoder,
        frame_interval: Duration,
        boundary: impl Into<String>,
    ) -> Self {
        Self {
            source,
            encoder,
            frame_interval,
            boundary: boundary.into(),
            throttler: LogThrottler::with_secs(5),
            last: None,
        }
    }

    /// Encode the newest frame into a multipart part.
    ///
    /// Returns None when there is no frame yet or encoding failed; the tick
    /// is then skipped. An unchanged frame reuses this client's previous
    /// encoding.
    fn next_part(&mut self) -> Option<Bytes> {
        let frame = self.source.latest_frame()?;

        if let Some(last) = &self.last {
            if last.generation == frame.generation && last.sequence == frame.sequence {
                return Some(last.part.clone());
            }
        }

        match self.encoder.encode(&frame) {
            Ok(jpeg) => {
                let part = create_mjpeg_part(&self.boundary, &jpeg);
                self.last = Some(LastPart {
                    generation: frame.generation,
                    sequence: frame.sequence,
                    part: part.clone(),
                });
                Some(part)
            }
            Err(e) => {
                if let Some(suppressed) = self.throttler.check("encode") {
                    warn!(
                        "Skipping frame from camera {}: {} (suppressed {} repeats)",
                        frame.device_id, e, suppressed
                    );
                }
                None
            }
        }
    }

    /// Pump parts into `tx` until the receiving side goes away or the
    /// source closes.
    ///
    /// `send` waits while the previous part is still unconsumed, so a slow
    /// client only slows itself down.
    pub async fn run(mut self, tx: mpsc::Sender<Bytes>) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tx.closed() => break,
            }
            if self.source.is_closed() {
                break;
            }

            let Some(part) = self.next_part() else {
                continue;
            };
            if tx.send(part).await.is_err() {
                break;
            }
        }

        debug!("MJPEG responder finished");
    }
}
