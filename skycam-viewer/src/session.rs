//! Frame consumption loop.
//!
//! [`run_session`] drains the client's latest-wins slot until the
//! connection drops or shutdown is requested, optionally decoding each
//! frame to disk through a [`FrameSink`], and logs receive statistics
//! at a configured interval.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skycam_core::{
    ArchiveSink, FlatFileArchive, Frame, ImageCodec, SkycamError, ViewerClient, ZstdImageCodec,
};

/// How often the loop checks the slot when no frame is pending.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ── FrameSink ────────────────────────────────────────────────────

/// Decodes received frames back to pixels and archives them.
pub struct FrameSink {
    codec: ZstdImageCodec,
    archive: FlatFileArchive,
    saved: u64,
}

impl FrameSink {
    /// Open a sink writing into `dir`.
    pub fn new(dir: &str) -> Result<Self, SkycamError> {
        Ok(Self {
            codec: ZstdImageCodec::new(),
            archive: FlatFileArchive::new(dir)?,
            saved: 0,
        })
    }

    /// Frames written so far.
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// Decode one frame and write it out, returning the pixel file path.
    pub fn handle(&mut self, frame: &Frame) -> Result<PathBuf, SkycamError> {
        let image = self.codec.decode(&frame.payload)?;
        let name = format!("recv_{}_{}", frame.meta.timestamp_us, self.saved);
        let path = self
            .archive
            .write(&image.pixels, image.width, image.height, &frame.meta, &name)?;
        self.saved += 1;
        Ok(path)
    }
}

// ── Session loop ─────────────────────────────────────────────────

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSummary {
    /// Frames taken from the slot.
    pub frames_handled: u64,
    /// Frames decoded and written to disk.
    pub frames_saved: u64,
}

/// Consume frames until the connection drops or `token` is cancelled.
pub async fn run_session(
    client: &ViewerClient,
    sink: &mut Option<FrameSink>,
    stats_interval: Duration,
    token: &CancellationToken,
) -> SessionSummary {
    let frames = client.frames();
    let stats_rx = client.stats();
    let mut summary = SessionSummary::default();
    let mut last_stats = Instant::now();

    while !token.is_cancelled() {
        if let Some(frame) = frames.try_consume() {
            summary.frames_handled += 1;
            debug!(
                width = frame.meta.width,
                height = frame.meta.height,
                exposure = frame.meta.exposure,
                payload = frame.payload.len(),
                "frame received"
            );
            if let Some(sink) = sink.as_mut() {
                match sink.handle(&frame) {
                    Ok(path) => {
                        summary.frames_saved += 1;
                        debug!(path = %path.display(), "frame saved");
                    }
                    Err(e) => warn!(error = %e, "frame save failed"),
                }
            }
        } else if !client.is_connected() {
            warn!("server connection lost");
            break;
        } else {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if last_stats.elapsed() >= stats_interval {
            let stats = stats_rx.borrow().clone();
            match stats.last_meta {
                Some(meta) => info!(
                    frames = stats.frames_received,
                    bytes = stats.bytes_received,
                    width = meta.width,
                    height = meta.height,
                    exposure = meta.exposure,
                    temperature = meta.temperature,
                    "receive statistics"
                ),
                None => info!("no frames received yet"),
            }
            last_stats = Instant::now();
        }
    }

    summary
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use skycam_core::{CommandSlot, ImageMetadata, ImageSlot, StreamServer, StreamServerConfig};

    fn encoded_frame(pixels: &[u16], width: u32, height: u32) -> Frame {
        let payload = ZstdImageCodec::new()
            .encode(pixels, width, height, 70)
            .unwrap();
        let meta = ImageMetadata {
            width,
            height,
            temperature: -8.5,
            exposure: 0.25,
            timestamp_us: 4242,
            exposing: false,
            exposures_requested: 0,
            exposure_index: 0,
            quality: 70,
            binning: 1,
            payload_size: 0,
        };
        Frame::new(meta, payload)
    }

    #[test]
    fn sink_decodes_and_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FrameSink::new(tmp.path().to_str().unwrap()).unwrap();

        let frame = encoded_frame(&[100, 200, 300, 400], 2, 2);
        let path = sink.handle(&frame).unwrap();

        assert_eq!(path, tmp.path().join("recv_4242_0.raw"));
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, vec![100, 0, 200, 0, 44, 1, 144, 1]);
        assert!(tmp.path().join("recv_4242_0.json").is_file());
        assert_eq!(sink.saved(), 1);
    }

    #[test]
    fn sink_rejects_garbage_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FrameSink::new(tmp.path().to_str().unwrap()).unwrap();

        let mut frame = encoded_frame(&[1, 2, 3, 4], 2, 2);
        frame.payload = vec![0xDE, 0xAD, 0xBE, 0xEF];

        assert!(sink.handle(&frame).is_err());
        assert_eq!(sink.saved(), 0);
    }

    #[tokio::test]
    async fn session_saves_streamed_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let root = CancellationToken::new();
        // Separate token so ending the session does not tear down the
        // connection underneath the client's receive loop.
        let session_token = CancellationToken::new();

        let frames = Arc::new(ImageSlot::new());
        let commands = Arc::new(CommandSlot::new());
        let config = StreamServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            send_interval: Duration::from_millis(5),
        };
        let mut server = StreamServer::bind(
            &config,
            Arc::clone(&frames),
            Arc::clone(&commands),
            root.clone(),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(async move { server.run().await });

        // Keep the slot topped up so the ticker always finds a frame.
        let publisher_token = root.clone();
        let publisher = tokio::spawn(async move {
            while !publisher_token.is_cancelled() {
                frames.publish(encoded_frame(&[10, 20, 30, 40], 2, 2));
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let client = ViewerClient::connect(addr, Duration::from_secs(1), &root)
            .await
            .unwrap();
        let mut sink = Some(FrameSink::new(tmp.path().to_str().unwrap()).unwrap());

        let stop = tokio::spawn({
            let session_token = session_token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                session_token.cancel();
            }
        });

        let summary =
            run_session(&client, &mut sink, Duration::from_secs(5), &session_token).await;

        assert!(summary.frames_handled > 0);
        assert_eq!(summary.frames_handled, summary.frames_saved);
        let saved = std::fs::read_dir(tmp.path()).unwrap().count();
        assert!(saved >= 2, "expected raw+sidecar pairs, found {saved}");

        client.shutdown().await.unwrap();
        root.cancel();
        stop.await.unwrap();
        publisher.await.unwrap();
        server_task.await.unwrap().unwrap();
    }
}
