//! Camera-side acquisition service.
//!
//! Orchestrates the full capture pipeline:
//!
//! 1. [`CaptureDevice`] exposes and reads out one image.
//! 2. [`ImageCodec`] compresses it into a frame payload.
//! 3. The frame is published to the [`ImageSlot`] for streaming.
//! 4. Commanded sequences are additionally written to the archive.
//!
//! Between idle captures the [`ExposureEstimator`] retunes the
//! exposure; a commanded sequence pins exposure and binning until it
//! completes or a stop command cancels it. Control commands arrive
//! through the [`CommandSlot`] and are applied at most one per cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::ArchiveSink;
use crate::command::ControlCommand;
use crate::device::{CaptureDevice, RawImage};
use crate::error::SkycamError;
use crate::exposure::{
    BRIGHTNESS_TOLERANCE, ExposureEstimator, MAX_AUTO_EXPOSURE, TARGET_BRIGHTNESS,
};
use crate::frame::{Frame, ImageMetadata, timestamp_now_us};
use crate::image::ImageCodec;
use crate::slot::{CommandSlot, ImageSlot};

// ── AcquireConfig ────────────────────────────────────────────────

/// Configuration for [`AcquireService`].
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Idle time between capture cycles.
    pub poll_interval: Duration,
    /// Initial compression quality (0..=100).
    pub quality: u8,
    /// Initial binning factor.
    pub binning: u8,
    /// Exposure used before the controller has seen any data, seconds.
    pub initial_exposure: f64,
    /// Auto-exposure brightness target.
    pub target_brightness: f64,
    /// Auto-exposure dead-band half-width.
    pub tolerance: f64,
    /// Auto-exposure ceiling, seconds.
    pub max_exposure: f64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            quality: 70,
            binning: 1,
            initial_exposure: 0.1,
            target_brightness: TARGET_BRIGHTNESS,
            tolerance: BRIGHTNESS_TOLERANCE,
            max_exposure: MAX_AUTO_EXPOSURE,
        }
    }
}

// ── SequenceState ────────────────────────────────────────────────

/// A commanded exposure sequence in progress.
#[derive(Debug, Clone)]
struct SequenceState {
    /// Fixed exposure for every frame in the sequence, seconds.
    exposure: f64,
    /// Fixed binning for every frame in the sequence.
    binning: u8,
    /// Frames requested.
    count: u8,
    /// Frames captured so far (1-based once capturing).
    index: u8,
    /// Archive name prefix from the command.
    prefix: String,
    /// Which sequence this is since startup.
    set: u64,
}

impl SequenceState {
    /// Archive name for the frame at the current index.
    fn archive_name(&self) -> String {
        format!(
            "{}_set{}_{:.3}_{}_{}",
            self.prefix, self.set, self.exposure, self.index, self.count
        )
    }
}

// ── AcquireService ───────────────────────────────────────────────

/// Camera-side acquisition service.
///
/// # Lifetime
///
/// Call [`run`](Self::run) to start the capture loop. It runs until
/// the shutdown token is cancelled or the device fails to open.
pub struct AcquireService {
    device: Box<dyn CaptureDevice>,
    codec: Box<dyn ImageCodec>,
    archive: Option<Box<dyn ArchiveSink>>,
    estimator: ExposureEstimator,
    frames: Arc<ImageSlot>,
    commands: Arc<CommandSlot>,
    shutdown: CancellationToken,
    config: AcquireConfig,
    /// Exposure for idle streaming captures, retuned by the estimator.
    exposure: f64,
    /// Binning for idle streaming captures; tracks the last command.
    binning: u8,
    /// Compression quality; tracks the last command.
    quality: u8,
    /// Last successfully read sensor temperature.
    last_temperature: f32,
    sequence: Option<SequenceState>,
    sets_started: u64,
    frames_captured: u64,
    frames_dropped: u64,
}

impl AcquireService {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        codec: Box<dyn ImageCodec>,
        frames: Arc<ImageSlot>,
        commands: Arc<CommandSlot>,
        shutdown: CancellationToken,
        config: AcquireConfig,
    ) -> Self {
        let estimator = ExposureEstimator::new()
            .with_target(config.target_brightness)
            .with_tolerance(config.tolerance)
            .with_max_exposure(config.max_exposure);

        Self {
            device,
            codec,
            archive: None,
            estimator,
            frames,
            commands,
            shutdown,
            exposure: config.initial_exposure,
            binning: config.binning,
            quality: config.quality,
            config,
            last_temperature: 0.0,
            sequence: None,
            sets_started: 0,
            frames_captured: 0,
            frames_dropped: 0,
        }
    }

    /// Attach an archive for commanded sequences.
    pub fn with_archive(mut self, archive: Box<dyn ArchiveSink>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Frames published since startup.
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Frames replaced in the slot before anyone consumed them.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Exposure sequences started since startup.
    pub fn sets_started(&self) -> u64 {
        self.sets_started
    }

    /// Current idle-streaming exposure, seconds.
    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    /// Whether a commanded sequence is in progress.
    pub fn is_sequencing(&self) -> bool {
        self.sequence.is_some()
    }

    /// Run the acquisition loop.
    ///
    /// This is intended to be spawned on the Tokio runtime:
    ///
    /// ```no_run
    /// # use skycam_core::acquire::AcquireService;
    /// # async fn example(mut svc: AcquireService, token: tokio_util::sync::CancellationToken) {
    /// tokio::spawn(async move { svc.run().await });
    /// // … later …
    /// token.cancel();
    /// # }
    /// ```
    pub async fn run(&mut self) -> Result<(), SkycamError> {
        self.device.open().await?;
        let caps = self.device.capabilities();
        info!(
            sensor_width = caps.sensor_width,
            sensor_height = caps.sensor_height,
            exposure = self.exposure,
            binning = self.binning,
            "acquisition loop started"
        );

        while !self.shutdown.is_cancelled() {
            let loop_start = Instant::now();
            self.cycle().await;
            Self::pace(loop_start, self.config.poll_interval).await;
        }

        self.device.close().await?;
        info!(
            frames = self.frames_captured,
            dropped = self.frames_dropped,
            sets = self.sets_started,
            "acquisition loop stopped"
        );
        Ok(())
    }

    /// One capture cycle.
    async fn cycle(&mut self) {
        // 1. Apply at most one pending control command.
        if let Some(cmd) = self.commands.try_consume() {
            self.apply_command(&cmd);
        }

        if let Some(mut seq) = self.sequence.take() {
            // 2a. Commanded sequence: capture at the pinned settings.
            seq.index += 1;
            let Some(image) = self.capture(seq.exposure, seq.binning).await else {
                // Retry this index next cycle; cancellation breaks the
                // outer loop before that happens.
                seq.index -= 1;
                self.sequence = Some(seq);
                return;
            };

            let meta = self.stamp_meta(&image, seq.exposure, seq.binning, Some(&seq)).await;

            // 3. Publish to the streaming slot.
            self.publish_frame(&image, meta);

            // 4. Archive the commanded capture.
            if let Some(archive) = &self.archive {
                let name = seq.archive_name();
                if let Err(e) =
                    archive.write(&image.pixels, image.width, image.height, &meta, &name)
                {
                    warn!(error = %e, name, "archive write failed");
                }
            }

            if seq.index < seq.count {
                self.sequence = Some(seq);
            } else {
                info!(set = seq.set, count = seq.count, "exposure sequence complete");
            }
        } else {
            // 2b. Idle streaming capture.
            let (exposure, binning) = (self.exposure, self.binning);
            let Some(image) = self.capture(exposure, binning).await else {
                return;
            };

            let meta = self.stamp_meta(&image, exposure, binning, None).await;

            // 3. Publish to the streaming slot.
            self.publish_frame(&image, meta);

            // 5. Retune the exposure while nobody has pinned it.
            let floor = self.device.capabilities().min_exposure;
            let next = self.estimator.next_exposure(&image.pixels, exposure).max(floor);
            if next != exposure {
                debug!(from = exposure, to = next, "auto exposure adjusted");
                self.exposure = next;
            }
        }
    }

    /// Apply one control command to the live state.
    fn apply_command(&mut self, cmd: &ControlCommand) {
        // Quality and binning take effect immediately, sequence or not.
        self.quality = cmd.quality;
        self.binning = cmd.binning;

        if cmd.start && self.sequence.is_none() {
            let caps = self.device.capabilities();
            let exposure = cmd.exposure.clamp(caps.min_exposure, caps.max_exposure);
            let binning = cmd.binning.clamp(1, caps.max_binning);
            self.sets_started += 1;
            info!(
                set = self.sets_started,
                count = cmd.count,
                exposure,
                binning,
                prefix = %cmd.prefix_str(),
                "exposure sequence started"
            );
            self.sequence = Some(SequenceState {
                exposure,
                binning,
                count: cmd.count,
                index: 0,
                prefix: cmd.prefix_str(),
                set: self.sets_started,
            });
        } else if cmd.stop && self.sequence.is_some() {
            if let Some(seq) = self.sequence.take() {
                info!(set = seq.set, captured = seq.index, "exposure sequence stopped");
            }
        }
    }

    /// Capture one image, giving up promptly on shutdown.
    async fn capture(&mut self, exposure: f64, binning: u8) -> Option<RawImage> {
        let token = self.shutdown.clone();
        tokio::select! {
            res = self.device.snap(exposure, binning) => match res {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(error = %e, "capture failed");
                    None
                }
            },
            _ = token.cancelled() => None,
        }
    }

    /// Metadata for a fresh capture. `payload_size` is stamped with
    /// the raw pixel byte count; framing replaces it with the encoded
    /// size when the frame goes on the wire.
    async fn stamp_meta(
        &mut self,
        image: &RawImage,
        exposure: f64,
        binning: u8,
        seq: Option<&SequenceState>,
    ) -> ImageMetadata {
        match self.device.temperature().await {
            Ok(t) => self.last_temperature = t,
            Err(e) => warn!(error = %e, "temperature read failed"),
        }

        ImageMetadata {
            width: image.width,
            height: image.height,
            temperature: self.last_temperature,
            exposure: exposure as f32,
            timestamp_us: timestamp_now_us(),
            exposing: seq.is_some(),
            exposures_requested: seq.map_or(0, |s| s.count),
            exposure_index: seq.map_or(0, |s| s.index),
            quality: self.quality,
            binning,
            payload_size: (image.pixels.len() * 2) as i32,
        }
    }

    /// Compress and publish one frame; a stale unconsumed frame is
    /// replaced, never queued behind.
    fn publish_frame(&mut self, image: &RawImage, meta: ImageMetadata) {
        match self
            .codec
            .encode(&image.pixels, image.width, image.height, meta.quality)
        {
            Ok(payload) => {
                if self.frames.publish(Frame::new(meta, payload)) {
                    self.frames_dropped += 1;
                    debug!("replaced unconsumed frame");
                }
                self.frames_captured += 1;
            }
            Err(e) => warn!(error = %e, "payload encode failed; frame skipped"),
        }
    }

    /// Sleep for the remainder of the poll interval.
    async fn pace(loop_start: Instant, interval: Duration) {
        let elapsed = loop_start.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
