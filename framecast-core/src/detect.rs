//! Throttled code detection over the live frame stream.
//!
//! [`DetectionThrottle`] subscribes to the hub and feeds frames to an
//! external [`CodeDetector`] with at most one run in flight. While a
//! run is busy, arriving frames are dropped outright — never queued —
//! so an expensive detector cannot build backlog against a live
//! camera. A fixed cooldown after each run caps the maximum detection
//! rate independent of detector latency.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CastError;
use crate::hub::{SharedFrame, Subscription};
use crate::types::{DecodedImage, PixelRect};

/// Padding applied around raw detector bounds, in pixels.
pub const DETECTION_PADDING: i32 = 25;

/// Cooldown between detection runs.
pub const DETECTION_COOLDOWN: Duration = Duration::from_millis(25);

// ── Detections ───────────────────────────────────────────────────

/// One region-of-interest as reported by the external detector,
/// before padding and bounds validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub bounds: PixelRect,
    pub confidence: f32,
}

/// A validated detection: bounds are padded and guaranteed to lie
/// entirely inside the source frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub bounds: PixelRect,
    pub confidence: f32,
}

/// All detections from one run, tied to exactly one frame.
///
/// Published as a single atomic batch (possibly empty); consumers
/// never observe a mix of two frames' detections.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub frame: SharedFrame,
    pub detections: Vec<Detection>,
}

/// Expand each raw detection by `padding` on every side and keep only
/// those that still fit inside a `width` × `height` frame.
///
/// Candidates that would fall outside after padding are dropped, never
/// clamped — a clipped region decodes unreliably.
pub fn pad_and_validate(
    raw: &[RawDetection],
    width: u32,
    height: u32,
    padding: i32,
) -> Vec<Detection> {
    raw.iter()
        .filter_map(|r| {
            let left = r.bounds.x - padding;
            let top = r.bounds.y - padding;
            let right = r.bounds.x + r.bounds.width as i32 + padding;
            let bottom = r.bounds.y + r.bounds.height as i32 + padding;

            let padded = PixelRect::new(
                left,
                top,
                (right - left).max(0) as u32,
                (bottom - top).max(0) as u32,
            );
            padded.fits_within(width, height).then(|| Detection {
                label: r.label.clone(),
                bounds: padded,
                confidence: r.confidence,
            })
        })
        .collect()
}

// ── CodeDetector ─────────────────────────────────────────────────

/// External object-detection capability (e.g. a YOLO model).
///
/// Invoked asynchronously; may be slow and may fail. The throttle
/// treats a failure as a run with zero detections.
#[async_trait]
pub trait CodeDetector: Send + Sync {
    async fn detect(&self, image: &DecodedImage) -> Result<Vec<RawDetection>, CastError>;
}

// ── ThrottleConfig ───────────────────────────────────────────────

/// Tuning knobs for [`DetectionThrottle`].
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Padding applied around raw bounds.
    pub padding: i32,
    /// Minimum gap between the end of one run and the start of the
    /// next.
    pub cooldown: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            padding: DETECTION_PADDING,
            cooldown: DETECTION_COOLDOWN,
        }
    }
}

// ── DetectionThrottle ────────────────────────────────────────────

/// One-in-flight admission gate in front of an external detector.
///
/// The gate is a single atomic test-and-set: a frame either acquires
/// it and starts a run, or is dropped. Batches are published through a
/// `watch` channel, so consumers always see the latest batch and a
/// superseded batch is simply gone.
pub struct DetectionThrottle {
    gate: Arc<AtomicBool>,
    frames_dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
    batch_rx: watch::Receiver<Option<DetectionBatch>>,
}

impl DetectionThrottle {
    /// Spawn the intake loop over a hub subscription.
    pub fn spawn(
        detector: Arc<dyn CodeDetector>,
        frames: Subscription,
        config: ThrottleConfig,
    ) -> Self {
        let gate = Arc::new(AtomicBool::new(false));
        let frames_dropped = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let (batch_tx, batch_rx) = watch::channel(None);

        tokio::spawn(intake(
            detector,
            frames,
            config,
            Arc::clone(&gate),
            Arc::clone(&frames_dropped),
            cancel.clone(),
            batch_tx,
        ));

        Self {
            gate,
            frames_dropped,
            cancel,
            batch_rx,
        }
    }

    /// Receiver for the latest detection batch.
    pub fn batches(&self) -> watch::Receiver<Option<DetectionBatch>> {
        self.batch_rx.clone()
    }

    /// Frames dropped at the gate so far.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Whether a detection run is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.gate.load(Ordering::Acquire)
    }

    /// Stop accepting frames and wait — bounded by `grace` — for any
    /// in-flight run to finish.
    ///
    /// A run that outlives the grace period is abandoned rather than
    /// awaited; it still releases the gate if it ever completes.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();

        let deadline = Instant::now() + grace;
        while self.gate.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                tracing::warn!("detector run still in flight at shutdown; abandoning");
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ── Loops ────────────────────────────────────────────────────────

async fn intake(
    detector: Arc<dyn CodeDetector>,
    mut frames: Subscription,
    config: ThrottleConfig,
    gate: Arc<AtomicBool>,
    frames_dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
    batch_tx: watch::Sender<Option<DetectionBatch>>,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            f = frames.recv() => f,
        };
        let Some(frame) = frame else { break };

        // Single test-and-set admission: busy means drop, not wait.
        if gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            frames_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        tokio::spawn(run(
            Arc::clone(&detector),
            frame,
            config.clone(),
            Arc::clone(&gate),
            batch_tx.clone(),
        ));
    }
}

/// One detection run: detect, pad/validate, publish, cool down,
/// release the gate. Every exit path releases the gate.
async fn run(
    detector: Arc<dyn CodeDetector>,
    frame: SharedFrame,
    config: ThrottleConfig,
    gate: Arc<AtomicBool>,
    batch_tx: watch::Sender<Option<DetectionBatch>>,
) {
    let detect_frame = Arc::clone(&frame);
    let handle =
        tokio::spawn(async move { detector.detect(&detect_frame.image).await });

    let raw = match handle.await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            tracing::warn!("detector failed: {e}");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("detector panicked: {e}");
            Vec::new()
        }
    };

    let detections = pad_and_validate(&raw, frame.image.width, frame.image.height, config.padding);
    let _ = batch_tx.send(Some(DetectionBatch { frame, detections }));

    tokio::time::sleep(config.cooldown).await;
    gate.store(false, Ordering::Release);
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HubFrame;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn raw(x: i32, y: i32, w: u32, h: u32) -> RawDetection {
        RawDetection {
            label: "barcode".into(),
            bounds: PixelRect::new(x, y, w, h),
            confidence: 0.9,
        }
    }

    fn blank_frame(width: u32, height: u32) -> SharedFrame {
        let data = vec![0u8; (width * height * 4) as usize];
        Arc::new(HubFrame {
            payload: Bytes::new(),
            image: DecodedImage::from_rgba8(width, height, data).unwrap(),
        })
    }

    // ── pad_and_validate ─────────────────────────────────────────

    #[test]
    fn padding_expands_bounds() {
        let out = pad_and_validate(&[raw(50, 50, 50, 50)], 200, 200, 25);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bounds, PixelRect::new(25, 25, 100, 100));
        assert_eq!(out[0].label, "barcode");
    }

    #[test]
    fn out_of_frame_candidates_dropped_never_clamped() {
        // Padded left edge would be -15.
        let near_left = raw(10, 50, 20, 20);
        // Padded bottom edge would be 205 > 200.
        let near_bottom = raw(50, 160, 20, 20);
        let inside = raw(100, 100, 20, 20);

        let out = pad_and_validate(&[near_left, near_bottom, inside], 200, 200, 25);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bounds, PixelRect::new(75, 75, 70, 70));
    }

    #[test]
    fn exact_fit_after_padding_is_kept() {
        let out = pad_and_validate(&[raw(25, 25, 150, 150)], 200, 200, 25);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bounds, PixelRect::new(0, 0, 200, 200));
    }

    #[test]
    fn empty_input_empty_output() {
        assert!(pad_and_validate(&[], 100, 100, 25).is_empty());
    }

    // ── Throttle ─────────────────────────────────────────────────

    struct SlowDetector {
        invocations: Arc<AtomicUsize>,
        latency: Duration,
        result: Vec<RawDetection>,
    }

    #[async_trait]
    impl CodeDetector for SlowDetector {
        async fn detect(&self, _image: &DecodedImage) -> Result<Vec<RawDetection>, CastError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Ok(self.result.clone())
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl CodeDetector for FailingDetector {
        async fn detect(&self, _image: &DecodedImage) -> Result<Vec<RawDetection>, CastError> {
            Err(CastError::DetectorFailure("model exploded".into()))
        }
    }

    fn throttle_with(
        detector: Arc<dyn CodeDetector>,
        cooldown: Duration,
    ) -> (DetectionThrottle, mpsc::Sender<SharedFrame>) {
        let (tx, rx) = mpsc::channel(32);
        let throttle = DetectionThrottle::spawn(
            detector,
            Subscription::from_receiver(rx),
            ThrottleConfig {
                padding: 25,
                cooldown,
            },
        );
        (throttle, tx)
    }

    #[tokio::test]
    async fn burst_invokes_detector_at_most_once() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let detector = Arc::new(SlowDetector {
            invocations: Arc::clone(&invocations),
            latency: Duration::from_millis(200),
            result: Vec::new(),
        });
        let (throttle, tx) = throttle_with(detector, Duration::from_millis(25));

        for _ in 0..5 {
            tx.send(blank_frame(64, 64)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(throttle.frames_dropped(), 4);
        assert!(throttle.is_busy());
    }

    #[tokio::test]
    async fn gate_reopens_after_run_and_cooldown() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let detector = Arc::new(SlowDetector {
            invocations: Arc::clone(&invocations),
            latency: Duration::from_millis(10),
            result: vec![raw(50, 50, 50, 50)],
        });
        let (throttle, tx) = throttle_with(detector, Duration::from_millis(10));
        let mut batches = throttle.batches();

        tx.send(blank_frame(200, 200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(blank_frame(200, 200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 2);

        let batch = batches.borrow_and_update().clone().unwrap();
        assert_eq!(batch.detections.len(), 1);
        assert_eq!(batch.detections[0].bounds, PixelRect::new(25, 25, 100, 100));
        assert_eq!(batch.frame.image.width, 200);
    }

    #[tokio::test]
    async fn failing_detector_publishes_empty_batch_and_releases_gate() {
        let (throttle, tx) = throttle_with(Arc::new(FailingDetector), Duration::from_millis(5));
        let mut batches = throttle.batches();

        tx.send(blank_frame(64, 64)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batch = batches.borrow_and_update().clone().unwrap();
        assert!(batch.detections.is_empty());
        assert!(!throttle.is_busy());
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_run() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let detector = Arc::new(SlowDetector {
            invocations,
            latency: Duration::from_millis(30),
            result: Vec::new(),
        });
        let (throttle, tx) = throttle_with(detector, Duration::from_millis(5));

        tx.send(blank_frame(64, 64)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(throttle.is_busy());

        throttle.shutdown(Duration::from_millis(500)).await;
        assert!(!throttle.is_busy());

        // Intake has exited and dropped its receiver; the closed
        // channel is what keeps new frames out.
        assert!(tx.send(blank_frame(64, 64)).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_abandons_hung_detector() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let detector = Arc::new(SlowDetector {
            invocations,
            latency: Duration::from_secs(3600),
            result: Vec::new(),
        });
        let (throttle, tx) = throttle_with(detector, Duration::from_millis(5));

        tx.send(blank_frame(64, 64)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = std::time::Instant::now();
        throttle.shutdown(Duration::from_millis(50)).await;
        assert!(start.elapsed() < Duration::from_millis(500));
        // Gate still held by the hung run — abandoned, not awaited.
        assert!(throttle.is_busy());
    }
}
