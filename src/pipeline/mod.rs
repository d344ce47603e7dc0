pub mod camera;
pub mod control;
pub mod detector;
pub mod encoder;
pub mod normalizer;
pub mod preview;
pub mod rgba_converter;
pub mod transport;

// Re-exports for convenience
pub use camera::FrameSource;
pub use control::{NeverQuit, QuitSignal, StdinQuit};
pub use detector::{LandmarkDetector, OrtDetector};
pub use encoder::{BatchPolicy, Encoder, Packet};
pub use normalizer::Normalizer;
pub use preview::{OverlayPreview, PreviewRenderer, SnapshotWriter};
pub use transport::{PacketMonitor, PacketSink, UdpTransport};

use crate::error::CaptureError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    /// Frames where nothing was detected.
    pub empty_frames: u64,
    pub packets_sent: u64,
    pub detection_failures: u64,
    /// Frames whose packets could not all be sent.
    pub send_failures: u64,
}

#[derive(Debug)]
pub enum StopReason {
    QuitRequested,
    FrameLimit,
    CaptureFailed(CaptureError),
}

#[derive(Debug)]
pub struct RunReport {
    pub final_state: PipelineState,
    pub stop_reason: StopReason,
    pub stats: PipelineStats,
}

/// Capture → detect → normalize → encode → transmit, one frame at a time.
///
/// The pipeline owns its frame source, detector and sink; all of them are
/// released when [`Pipeline::run`] returns or unwinds.
pub struct Pipeline<S, D, T> {
    state: PipelineState,
    source: S,
    detector: D,
    sink: T,
    normalizer: Normalizer,
    encoder: Encoder,
    renderer: Option<Box<dyn PreviewRenderer>>,
    quit: Box<dyn QuitSignal>,
    max_frames: Option<u64>,
    stats: PipelineStats,
}

impl<S, D, T> Pipeline<S, D, T>
where
    S: FrameSource,
    D: LandmarkDetector,
    T: PacketSink,
{
    pub fn new(source: S, detector: D, sink: T, normalizer: Normalizer, encoder: Encoder) -> Self {
        Self {
            state: PipelineState::Init,
            source,
            detector,
            sink,
            normalizer,
            encoder,
            renderer: None,
            quit: Box::new(NeverQuit),
            max_frames: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn PreviewRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_quit_signal(mut self, quit: Box<dyn QuitSignal>) -> Self {
        self.quit = quit;
        self
    }

    pub fn with_frame_limit(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn run(mut self) -> RunReport {
        self.transition(PipelineState::Running);
        log::info!(
            "streaming landmarks with {:?} batching",
            self.encoder.policy()
        );

        let stop_reason = loop {
            if let Err(err) = self.process_frame() {
                log::error!("capture failed, stopping: {err}");
                break StopReason::CaptureFailed(err);
            }
            if self.quit.should_quit() {
                log::info!("quit requested");
                break StopReason::QuitRequested;
            }
            if self.max_frames.is_some_and(|max| self.stats.frames >= max) {
                log::info!("frame limit of {} reached", self.stats.frames);
                break StopReason::FrameLimit;
            }
        };

        self.transition(PipelineState::Stopping);
        let Pipeline {
            source,
            detector,
            sink,
            renderer,
            stats,
            ..
        } = self;
        drop(source);
        drop(sink);
        drop(detector);
        drop(renderer);
        log::info!("pipeline state: {:?} -> {:?}", PipelineState::Stopping, PipelineState::Stopped);
        log::info!(
            "processed {} frames ({} empty), sent {} packets, {} detection failures, {} send failures",
            stats.frames,
            stats.empty_frames,
            stats.packets_sent,
            stats.detection_failures,
            stats.send_failures
        );

        RunReport {
            final_state: PipelineState::Stopped,
            stop_reason,
            stats,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(matches!(
            (self.state, next),
            (PipelineState::Init, PipelineState::Running)
                | (PipelineState::Running, PipelineState::Stopping)
        ));
        log::info!("pipeline state: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Runs one iteration. Only capture failures escape.
    fn process_frame(&mut self) -> Result<(), CaptureError> {
        let frame = self.source.read()?;
        self.stats.frames += 1;

        let sets = match self.detector.detect(&frame) {
            Ok(detection) => self.normalizer.normalize(&detection),
            Err(err) => {
                log::warn!("frame {}: skipping, {err}", frame.index);
                self.stats.detection_failures += 1;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.render(&frame, &[]);
                }
                return Ok(());
            }
        };

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&frame, &sets);
        }

        if sets.is_empty() {
            self.stats.empty_frames += 1;
            return Ok(());
        }

        let packets = self.encoder.encode(sets);
        let total = packets.len();
        for (sent, packet) in packets.iter().enumerate() {
            if let Err(err) = self.sink.send(packet) {
                log::error!(
                    "frame {}: dropped {} of {total} packets: {err}",
                    frame.index,
                    total - sent
                );
                self.stats.send_failures += 1;
                return Ok(());
            }
            self.stats.packets_sent += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Instant,
    };

    use super::*;
    use crate::{
        config::NormalizerConfig,
        error::{DetectionError, TransmissionError},
        types::{
            Classification, DetectedHand, DetectionResult, Frame, HAND_LANDMARKS, Modality,
            POSE_LANDMARKS, RawLandmark,
        },
    };

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            rgba: vec![0; 4 * 4 * 4],
            width: 4,
            height: 4,
            timestamp: Instant::now(),
        }
    }

    struct ScriptedSource {
        frames: VecDeque<Result<Frame, CaptureError>>,
        released: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<Frame, CaptureError>>) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            (
                Self {
                    frames: frames.into(),
                    released: released.clone(),
                },
                released,
            )
        }

        fn frames(count: u64) -> (Self, Arc<AtomicBool>) {
            Self::new((0..count).map(|i| Ok(frame(i))).collect())
        }
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> Result<Frame, CaptureError> {
            self.frames
                .pop_front()
                .unwrap_or(Err(CaptureError::EndOfStream))
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedDetector {
        results: VecDeque<Result<DetectionResult, DetectionError>>,
        fallback: DetectionResult,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedDetector {
        fn always(result: DetectionResult) -> (Self, Arc<AtomicUsize>) {
            Self::scripted(Vec::new(), result)
        }

        fn scripted(
            results: Vec<Result<DetectionResult, DetectionError>>,
            fallback: DetectionResult,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    results: results.into(),
                    fallback,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl LandmarkDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    #[derive(Default)]
    struct SinkLog {
        calls: usize,
        packets: Vec<Packet>,
        released: bool,
    }

    struct RecordingSink {
        log: Arc<Mutex<SinkLog>>,
        fail_calls: Vec<usize>,
    }

    impl RecordingSink {
        fn new(fail_calls: Vec<usize>) -> (Self, Arc<Mutex<SinkLog>>) {
            let log = Arc::new(Mutex::new(SinkLog::default()));
            (
                Self {
                    log: log.clone(),
                    fail_calls,
                },
                log,
            )
        }
    }

    impl PacketSink for RecordingSink {
        fn send(&mut self, packet: &Packet) -> Result<(), TransmissionError> {
            let mut log = self.log.lock().unwrap();
            let call = log.calls;
            log.calls += 1;
            if self.fail_calls.contains(&call) {
                return Err(TransmissionError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "send buffer full",
                )));
            }
            log.packets.push(packet.clone());
            Ok(())
        }
    }

    impl Drop for RecordingSink {
        fn drop(&mut self) {
            self.log.lock().unwrap().released = true;
        }
    }

    struct CountingRenderer(Arc<AtomicUsize>);

    impl PreviewRenderer for CountingRenderer {
        fn render(&mut self, _frame: &Frame, _sets: &[crate::types::LandmarkSet]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn points(count: usize, visibility: Option<f32>) -> Vec<RawLandmark> {
        (0..count)
            .map(|i| RawLandmark {
                x: i as f32 / count as f32,
                y: 0.5,
                z: 0.0,
                visibility,
            })
            .collect()
    }

    fn hand(label: &str) -> DetectedHand {
        DetectedHand {
            landmarks: points(HAND_LANDMARKS, None),
            classifications: vec![Classification {
                label: label.to_string(),
                score: 0.9,
            }],
        }
    }

    fn body_and_hands() -> DetectionResult {
        DetectionResult {
            pose: Some(points(POSE_LANDMARKS, Some(0.8))),
            hands: vec![hand("Left"), hand("Right")],
            faces: Vec::new(),
        }
    }

    fn pipeline<S: FrameSource, D: LandmarkDetector, T: PacketSink>(
        source: S,
        detector: D,
        sink: T,
        policy: BatchPolicy,
    ) -> Pipeline<S, D, T> {
        Pipeline::new(
            source,
            detector,
            sink,
            Normalizer::new(&NormalizerConfig::default()),
            Encoder::new(policy),
        )
    }

    #[test]
    fn starts_in_init() {
        let (source, _) = ScriptedSource::frames(0);
        let (detector, _) = ScriptedDetector::always(DetectionResult::default());
        let (sink, _) = RecordingSink::new(Vec::new());
        let pipeline = pipeline(source, detector, sink, BatchPolicy::Aggregate);
        assert_eq!(pipeline.state(), PipelineState::Init);
    }

    #[test]
    fn capture_error_stops_without_detect_or_send() {
        let (source, source_released) =
            ScriptedSource::new(vec![Err(CaptureError::Read("unplugged".into()))]);
        let (detector, detect_calls) = ScriptedDetector::always(body_and_hands());
        let (sink, sink_log) = RecordingSink::new(Vec::new());

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate).run();

        assert_eq!(report.final_state, PipelineState::Stopped);
        assert!(matches!(
            report.stop_reason,
            StopReason::CaptureFailed(CaptureError::Read(_))
        ));
        assert_eq!(report.stats.frames, 0);
        assert_eq!(detect_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink_log.lock().unwrap().calls, 0);
        assert!(source_released.load(Ordering::SeqCst));
        assert!(sink_log.lock().unwrap().released);
    }

    #[test]
    fn capture_error_after_frames_sends_nothing_for_failed_iteration() {
        let (source, _) = ScriptedSource::frames(2);
        let (detector, detect_calls) = ScriptedDetector::always(body_and_hands());
        let (sink, sink_log) = RecordingSink::new(Vec::new());

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate).run();

        assert!(matches!(
            report.stop_reason,
            StopReason::CaptureFailed(CaptureError::EndOfStream)
        ));
        assert_eq!(report.stats.frames, 2);
        assert_eq!(detect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink_log.lock().unwrap().calls, 2);
    }

    #[test]
    fn aggregate_sends_one_packet_per_frame() {
        let (source, _) = ScriptedSource::frames(1);
        let (detector, _) = ScriptedDetector::always(body_and_hands());
        let (sink, sink_log) = RecordingSink::new(Vec::new());

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate).run();

        let log = sink_log.lock().unwrap();
        assert_eq!(report.stats.packets_sent, 1);
        assert_eq!(log.packets.len(), 1);
        assert_eq!(log.packets[0].landmark_count(), 75);
    }

    #[test]
    fn per_entity_sends_one_packet_per_set() {
        let (source, _) = ScriptedSource::frames(1);
        let (detector, _) = ScriptedDetector::always(body_and_hands());
        let (sink, sink_log) = RecordingSink::new(Vec::new());

        pipeline(source, detector, sink, BatchPolicy::PerEntity).run();

        let log = sink_log.lock().unwrap();
        let modalities: Vec<Option<Modality>> =
            log.packets.iter().map(Packet::modality).collect();
        assert_eq!(
            modalities,
            vec![
                Some(Modality::Pose),
                Some(Modality::Hand),
                Some(Modality::Hand)
            ]
        );
    }

    #[test]
    fn transmission_error_skips_frame_and_continues() {
        let (source, _) = ScriptedSource::frames(2);
        let (detector, detect_calls) = ScriptedDetector::always(body_and_hands());
        // First send of the run fails; remaining per-entity packets of that frame are dropped.
        let (sink, sink_log) = RecordingSink::new(vec![0]);

        let report = pipeline(source, detector, sink, BatchPolicy::PerEntity).run();

        assert_eq!(report.stats.send_failures, 1);
        assert_eq!(report.stats.frames, 2);
        assert_eq!(report.stats.packets_sent, 3);
        assert_eq!(detect_calls.load(Ordering::SeqCst), 2);
        let log = sink_log.lock().unwrap();
        assert_eq!(log.calls, 4);
        assert_eq!(log.packets.len(), 3);
    }

    #[test]
    fn detection_error_skips_encode_but_still_renders() {
        let (source, _) = ScriptedSource::frames(2);
        let (detector, _) = ScriptedDetector::scripted(
            vec![Err(DetectionError::InvalidFrame("bad".into()))],
            body_and_hands(),
        );
        let (sink, sink_log) = RecordingSink::new(Vec::new());
        let renders = Arc::new(AtomicUsize::new(0));

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate)
            .with_renderer(Box::new(CountingRenderer(renders.clone())))
            .run();

        assert_eq!(report.stats.detection_failures, 1);
        assert_eq!(report.stats.packets_sent, 1);
        assert_eq!(sink_log.lock().unwrap().calls, 1);
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_detection_sends_nothing() {
        let (source, _) = ScriptedSource::frames(3);
        let (detector, _) = ScriptedDetector::always(DetectionResult::default());
        let (sink, sink_log) = RecordingSink::new(Vec::new());

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate).run();

        assert_eq!(report.stats.empty_frames, 3);
        assert_eq!(sink_log.lock().unwrap().calls, 0);
    }

    #[test]
    fn quit_is_checked_after_a_completed_frame() {
        let (source, source_released) = ScriptedSource::frames(10);
        let (detector, _) = ScriptedDetector::always(body_and_hands());
        let (sink, sink_log) = RecordingSink::new(Vec::new());
        let quit = Arc::new(AtomicBool::new(true));

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate)
            .with_quit_signal(Box::new(quit))
            .run();

        assert!(matches!(report.stop_reason, StopReason::QuitRequested));
        assert_eq!(report.final_state, PipelineState::Stopped);
        assert_eq!(report.stats.frames, 1);
        assert_eq!(sink_log.lock().unwrap().calls, 1);
        assert!(source_released.load(Ordering::SeqCst));
    }

    #[test]
    fn frame_limit_stops_the_run() {
        let (source, _) = ScriptedSource::frames(10);
        let (detector, _) = ScriptedDetector::always(DetectionResult::default());
        let (sink, _) = RecordingSink::new(Vec::new());

        let report = pipeline(source, detector, sink, BatchPolicy::Aggregate)
            .with_frame_limit(Some(4))
            .run();

        assert!(matches!(report.stop_reason, StopReason::FrameLimit));
        assert_eq!(report.stats.frames, 4);
    }
}
