use crate::{
    annotator::{AnnotateError, Annotator, Overlay},
    camera::{CaptureLoop, FrameSource},
    display::{Display, DisplayError, KeyCommand},
    snapshot::SnapshotWriter,
    state::SessionState,
};
use thiserror::Error;
use yolo_detection::{Detector, DetectorError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Annotation error: {0}")]
    Annotate(#[from] AnnotateError),
    #[error("Display error: {0}")]
    Display(#[from] DisplayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    WarmingUp,
    Running,
    Stopping,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    UserQuit,
    StreamFailed,
    WarmupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_processed: u64,
    pub snapshots_saved: u32,
    pub exit_reason: ExitReason,
}

enum Step {
    Continue,
    Quit,
    StreamEnded,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub confidence_threshold: f32,
    pub key_poll_ms: i32,
}

/// Drives one capture → detect → annotate → display loop until the user
/// quits, the stream dies, or a stage fails.
pub struct Session<D: Detector, S: FrameSource, W: Display> {
    detector: D,
    capture: CaptureLoop<S>,
    display: W,
    annotator: Annotator,
    snapshots: SnapshotWriter,
    settings: SessionSettings,
    state: SessionState,
    phase: SessionPhase,
}

impl<D: Detector, S: FrameSource, W: Display> Session<D, S, W> {
    pub fn new(
        detector: D,
        capture: CaptureLoop<S>,
        display: W,
        annotator: Annotator,
        snapshots: SnapshotWriter,
        settings: SessionSettings,
    ) -> Self {
        Self {
            detector,
            capture,
            display,
            annotator,
            snapshots,
            settings,
            state: SessionState::new(),
            phase: SessionPhase::WarmingUp,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn capture(&self) -> &CaptureLoop<S> {
        &self.capture
    }

    pub fn display(&self) -> &W {
        &self.display
    }

    fn transition(&mut self, next: SessionPhase) {
        tracing::info!("Session {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Runs the state machine to `Closed`. The device and window are
    /// released before this returns, on success and on error.
    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        let mut exit_reason = ExitReason::UserQuit;
        let mut failure = None;

        loop {
            match self.phase {
                SessionPhase::WarmingUp => {
                    if self.capture.warm_up() {
                        self.transition(SessionPhase::Running);
                    } else {
                        exit_reason = ExitReason::WarmupFailed;
                        self.transition(SessionPhase::Stopping);
                    }
                }
                SessionPhase::Running => match self.step() {
                    Ok(Step::Continue) => {}
                    Ok(Step::Quit) => {
                        tracing::info!("Quit requested at frame {}", self.state.frame_index);
                        exit_reason = ExitReason::UserQuit;
                        self.transition(SessionPhase::Stopping);
                    }
                    Ok(Step::StreamEnded) => {
                        exit_reason = ExitReason::StreamFailed;
                        self.transition(SessionPhase::Stopping);
                    }
                    Err(e) => {
                        tracing::error!(
                            "Stopping after error at frame {}: {}",
                            self.state.frame_index,
                            e
                        );
                        failure = Some(e);
                        self.transition(SessionPhase::Stopping);
                    }
                },
                SessionPhase::Stopping => {
                    self.teardown();
                    self.transition(SessionPhase::Closed);
                }
                SessionPhase::Closed => break,
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let report = SessionReport {
            frames_processed: self.state.frame_index,
            snapshots_saved: self.state.snapshots_saved,
            exit_reason,
        };
        tracing::info!(
            "Session closed: {} frames, {} snapshots, {:?}",
            report.frames_processed,
            report.snapshots_saved,
            report.exit_reason
        );
        Ok(report)
    }

    fn step(&mut self) -> Result<Step, SessionError> {
        let Some(mut frame) = self.capture.next_frame(&mut self.state) else {
            return Ok(Step::StreamEnded);
        };

        let detections = self
            .detector
            .detect(&frame, self.settings.confidence_threshold)?;
        self.state.objects_in_frame = detections.len();

        let overlay = Overlay::new(self.state.frame_index, detections.len());
        self.annotator.annotate(&mut frame, &detections, &overlay)?;
        self.display.show(&frame)?;

        match self.display.poll_key(self.settings.key_poll_ms)? {
            Some(KeyCommand::Quit) => return Ok(Step::Quit),
            Some(KeyCommand::Save) => match self.snapshots.save(&frame, self.state.frame_index) {
                Ok(path) => {
                    self.state.snapshots_saved += 1;
                    tracing::info!("Saved frame as {:?}", path);
                }
                Err(e) => tracing::error!("Snapshot failed: {}", e),
            },
            None => {}
        }

        Ok(Step::Continue)
    }

    fn teardown(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::error!("Failed to release capture device: {}", e);
        }
        if let Err(e) = self.display.close() {
            tracing::error!("Failed to close display: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::tests::ScriptedSource;
    use opencv::core::Mat;
    use std::{collections::VecDeque, sync::Arc};
    use yolo_detection::{BoundingBox, ClassCatalog, Detection};

    struct StubDetector {
        fail_on_call: Option<usize>,
        calls: usize,
    }

    impl StubDetector {
        fn new() -> Self {
            Self {
                fail_on_call: None,
                calls: 0,
            }
        }
    }

    impl Detector for StubDetector {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn class_count(&self) -> usize {
            2
        }

        fn candidates(
            &mut self,
            _frame: &Mat,
            _confidence_threshold: f32,
        ) -> Result<Vec<Detection>, DetectorError> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(DetectorError::Inference("forward pass failed".into()));
            }
            Ok(vec![Detection::new(
                BoundingBox::new(50., 50., 100., 80.),
                1,
                0.9,
            )])
        }
    }

    #[derive(Default)]
    struct ScriptedDisplay {
        keys: VecDeque<Option<KeyCommand>>,
        shown: usize,
        closed: bool,
    }

    impl ScriptedDisplay {
        fn with_keys(keys: impl IntoIterator<Item = Option<KeyCommand>>) -> Self {
            Self {
                keys: keys.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl Display for ScriptedDisplay {
        fn show(&mut self, _frame: &Mat) -> Result<(), DisplayError> {
            self.shown += 1;
            Ok(())
        }

        fn poll_key(&mut self, _timeout_ms: i32) -> Result<Option<KeyCommand>, DisplayError> {
            Ok(self.keys.pop_front().flatten())
        }

        fn close(&mut self) -> Result<(), DisplayError> {
            self.closed = true;
            Ok(())
        }
    }

    fn session(
        detector: StubDetector,
        source: ScriptedSource,
        display: ScriptedDisplay,
        snapshot_dir: &std::path::Path,
    ) -> Session<StubDetector, ScriptedSource, ScriptedDisplay> {
        let catalog = Arc::new(ClassCatalog::from_names(["ruler", "voltmeter"]).unwrap());
        Session::new(
            detector,
            CaptureLoop::with_limits(source, 5, 10),
            display,
            Annotator::new(catalog),
            SnapshotWriter::new(snapshot_dir, "detection_frame"),
            SessionSettings {
                confidence_threshold: 0.25,
                key_poll_ms: 1,
            },
        )
    }

    #[test]
    fn test_quit_key_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let display = ScriptedDisplay::with_keys([None, None, Some(KeyCommand::Quit)]);
        let source = ScriptedSource::always(true);
        let mut session = session(StubDetector::new(), source, display, dir.path());

        let report = session.run().unwrap();

        assert_eq!(report.exit_reason, ExitReason::UserQuit);
        assert_eq!(report.frames_processed, 3);
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert_eq!(session.state().objects_in_frame, 1);
        assert_eq!(session.display().shown, 3);
        assert!(session.display().closed);
        assert!(session.capture().source().released);
    }

    #[test]
    fn test_save_key_on_seventh_frame_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let keys = std::iter::repeat(None)
            .take(6)
            .chain([Some(KeyCommand::Save), Some(KeyCommand::Quit)]);
        let mut session = session(
            StubDetector::new(),
            ScriptedSource::always(true),
            ScriptedDisplay::with_keys(keys),
            dir.path(),
        );

        let report = session.run().unwrap();

        assert_eq!(report.snapshots_saved, 1);
        assert_eq!(report.frames_processed, 8);
        assert!(dir.path().join("detection_frame_7.jpg").exists());
        let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn test_ten_failed_reads_stop_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new([true, true], false);
        let display = ScriptedDisplay::default();
        let mut session = session(StubDetector::new(), source, display, dir.path());

        let report = session.run().unwrap();

        assert_eq!(report.exit_reason, ExitReason::StreamFailed);
        assert_eq!(report.frames_processed, 1);
        assert_eq!(session.state().consecutive_failures, 10);
        assert_eq!(session.capture().source().reads, 12);
        assert!(session.capture().source().released);
        assert!(session.display().closed);
    }

    #[test]
    fn test_failed_warm_up_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(
            StubDetector::new(),
            ScriptedSource::always(false),
            ScriptedDisplay::default(),
            dir.path(),
        );

        let report = session.run().unwrap();

        assert_eq!(report.exit_reason, ExitReason::WarmupFailed);
        assert_eq!(report.frames_processed, 0);
        assert_eq!(session.capture().source().reads, 5);
        assert_eq!(session.display().shown, 0);
        assert!(session.capture().source().released);
    }

    #[test]
    fn test_inference_error_is_fatal_but_releases_device() {
        let dir = tempfile::tempdir().unwrap();
        let detector = StubDetector {
            fail_on_call: Some(4),
            calls: 0,
        };
        let source = ScriptedSource::always(true);
        let mut session = session(detector, source, ScriptedDisplay::default(), dir.path());

        let err = session.run().unwrap_err();

        assert!(matches!(err, SessionError::Detector(DetectorError::Inference(_))));
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert_eq!(session.state().frame_index, 4);
        assert_eq!(session.display().shown, 3);
        assert!(session.capture().source().released);
        assert!(session.display().closed);
    }

    #[test]
    fn test_invalid_threshold_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(
            StubDetector::new(),
            ScriptedSource::always(true),
            ScriptedDisplay::default(),
            dir.path(),
        );
        session.settings.confidence_threshold = 1.5;

        let err = session.run().unwrap_err();

        assert!(matches!(err, SessionError::Detector(DetectorError::InvalidThreshold(_))));
        assert!(session.capture().source().released);
    }
}
