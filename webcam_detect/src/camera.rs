use crate::{
    config::{CameraBackend, CameraConfig},
    state::SessionState,
};
use opencv::{core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open camera {device_index}")]
    OpenCameraFailed { device_index: i32 },
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Failed to release camera: {0}")]
    ReleaseFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Anything that hands out frames one at a time.
pub trait FrameSource {
    /// `Ok(None)` when the device produced no usable frame this time.
    fn read_frame(&mut self) -> Result<Option<Mat>, CaptureError>;

    /// Gives the device back. Calling it twice is a no-op.
    fn release(&mut self) -> Result<(), CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Option<Mat>, CaptureError> {
        (**self).read_frame()
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        (**self).release()
    }
}

#[derive(Debug)]
pub struct Camera {
    capture: videoio::VideoCapture,
    device_index: i32,
    released: bool,
}

impl Camera {
    /// Opens the device with the preferred backend, falling back to
    /// `CAP_ANY` when that backend is unavailable.
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let device_index = config.device_index;
        let capture = open_with_fallback(
            &backend_order(config.backend.api_preference()),
            device_index,
            |api| {
                let capture = videoio::VideoCapture::new(device_index, api)?;
                Ok(capture.is_opened()?.then_some(capture))
            },
        )?;

        let mut camera = Self {
            capture,
            device_index,
            released: false,
        };
        camera.configure(config)?;
        Ok(camera)
    }

    fn configure(&mut self, config: &CameraConfig) -> Result<(), CaptureError> {
        self.capture
            .set(videoio::CAP_PROP_FRAME_WIDTH, config.frame_width as f64)?;
        self.capture
            .set(videoio::CAP_PROP_FRAME_HEIGHT, config.frame_height as f64)?;
        // Keep only the latest frame queued.
        self.capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
        Ok(())
    }
}

fn backend_order(preferred: i32) -> Vec<i32> {
    let mut backends = vec![preferred];
    if preferred != videoio::CAP_ANY {
        backends.push(videoio::CAP_ANY);
    }
    backends
}

/// Tries each backend in turn. Errors and unopened handles both move on to
/// the next backend.
fn open_with_fallback<T>(
    backends: &[i32],
    device_index: i32,
    mut try_open: impl FnMut(i32) -> Result<Option<T>, CaptureError>,
) -> Result<T, CaptureError> {
    for &api in backends {
        match try_open(api) {
            Ok(Some(capture)) => {
                tracing::info!("Opened camera {} with backend {}", device_index, api);
                return Ok(capture);
            }
            Ok(None) => {
                tracing::warn!(
                    "Backend {} could not open camera {}, trying next",
                    api,
                    device_index
                );
            }
            Err(e) => {
                tracing::warn!("Backend {} failed for camera {}: {}", api, device_index, e);
            }
        }
    }

    Err(CaptureError::OpenCameraFailed { device_index })
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Option<Mat>, CaptureError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CaptureError::ReadFrameFailed)?;
        if grabbed && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.capture
            .release()
            .map_err(CaptureError::ReleaseFailed)?;
        tracing::info!("Camera {} released", self.device_index);
        Ok(())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("Failed to release camera on drop: {}", e);
        }
    }
}

impl CameraBackend {
    pub fn api_preference(&self) -> i32 {
        match self {
            CameraBackend::Auto => {
                if cfg!(target_os = "windows") {
                    videoio::CAP_DSHOW
                } else if cfg!(target_os = "macos") {
                    videoio::CAP_AVFOUNDATION
                } else if cfg!(target_os = "linux") {
                    videoio::CAP_V4L2
                } else {
                    videoio::CAP_ANY
                }
            }
            CameraBackend::Dshow => videoio::CAP_DSHOW,
            CameraBackend::V4l2 => videoio::CAP_V4L2,
            CameraBackend::Avfoundation => videoio::CAP_AVFOUNDATION,
            CameraBackend::Any => videoio::CAP_ANY,
        }
    }
}

/// Pulls frames from a [`FrameSource`], tolerating a bounded run of
/// failed reads.
pub struct CaptureLoop<S: FrameSource> {
    source: S,
    warmup_reads: u32,
    max_consecutive_failures: u32,
}

impl<S: FrameSource> CaptureLoop<S> {
    pub fn new(source: S, config: &CameraConfig) -> Self {
        Self::with_limits(source, config.warmup_reads, config.max_consecutive_failures)
    }

    pub fn with_limits(source: S, warmup_reads: u32, max_consecutive_failures: u32) -> Self {
        Self {
            source,
            warmup_reads,
            max_consecutive_failures,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn try_read(&mut self) -> Option<Mat> {
        match self.source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Frame read error: {}", e);
                None
            }
        }
    }

    /// Discards up to `warmup_reads` frames while the device settles.
    /// Returns as soon as one read succeeds.
    pub fn warm_up(&mut self) -> bool {
        for attempt in 1..=self.warmup_reads {
            if self.try_read().is_some() {
                tracing::info!("Camera warmed up after {} reads", attempt);
                return true;
            }
        }
        tracing::error!(
            "Could not read from camera during {} warm-up reads",
            self.warmup_reads
        );
        false
    }

    /// Next good frame, or `None` once `max_consecutive_failures` reads in
    /// a row have failed.
    pub fn next_frame(&mut self, state: &mut SessionState) -> Option<Mat> {
        loop {
            if let Some(frame) = self.try_read() {
                state.record_frame();
                return Some(frame);
            }

            let failures = state.record_failure();
            tracing::warn!(
                "Failed to capture frame ({}/{})",
                failures,
                self.max_consecutive_failures
            );
            if failures >= self.max_consecutive_failures {
                tracing::error!("Too many failed frames, ending capture");
                return None;
            }
        }
    }

    pub fn release(&mut self) -> Result<(), CaptureError> {
        self.source.release()
    }
}
