use crate::{
    caffe_ssd::CaffeSsdDetector,
    catalog::ClassCatalog,
    config::{ModelConfig, ModelKind, Validatable},
    darknet::DarknetDetector,
    detection::Detection,
    nms::{non_max_suppression, NMS_IOU_THRESHOLD},
    onnx::OnnxDetector,
};
use opencv::{
    core::{Mat, Scalar, Size, CV_32F},
    dnn,
    prelude::*,
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Confidence threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("Invalid input frame: {0}")]
    InvalidFrame(String),
}

impl From<opencv::Error> for DetectorError {
    fn from(err: opencv::Error) -> Self {
        DetectorError::Inference(err.to_string())
    }
}

/// Common interface for every model family.
///
/// Backends only implement [`Detector::candidates`]; the provided
/// [`Detector::detect`] validates input, drops class ids outside the
/// catalog and runs non-max suppression, so every backend returns results
/// under the same guarantees.
pub trait Detector {
    fn name(&self) -> &'static str;

    /// Number of classes the backend was loaded with.
    fn class_count(&self) -> usize;

    /// Forward pass and box decoding, before suppression.
    fn candidates(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError>;

    #[instrument(skip_all, fields(detector = self.name()))]
    fn detect(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        check_threshold(confidence_threshold)?;
        check_frame(frame)?;

        let class_count = self.class_count();
        let candidates: Vec<Detection> = self
            .candidates(frame, confidence_threshold)?
            .into_iter()
            .filter(|d| d.class_id < class_count && d.confidence >= confidence_threshold)
            .collect();
        let candidate_count = candidates.len();

        let detections = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(
            "Kept {} of {} candidates after suppression",
            detections.len(),
            candidate_count
        );

        Ok(detections)
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn class_count(&self) -> usize {
        (**self).class_count()
    }

    fn candidates(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        (**self).candidates(frame, confidence_threshold)
    }
}

pub fn check_threshold(confidence_threshold: f32) -> Result<(), DetectorError> {
    if confidence_threshold > 0.0 && confidence_threshold <= 1.0 {
        Ok(())
    } else {
        Err(DetectorError::InvalidThreshold(confidence_threshold))
    }
}

pub fn check_frame(frame: &Mat) -> Result<(), DetectorError> {
    if frame.empty() {
        return Err(DetectorError::InvalidFrame("frame is empty".into()));
    }
    if frame.channels() != 3 {
        return Err(DetectorError::InvalidFrame(format!(
            "expected 3 channels, got {}",
            frame.channels()
        )));
    }
    Ok(())
}

/// Preprocessing parameters shared by the DNN backends.
#[derive(Debug, Clone, Copy)]
pub struct BlobParams {
    pub scale: f64,
    pub input_size: i32,
    pub mean: Scalar,
    pub swap_rb: bool,
}

/// Scales pixel values, resizes to the square network input and
/// subtracts the mean. The result is an NCHW float blob.
pub fn frame_to_blob(frame: &Mat, params: &BlobParams) -> Result<Mat, DetectorError> {
    let blob = dnn::blob_from_image(
        frame,
        params.scale,
        Size::new(params.input_size, params.input_size),
        params.mean,
        params.swap_rb,
        false,
        CV_32F,
    )?;
    Ok(blob)
}

/// Builds the backend named by the model config.
pub fn build_detector(
    model_config: &ModelConfig,
    catalog: &ClassCatalog,
) -> Result<Box<dyn Detector>, DetectorError> {
    model_config.validate().map_err(DetectorError::Load)?;

    let detector: Box<dyn Detector> = match model_config.kind {
        ModelKind::Onnx => Box::new(OnnxDetector::new(model_config, catalog.len())?),
        ModelKind::Darknet => Box::new(DarknetDetector::new(model_config, catalog.len())?),
        ModelKind::CaffeSsd => Box::new(CaffeSsdDetector::new(model_config, catalog.len())?),
    };

    tracing::info!(
        "Loaded {} detector for {} classes",
        detector.name(),
        detector.class_count()
    );
    Ok(detector)
}
