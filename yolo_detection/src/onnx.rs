use crate::{
    config::ModelConfig,
    detection::{BoundingBox, Detection},
    detector::{frame_to_blob, BlobParams, Detector, DetectorError},
};
use ndarray::{Array, ArrayViewD, Axis, Ix4};
use opencv::{
    core::{Mat, Scalar},
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};

/// Single-stage YOLOv8 detector exported to ONNX, run with ONNX Runtime.
pub struct OnnxDetector {
    session: Session,
    output_name: String,
    input_size: i32,
    class_count: usize,
}

impl OnnxDetector {
    pub fn new(model_config: &ModelConfig, class_count: usize) -> Result<Self, DetectorError> {
        let path = model_config.model_dir.join(&model_config.onnx.onnx_file);
        let session = (|| -> Result<Session, ort::Error> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(&path)?;
            Ok(session)
        })()
        .map_err(|e| DetectorError::Load(format!("{:?}: {}", path, e)))?;

        let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        check_output_name(&output_names, &model_config.onnx.output_name)?;

        tracing::info!("Created ONNX session from {:?}", path);

        Ok(Self {
            session,
            output_name: model_config.onnx.output_name.clone(),
            input_size: model_config.onnx.input_size,
            class_count,
        })
    }

    fn blob_params(&self) -> BlobParams {
        BlobParams {
            scale: 1.0 / 255.0,
            input_size: self.input_size,
            mean: Scalar::all(0.0),
            swap_rb: true,
        }
    }

    fn run_inference(
        &mut self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            DetectorError::Inference(format!("model has no output named {}", self.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::Inference(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn class_count(&self) -> usize {
        self.class_count
    }

    fn candidates(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let blob = frame_to_blob(frame, &self.blob_params())?;
        let size = self.input_size as usize;
        let input = Array::from_shape_vec((1, 3, size, size), blob.data_typed::<f32>()?.to_vec())
            .map_err(|e| DetectorError::Inference(format!("invalid input blob: {}", e)))?;

        let output = self.run_inference(&input)?;
        decode_yolov8(
            output.view(),
            (frame.cols() as f32, frame.rows() as f32),
            self.input_size as f32,
            confidence_threshold,
        )
    }
}

fn check_output_name(available: &[&str], wanted: &str) -> Result<(), DetectorError> {
    if available.contains(&wanted) {
        Ok(())
    } else {
        Err(DetectorError::Load(format!(
            "model has no output named {}, available: {:?}",
            wanted, available
        )))
    }
}

/// Decodes a `[1, 4 + classes, anchors]` YOLOv8 head.
///
/// Each anchor column holds the box center and size in network input
/// pixels followed by one score per class.
pub fn decode_yolov8(
    output: ArrayViewD<f32>,
    frame_size: (f32, f32),
    input_size: f32,
    confidence_threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    if output.ndim() != 3 || output.shape()[0] != 1 || output.shape()[1] <= 4 {
        return Err(DetectorError::Inference(format!(
            "unexpected output shape {:?}",
            output.shape()
        )));
    }

    let (frame_width, frame_height) = frame_size;
    let predictions = output.index_axis(Axis(0), 0);
    let mut boxes = Vec::new();

    for column in predictions.axis_iter(Axis(1)) {
        let best = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, score| if score.1 > accum.1 { score } else { accum });
        let Some((class_id, prob)) = best else {
            continue;
        };

        if prob < confidence_threshold {
            continue;
        }

        let xc = column[0] / input_size * frame_width;
        let yc = column[1] / input_size * frame_height;
        let w = column[2] / input_size * frame_width;
        let h = column[3] / input_size * frame_height;

        boxes.push(Detection::new(
            BoundingBox::from_center(xc, yc, w, h),
            class_id,
            prob,
        ));
    }

    Ok(boxes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_all_zero_output_decodes_to_nothing() {
        let output = Array3::<f32>::zeros((1, 84, 8400)).into_dyn();
        let boxes = decode_yolov8(output.view(), (640., 480.), 640., 0.5).unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_decode_rescales_to_frame() {
        let mut output = Array3::<f32>::zeros((1, 6, 3));
        output[[0, 0, 1]] = 320.;
        output[[0, 1, 1]] = 320.;
        output[[0, 2, 1]] = 64.;
        output[[0, 3, 1]] = 128.;
        output[[0, 4, 1]] = 0.1;
        output[[0, 5, 1]] = 0.8;
        output[[0, 4, 2]] = 0.3;

        let boxes = decode_yolov8(output.into_dyn().view(), (1280., 960.), 640., 0.25).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 1);
        assert_eq!(boxes[0].confidence, 0.8);
        assert_eq!(boxes[0].bbox, BoundingBox::new(576., 384., 128., 192.));
        assert_eq!(boxes[1].class_id, 0);
    }

    #[test]
    fn test_unknown_output_name_fails_to_load() {
        assert!(check_output_name(&["output0"], "output0").is_ok());

        let err = check_output_name(&["output0"], "output1").unwrap_err();
        assert!(matches!(err, DetectorError::Load(msg) if msg.contains("output1")));
    }

    #[test]
    fn test_rejects_bad_shape() {
        let output = Array3::<f32>::zeros((1, 4, 10)).into_dyn();
        let err = decode_yolov8(output.view(), (640., 480.), 640., 0.5).unwrap_err();
        assert!(matches!(err, DetectorError::Inference(_)));
    }
}
