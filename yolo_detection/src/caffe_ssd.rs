use crate::{
    config::ModelConfig,
    detection::{BoundingBox, Detection},
    detector::{frame_to_blob, BlobParams, Detector, DetectorError},
};
use opencv::{
    core::{Mat, Scalar},
    dnn::{self, Net},
    prelude::*,
};

const SSD_ROW_LEN: usize = 7;

/// Class id the SSD head reserves for "no object".
const BACKGROUND_CLASS: usize = 0;

/// MobileNet-SSD Caffe model run through OpenCV DNN.
pub struct CaffeSsdDetector {
    net: Net,
    params: BlobParams,
    class_count: usize,
}

impl CaffeSsdDetector {
    pub fn new(model_config: &ModelConfig, class_count: usize) -> Result<Self, DetectorError> {
        let prototxt = model_config
            .model_dir
            .join(&model_config.caffe_ssd.prototxt_file);
        let caffemodel = model_config
            .model_dir
            .join(&model_config.caffe_ssd.caffemodel_file);

        let net = dnn::read_net_from_caffe(
            &prototxt.to_string_lossy(),
            &caffemodel.to_string_lossy(),
        )
        .map_err(|e| DetectorError::Load(format!("{:?}: {}", caffemodel, e)))?;
        if net.empty().map_err(|e| DetectorError::Load(e.to_string()))? {
            return Err(DetectorError::Load(format!(
                "empty network from {:?}",
                prototxt
            )));
        }

        tracing::info!("Loaded Caffe SSD network {:?}", caffemodel);

        let mean = model_config.caffe_ssd.mean;
        Ok(Self {
            net,
            params: BlobParams {
                scale: 0.007843,
                input_size: model_config.caffe_ssd.input_size,
                mean: Scalar::new(mean, mean, mean, 0.0),
                swap_rb: false,
            },
            class_count,
        })
    }
}

impl Detector for CaffeSsdDetector {
    fn name(&self) -> &'static str {
        "caffe_ssd"
    }

    fn class_count(&self) -> usize {
        self.class_count
    }

    fn candidates(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let blob = frame_to_blob(frame, &self.params)?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let out = self.net.forward_single("")?;

        decode_ssd(
            out.data_typed::<f32>()?,
            (frame.cols() as f32, frame.rows() as f32),
            confidence_threshold,
        )
    }
}

/// Decodes a flattened `[1, 1, N, 7]` DetectionOutput blob. Each row is
/// `[image_id, class_id, confidence, x1, y1, x2, y2]` with normalised corners.
pub fn decode_ssd(
    data: &[f32],
    frame_size: (f32, f32),
    confidence_threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    if data.len() % SSD_ROW_LEN != 0 {
        return Err(DetectorError::Inference(format!(
            "SSD output of {} values is not a multiple of {}",
            data.len(),
            SSD_ROW_LEN
        )));
    }

    let (frame_width, frame_height) = frame_size;
    let boxes = data
        .chunks_exact(SSD_ROW_LEN)
        .filter(|row| row[2] >= confidence_threshold && row[1] >= 0.0)
        .filter(|row| row[1] as usize != BACKGROUND_CLASS)
        .map(|row| {
            let x1 = row[3].clamp(0.0, 1.0) * frame_width;
            let y1 = row[4].clamp(0.0, 1.0) * frame_height;
            let x2 = row[5].clamp(0.0, 1.0) * frame_width;
            let y2 = row[6].clamp(0.0, 1.0) * frame_height;
            Detection::new(BoundingBox::from_corners(x1, y1, x2, y2), row[1] as usize, row[2])
        })
        .collect();

    Ok(boxes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ssd_rows() {
        let data = [
            0.0, 15.0, 0.9, 0.125, 0.25, 0.5, 0.75, //
            0.0, 5.0, 0.1, 0.0, 0.0, 1.0, 1.0, //
            0.0, 0.0, 0.99, 0.0, 0.0, 1.0, 1.0, //
            0.0, 9.0, 0.6, -0.25, 0.5, 1.5, 1.0,
        ];
        let boxes = decode_ssd(&data, (80., 40.), 0.5).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 15);
        assert_eq!(boxes[0].bbox, BoundingBox::from_corners(10., 10., 40., 30.));
        assert_eq!(boxes[1].class_id, 9);
        assert_eq!(boxes[1].bbox, BoundingBox::from_corners(0., 20., 80., 40.));
    }

    #[test]
    fn test_decode_ssd_empty_output() {
        assert!(decode_ssd(&[0.0; 7 * 100], (640., 480.), 0.5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_decode_ssd_rejects_ragged_output() {
        assert!(decode_ssd(&[0.0; 10], (640., 480.), 0.5).is_err());
    }
}
