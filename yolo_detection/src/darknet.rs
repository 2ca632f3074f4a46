use crate::{
    config::ModelConfig,
    detection::{BoundingBox, Detection},
    detector::{frame_to_blob, BlobParams, Detector, DetectorError},
};
use opencv::{
    core::{Mat, Scalar, Vector},
    dnn::{self, Net},
    prelude::*,
};

/// Legacy YOLOv3(-tiny) Darknet model run through OpenCV DNN.
pub struct DarknetDetector {
    net: Net,
    output_layers: Vector<String>,
    params: BlobParams,
    class_count: usize,
}

impl DarknetDetector {
    pub fn new(model_config: &ModelConfig, class_count: usize) -> Result<Self, DetectorError> {
        let cfg = model_config.model_dir.join(&model_config.darknet.cfg_file);
        let weights = model_config.model_dir.join(&model_config.darknet.weights_file);

        let net = dnn::read_net_from_darknet(&cfg.to_string_lossy(), &weights.to_string_lossy())
            .map_err(|e| DetectorError::Load(format!("{:?}: {}", weights, e)))?;
        if net.empty().map_err(|e| DetectorError::Load(e.to_string()))? {
            return Err(DetectorError::Load(format!("empty network from {:?}", cfg)));
        }
        let output_layers = net
            .get_unconnected_out_layers_names()
            .map_err(|e| DetectorError::Load(e.to_string()))?;

        tracing::info!(
            "Loaded Darknet network {:?} with {} output layers",
            cfg,
            output_layers.len()
        );

        let mean = model_config.darknet.mean;
        Ok(Self {
            net,
            output_layers,
            params: BlobParams {
                scale: 0.00392,
                input_size: model_config.darknet.input_size,
                mean: Scalar::new(mean[0], mean[1], mean[2], 0.0),
                swap_rb: true,
            },
            class_count,
        })
    }
}

impl Detector for DarknetDetector {
    fn name(&self) -> &'static str {
        "darknet"
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

        let mut outs = Vector::<Mat>::new();
        self.net.forward(&mut outs, &self.output_layers)?;

        let frame_size = (frame.cols() as f32, frame.rows() as f32);
        let mut boxes = Vec::new();
        for out in outs.iter() {
            let rows = (0..out.rows())
                .map(|row| out.at_row::<f32>(row))
                .collect::<Result<Vec<_>, _>>()?;
            boxes.extend(decode_region_rows(rows, frame_size, confidence_threshold));
        }

        Ok(boxes)
    }
}

/// Decodes YOLO region rows `[cx, cy, w, h, objectness, class scores...]`,
/// all coordinates normalised to the frame.
pub fn decode_region_rows<'a>(
    rows: impl IntoIterator<Item = &'a [f32]>,
    frame_size: (f32, f32),
    confidence_threshold: f32,
) -> Vec<Detection> {
    let (frame_width, frame_height) = frame_size;

    rows.into_iter()
        .filter(|row| row.len() > 5)
        .filter_map(|row| {
            let (class_id, confidence) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .reduce(|accum, score| if score.1 > accum.1 { score } else { accum })?;
            if confidence < confidence_threshold {
                return None;
            }
            Some(Detection::new(
                BoundingBox::from_center(
                    row[0] * frame_width,
                    row[1] * frame_height,
                    row[2] * frame_width,
                    row[3] * frame_height,
                ),
                class_id,
                confidence,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame_rows_decode_to_nothing() {
        let rows = vec![vec![0f32; 85]; 2535];
        let boxes = decode_region_rows(rows.iter().map(Vec::as_slice), (640., 480.), 0.5);
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_decode_picks_best_class() {
        let row: [f32; 8] = [0.5, 0.5, 0.25, 0.5, 0.9, 0.1, 0.7, 0.2];
        let boxes = decode_region_rows([&row[..]], (640., 480.), 0.3);

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 1);
        assert_eq!(boxes[0].confidence, 0.7);
        assert_eq!(boxes[0].bbox, BoundingBox::new(240., 120., 160., 240.));
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let row: [f32; 5] = [0.5, 0.5, 0.25, 0.5, 0.9];
        assert!(decode_region_rows([&row[..]], (640., 480.), 0.1).is_empty());
    }
}
