use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
};
use std::sync::Arc;
use thiserror::Error;
use yolo_detection::{ClassCatalog, Color, Detection};

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const LABEL_SCALE: f64 = 0.6;
const LABEL_THICKNESS: i32 = 2;
const LABEL_HEIGHT: i32 = 25;
const BOX_THICKNESS: i32 = 2;

pub const CONTROL_HINTS: &str = "Press 'q' to quit | 's' to save";

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Text drawn on every frame regardless of detections.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub frame_index: u64,
    pub object_count: usize,
}

impl Overlay {
    pub fn new(frame_index: u64, object_count: usize) -> Self {
        Self {
            frame_index,
            object_count,
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "Objects: {} | Frame: {}",
            self.object_count, self.frame_index
        )
    }
}

fn bgr(color: Color) -> Scalar {
    Scalar::new(color.blue as f64, color.green as f64, color.red as f64, 0.0)
}

/// Draws detections and the status overlay onto frames.
#[derive(Debug, Clone)]
pub struct Annotator {
    catalog: Arc<ClassCatalog>,
}

impl Annotator {
    pub fn new(catalog: Arc<ClassCatalog>) -> Self {
        Self { catalog }
    }

    pub fn annotate(
        &self,
        frame: &mut Mat,
        detections: &[Detection],
        overlay: &Overlay,
    ) -> Result<(), AnnotateError> {
        for detection in detections {
            self.draw_detection(frame, detection)?;
        }
        draw_overlay(frame, overlay)
    }

    fn draw_detection(&self, frame: &mut Mat, detection: &Detection) -> Result<(), AnnotateError> {
        let (name, color) = match self.catalog.get(detection.class_id) {
            Some(label) => (label.name.clone(), label.color),
            None => (
                format!("Unknown class {}", detection.class_id),
                Color::new(128, 128, 128),
            ),
        };
        let color = bgr(color);
        let rect = detection.bbox.to_rect();

        imgproc::rectangle(frame, rect, color, BOX_THICKNESS, imgproc::LINE_8, 0)?;

        let label = format!("{}: {:.2}", name, detection.confidence);
        let mut baseline = 0;
        let text_size =
            imgproc::get_text_size(&label, FONT, LABEL_SCALE, LABEL_THICKNESS, &mut baseline)?;

        // Labels of boxes touching the top edge go inside the box.
        let label_bottom = rect.y.max(LABEL_HEIGHT);
        imgproc::rectangle(
            frame,
            Rect::new(rect.x, label_bottom - LABEL_HEIGHT, text_size.width, LABEL_HEIGHT),
            color,
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::put_text(
            frame,
            &label,
            Point::new(rect.x, label_bottom - 5),
            FONT,
            LABEL_SCALE,
            Scalar::all(0.0),
            LABEL_THICKNESS,
            imgproc::LINE_AA,
            false,
        )?;

        Ok(())
    }
}

fn draw_overlay(frame: &mut Mat, overlay: &Overlay) -> Result<(), AnnotateError> {
    imgproc::put_text(
        frame,
        &overlay.status_line(),
        Point::new(10, 30),
        FONT,
        0.7,
        Scalar::new(0.0, 255.0, 0.0, 0.0),
        2,
        imgproc::LINE_AA,
        false,
    )?;

    let bottom = frame.rows() - 10;
    imgproc::put_text(
        frame,
        CONTROL_HINTS,
        Point::new(10, bottom),
        FONT,
        0.5,
        Scalar::all(255.0),
        1,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::tests::black_frame;
    use opencv::core::{self, Vec3b};
    use yolo_detection::BoundingBox;

    fn annotator() -> Annotator {
        let text = "lens,255,0,0\nprism,0,0,255";
        let catalog = ClassCatalog::parse(std::io::Cursor::new(text)).unwrap();
        Annotator::new(Arc::new(catalog))
    }

    fn painted(frame: &Mat) -> f64 {
        let sum = core::sum_elems(frame).unwrap();
        sum[0] + sum[1] + sum[2]
    }

    #[test]
    fn test_overlay_drawn_without_detections() {
        let mut frame = black_frame();
        annotator()
            .annotate(&mut frame, &[], &Overlay::new(3, 0))
            .unwrap();

        assert!(painted(&frame) > 0.0);
        assert_eq!(frame.rows(), 480);
        assert_eq!(frame.cols(), 640);
    }

    #[test]
    fn test_box_uses_class_color() {
        let mut frame = black_frame();
        let detection = Detection::new(BoundingBox::new(100., 100., 200., 150.), 1, 0.87);
        annotator()
            .annotate(&mut frame, &[detection], &Overlay::new(1, 1))
            .unwrap();

        let left_edge: &Vec3b = frame.at_2d(175, 100).unwrap();
        assert_eq!(left_edge.0, [255, 0, 0]);
    }

    #[test]
    fn test_unknown_class_still_draws() {
        let mut frame = black_frame();
        let detection = Detection::new(BoundingBox::new(0., 0., 50., 50.), 9, 0.5);
        annotator()
            .annotate(&mut frame, &[detection], &Overlay::new(1, 1))
            .unwrap();

        let edge: &Vec3b = frame.at_2d(40, 0).unwrap();
        assert_eq!(edge.0, [128, 128, 128]);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(Overlay::new(12, 3).status_line(), "Objects: 3 | Frame: 12");
    }
}
