mod caffe_ssd;
mod darknet;
mod onnx;

pub mod catalog;
pub mod config;
pub mod detection;
pub mod detector;
pub mod fetch;
pub mod nms;

pub use caffe_ssd::{decode_ssd, CaffeSsdDetector};
pub use catalog::{CatalogError, ClassCatalog, ClassLabel, Color};
pub use darknet::{decode_region_rows, DarknetDetector};
pub use detection::{BoundingBox, Detection};
pub use detector::{build_detector, Detector, DetectorError};
pub use onnx::{decode_yolov8, OnnxDetector};
