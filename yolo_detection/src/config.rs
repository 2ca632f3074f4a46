use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Onnx,
    Darknet,
    CaffeSsd,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Onnx => "onnx",
            ModelKind::Darknet => "darknet",
            ModelKind::CaffeSsd => "caffe_ssd",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub model_dir: PathBuf,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub onnx: OnnxConfig,
    #[serde(default)]
    pub darknet: DarknetConfig,
    #[serde(default)]
    pub caffe_ssd: CaffeSsdConfig,
}

fn default_confidence_threshold() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OnnxConfig {
    pub onnx_file: String,
    pub input_size: i32,
    pub output_name: String,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            onnx_file: "best.onnx".into(),
            input_size: 640,
            output_name: "output0".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DarknetConfig {
    pub cfg_file: String,
    pub weights_file: String,
    pub input_size: i32,
    pub mean: [f64; 3],
}

impl Default for DarknetConfig {
    fn default() -> Self {
        Self {
            cfg_file: "yolov3-tiny.cfg".into(),
            weights_file: "yolov3-tiny.weights".into(),
            input_size: 416,
            mean: [0.0; 3],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaffeSsdConfig {
    pub prototxt_file: String,
    pub caffemodel_file: String,
    pub input_size: i32,
    pub mean: f64,
}

impl Default for CaffeSsdConfig {
    fn default() -> Self {
        Self {
            prototxt_file: "MobileNetSSD_deploy.prototxt".into(),
            caffemodel_file: "MobileNetSSD_deploy.caffemodel".into(),
            input_size: 300,
            mean: 127.5,
        }
    }
}

impl ModelConfig {
    /// Every file the selected backend needs.
    pub fn get_paths(&self) -> Vec<PathBuf> {
        let files: Vec<&str> = match self.kind {
            ModelKind::Onnx => vec![self.onnx.onnx_file.as_str()],
            ModelKind::Darknet => vec![
                self.darknet.cfg_file.as_str(),
                self.darknet.weights_file.as_str(),
            ],
            ModelKind::CaffeSsd => vec![
                self.caffe_ssd.prototxt_file.as_str(),
                self.caffe_ssd.caffemodel_file.as_str(),
            ],
        };
        files.into_iter().map(|f| self.model_dir.join(f)).collect()
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(format!(
                "Confidence threshold must be in (0, 1], got {}",
                self.confidence_threshold
            ));
        }
        for path in self.get_paths() {
            if !path.exists() {
                return Err(format!("Model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl LabelsConfig {
    pub fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

impl Validatable for LabelsConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Labels file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config(kind: ModelKind, dir: PathBuf) -> ModelConfig {
        ModelConfig {
            kind,
            model_dir: dir,
            confidence_threshold: 0.25,
            onnx: OnnxConfig::default(),
            darknet: DarknetConfig::default(),
            caffe_ssd: CaffeSsdConfig::default(),
        }
    }

    #[test]
    fn test_paths_follow_kind() {
        let config = model_config(ModelKind::Darknet, PathBuf::from("models"));
        assert_eq!(
            config.get_paths(),
            vec![
                PathBuf::from("models/yolov3-tiny.cfg"),
                PathBuf::from("models/yolov3-tiny.weights")
            ]
        );
    }

    #[test]
    fn test_validate_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = model_config(ModelKind::Onnx, dir.path().to_path_buf());
        assert!(config.validate().is_err());

        std::fs::write(dir.path().join("best.onnx"), b"onnx").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_threshold() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("best.onnx"), b"onnx").unwrap();
        let mut config = model_config(ModelKind::Onnx, dir.path().to_path_buf());

        config.confidence_threshold = 0.0;
        assert!(config.validate().is_err());
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
        config.confidence_threshold = 1.0;
        assert!(config.validate().is_ok());
    }
}
