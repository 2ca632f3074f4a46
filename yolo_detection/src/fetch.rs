use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

const USER_AGENT: &str = "Mozilla/5.0";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A set of pretrained artifacts that are downloaded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelBundle {
    /// YOLOv3-tiny Darknet cfg, weights and COCO class names.
    Yolov3Tiny,
    /// MobileNet-SSD Caffe prototxt and weights.
    MobilenetSsd,
}

impl ModelBundle {
    /// `(file name, url)` pairs.
    pub fn artifacts(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ModelBundle::Yolov3Tiny => &[
                (
                    "yolov3-tiny.weights",
                    "https://pjreddie.com/media/files/yolov3-tiny.weights",
                ),
                (
                    "yolov3-tiny.cfg",
                    "https://raw.githubusercontent.com/pjreddie/darknet/master/cfg/yolov3-tiny.cfg",
                ),
                (
                    "coco.names",
                    "https://raw.githubusercontent.com/pjreddie/darknet/master/data/coco.names",
                ),
            ],
            ModelBundle::MobilenetSsd => &[
                (
                    "MobileNetSSD_deploy.prototxt",
                    "https://raw.githubusercontent.com/chuanqi305/MobileNet-SSD/master/MobileNetSSD_deploy.prototxt",
                ),
                (
                    "MobileNetSSD_deploy.caffemodel",
                    "https://github.com/chuanqi305/MobileNet-SSD/raw/master/MobileNetSSD_deploy.caffemodel",
                ),
            ],
        }
    }
}

/// Downloads every artifact of `bundle` missing from `model_dir`.
/// Returns the paths that were fetched.
pub fn fetch_bundle(bundle: ModelBundle, model_dir: &Path) -> Result<Vec<PathBuf>, FetchError> {
    fetch_artifacts(bundle.artifacts(), model_dir)
}

/// Stops at the first artifact that fails to download.
fn fetch_artifacts(
    artifacts: &[(&str, &str)],
    model_dir: &Path,
) -> Result<Vec<PathBuf>, FetchError> {
    fs::create_dir_all(model_dir).map_err(|source| FetchError::Write {
        path: model_dir.to_path_buf(),
        source,
    })?;

    let mut fetched = Vec::new();
    for (file_name, url) in artifacts {
        let dest = model_dir.join(file_name);
        if dest.exists() {
            tracing::info!("{:?} already exists, skipping", dest);
            continue;
        }
        tracing::info!("Downloading {} to {:?}", url, dest);
        download_file(url, &dest)?;
        fetched.push(dest);
    }

    Ok(fetched)
}

/// Streams `url` into `dest`. A partial file is removed on failure.
pub fn download_file(url: &str, dest: &Path) -> Result<u64, FetchError> {
    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| FetchError::Request {
            url: url.to_string(),
            source: Box::new(e),
        })?;

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let result = File::create(&partial)
        .and_then(|mut file| io::copy(&mut response.into_reader(), &mut file))
        .and_then(|written| fs::rename(&partial, dest).map(|_| written));

    match result {
        Ok(written) => {
            tracing::info!("Downloaded {:?} ({} bytes)", dest, written);
            Ok(written)
        }
        Err(source) => {
            let _ = fs::remove_file(&partial);
            Err(FetchError::Write {
                path: dest.to_path_buf(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_artifacts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for (file_name, _) in ModelBundle::MobilenetSsd.artifacts() {
            fs::write(dir.path().join(file_name), b"cached").unwrap();
        }

        let fetched = fetch_bundle(ModelBundle::MobilenetSsd, dir.path()).unwrap();
        assert!(fetched.is_empty());
    }

    #[test]
    fn test_failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("yolov3-tiny.weights");

        let err = download_file("http://127.0.0.1:1/yolov3-tiny.weights", &dest).unwrap_err();

        assert!(matches!(err, FetchError::Request { .. }));
        assert!(!dest.exists());
        assert!(!dir.path().join("yolov3-tiny.weights.part").exists());
    }

    #[test]
    fn test_fetch_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cached.cfg"), b"cached").unwrap();
        let artifacts = [
            ("cached.cfg", "http://127.0.0.1:1/cached.cfg"),
            ("first.weights", "http://127.0.0.1:1/first.weights"),
            ("second.weights", "http://127.0.0.1:1/second.weights"),
        ];

        let err = fetch_artifacts(&artifacts, dir.path()).unwrap_err();

        match err {
            FetchError::Request { url, .. } => assert_eq!(url, "http://127.0.0.1:1/first.weights"),
            other => panic!("unexpected error: {other}"),
        }
        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_yolo_bundle_ships_class_names() {
        assert!(ModelBundle::Yolov3Tiny
            .artifacts()
            .iter()
            .any(|(file_name, _)| *file_name == "coco.names"));
    }
}
