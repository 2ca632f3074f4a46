use opencv::{
    core::{Mat, Vector},
    imgcodecs,
};
use std::{
    fs, io,
    path::PathBuf,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to create snapshot directory {0:?}: {1}")]
    CreateDir(PathBuf, io::Error),
    #[error("Failed to encode snapshot {0:?}: {1}")]
    Encode(PathBuf, opencv::Error),
    #[error("Encoder refused to write {0:?}")]
    WriteFailed(PathBuf),
}

/// Writes JPEG snapshots named after the frame index.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    prefix: String,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn path_for(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("{}_{}.jpg", self.prefix, frame_index))
    }

    pub fn save(&self, frame: &Mat, frame_index: u64) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir).map_err(|e| SnapshotError::CreateDir(self.dir.clone(), e))?;

        let path = self.path_for(frame_index);
        let written = imgcodecs::imwrite(&path.to_string_lossy(), frame, &Vector::new())
            .map_err(|e| SnapshotError::Encode(path.clone(), e))?;
        if !written {
            return Err(SnapshotError::WriteFailed(path));
        }

        Ok(path)
    }
}
