//! Chief checkpoints: one safetensors file per save, holding the flat parameter vector and
//! the global step it was taken at.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{Result, error::WorkerErr};

/// Amount of checkpoints kept on disk.
pub const KEEP_CHECKPOINTS: usize = 5;

const PARAMS_TENSOR: &str = "params";
const STEP_KEY: &str = "global_step";
const LEN_KEY: &str = "num_params";
const PREFIX: &str = "model-";
const EXTENSION: &str = ".safetensors";

/// A restored training state.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub step: u64,
    pub params: Vec<f32>,
}

/// Saves, lists and restores the checkpoints of one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    keep: usize,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager` keeping the last `KEEP_CHECKPOINTS` saves.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            keep: KEEP_CHECKPOINTS,
        }
    }

    /// Sets how many checkpoints survive a save.
    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, step: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{step}{EXTENSION}"))
    }

    /// Writes a checkpoint for `step` and prunes the oldest ones.
    ///
    /// The file is written under a temporary name and renamed, so a crash never leaves a
    /// truncated checkpoint behind.
    ///
    /// # Returns
    /// The path of the new checkpoint.
    pub fn save(&self, step: u64, params: &[f32]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(step);

        let bytes: Vec<u8> = params.iter().flat_map(|p| p.to_le_bytes()).collect();
        let view = TensorView::new(Dtype::F32, vec![params.len()], &bytes)
            .map_err(|e| self.invalid(&path, e))?;

        let metadata = HashMap::from([
            (STEP_KEY.to_string(), step.to_string()),
            (LEN_KEY.to_string(), params.len().to_string()),
        ]);

        let data = safetensors::serialize([(PARAMS_TENSOR, view)], &Some(metadata))
            .map_err(|e| self.invalid(&path, e))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        info!(step = step; "saved checkpoint {}", path.display());

        self.prune()?;
        Ok(path)
    }

    /// Lists the checkpoints in the directory, oldest first.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let step = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(PREFIX))
                .and_then(|name| name.strip_suffix(EXTENSION))
                .and_then(|step| step.parse::<u64>().ok());

            if let Some(step) = step {
                found.push((step, path));
            }
        }

        found.sort_by_key(|(step, _)| *step);
        Ok(found)
    }

    /// Returns the checkpoint with the highest step, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }

    /// Restores the latest checkpoint.
    ///
    /// # Returns
    /// `None` when the directory holds no checkpoint, an error if the latest one is corrupt.
    pub fn restore_latest(&self) -> Result<Option<Checkpoint>> {
        match self.latest()? {
            Some(path) => self.load(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Reads a single checkpoint file.
    pub fn load(&self, path: &Path) -> Result<Checkpoint> {
        let bytes = fs::read(path)?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| self.invalid(path, e))?;
        let (_, metadata) = SafeTensors::read_metadata(&bytes).map_err(|e| self.invalid(path, e))?;

        let info = metadata.metadata().as_ref();
        let field = |key: &str| -> Result<u64> {
            info.and_then(|info| info.get(key))
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| self.invalid(path, format!("missing or malformed `{key}`")))
        };

        let step = field(STEP_KEY)?;
        let len = field(LEN_KEY)? as usize;

        let view = tensors
            .tensor(PARAMS_TENSOR)
            .map_err(|e| self.invalid(path, e))?;

        if view.dtype() != Dtype::F32 || view.shape() != [len] {
            return Err(self.invalid(
                path,
                format!("expected f32 tensor of shape [{len}], got {:?} {:?}", view.dtype(), view.shape()),
            ));
        }

        let params = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        debug!(step = step; "loaded checkpoint {}", path.display());
        Ok(Checkpoint { step, params })
    }

    fn prune(&self) -> Result<()> {
        let found = self.list()?;
        let excess = found.len().saturating_sub(self.keep);

        for (step, path) in found.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(step = step; "failed to remove old checkpoint {}: {e}", path.display());
            }
        }

        Ok(())
    }

    fn invalid(&self, path: &Path, detail: impl ToString) -> WorkerErr {
        WorkerErr::Checkpoint {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_params_and_step() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let params = vec![0.5, -1.25, 3.0];

        manager.save(42, &params).unwrap();

        let restored = manager.restore_latest().unwrap().unwrap();
        assert_eq!(restored, Checkpoint { step: 42, params });
    }

    #[test]
    fn latest_is_the_highest_step() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        manager.save(100, &[1.]).unwrap();
        manager.save(9, &[2.]).unwrap();
        manager.save(20, &[3.]).unwrap();

        let latest = manager.latest().unwrap().unwrap();
        assert!(latest.ends_with("model-100.safetensors"));
        assert_eq!(manager.restore_latest().unwrap().unwrap().params, [1.]);
    }

    #[test]
    fn only_the_newest_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).with_keep(2);

        for step in [1, 2, 3, 4] {
            manager.save(step, &[step as f32]).unwrap();
        }

        let steps: Vec<_> = manager.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, [3, 4]);
    }

    #[test]
    fn missing_directory_has_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nothing"));
        assert_eq!(manager.restore_latest().unwrap(), None);
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        fs::write(dir.path().join("model-7.safetensors"), b"not a checkpoint").unwrap();

        let err = manager.restore_latest().unwrap_err();
        assert!(matches!(err, WorkerErr::Checkpoint { .. }));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("model-x.safetensors"), b"x").unwrap();

        assert!(manager.list().unwrap().is_empty());
    }
}
