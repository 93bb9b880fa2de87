use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use fieldpack_core::EngineError;

pub(crate) fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Uniquely named staging directory removed on drop, success or failure.
pub(crate) struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub(crate) fn create(base: &Path, label: &str) -> Result<Self> {
        let path = base.join(format!("{label}-{}", unique_suffix()));
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create scratch directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub(crate) fn copy_dir_recursive(source_root: &Path, destination_root: &Path) -> Result<()> {
    if !source_root.is_dir() {
        return Err(anyhow!(
            "copy source is not a directory: {}",
            source_root.display()
        ));
    }
    fs::create_dir_all(destination_root).with_context(|| {
        format!(
            "failed creating copy destination {}",
            destination_root.display()
        )
    })?;

    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();
    queue.push_back((source_root.to_path_buf(), destination_root.to_path_buf()));

    while let Some((from_dir, to_dir)) = queue.pop_front() {
        for entry in fs::read_dir(&from_dir)
            .with_context(|| format!("failed reading source directory {}", from_dir.display()))?
        {
            let entry = entry?;
            let from_path = entry.path();
            let to_path = to_dir.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                fs::create_dir_all(&to_path)
                    .with_context(|| format!("failed creating directory {}", to_path.display()))?;
                queue.push_back((from_path, to_path));
            } else if file_type.is_file() {
                fs::copy(&from_path, &to_path).with_context(|| {
                    format!(
                        "failed copying file from {} to {}",
                        from_path.display(),
                        to_path.display()
                    )
                })?;
            }
        }
    }

    Ok(())
}

/// Copies one file and fails with an integrity error when the written size
/// disagrees with the source.
pub(crate) fn copy_file_verified(source: &Path, destination: &Path) -> Result<u64> {
    let expected = fs::metadata(source)
        .with_context(|| format!("failed to stat copy source {}", source.display()))?
        .len();
    let actual = fs::copy(source, destination).with_context(|| {
        format!(
            "failed copying {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    if actual != expected {
        return Err(EngineError::IntegrityMismatch {
            path: destination.display().to_string(),
            expected,
            actual,
        }
        .into());
    }
    Ok(actual)
}
