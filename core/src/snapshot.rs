//! Iteration snapshots
//!
//! Before a new iteration starts, the mutable working directories are copied
//! to `Previous_iterations/SAVE_<n>`. Snapshots are only ever read after
//! that: [`restore`] copies out of them, nothing copies into them.

use crate::error::{AlcdError, Result};
use crate::layout::{RunLayout, SNAPSHOT_DIRS};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SNAPSHOT_PREFIX: &str = "SAVE_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationSnapshot {
    pub id: u32,
    pub path: PathBuf,
}

fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_all(&src_path, &dest_path)?;
        } else if ty.is_file() {
            fs::copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}

fn snapshot_path(layout: &RunLayout, id: u32) -> PathBuf {
    layout
        .previous_iterations_dir()
        .join(format!("{}{}", SNAPSHOT_PREFIX, id))
}

/// Copy the working directories into the next free `SAVE_<n>`
pub fn take(layout: &RunLayout) -> Result<IterationSnapshot> {
    let mut id = 0;
    while snapshot_path(layout, id).exists() {
        id += 1;
    }
    let path = snapshot_path(layout, id);
    fs::create_dir_all(&path)?;

    for relative in SNAPSHOT_DIRS {
        let src = layout.dir(relative);
        if src.is_dir() {
            copy_dir_all(&src, &path.join(relative))?;
        } else {
            debug!(dir = relative, "Nothing to snapshot");
        }
    }

    info!(snapshot = id, path = %path.display(), "Saved iteration snapshot");
    Ok(IterationSnapshot { id, path })
}

/// Existing snapshots, by id
pub fn list(layout: &RunLayout) -> Result<Vec<IterationSnapshot>> {
    let dir = layout.previous_iterations_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = name
            .strip_prefix(SNAPSHOT_PREFIX)
            .and_then(|n| n.parse::<u32>().ok())
        {
            snapshots.push(IterationSnapshot {
                id,
                path: entry.path(),
            });
        }
    }
    snapshots.sort_by_key(|s| s.id);
    Ok(snapshots)
}

/// Replace the working directories with the content of snapshot `id`
pub fn restore(layout: &RunLayout, id: u32) -> Result<IterationSnapshot> {
    let path = snapshot_path(layout, id);
    if !path.is_dir() {
        return Err(AlcdError::missing("restore", path));
    }

    for relative in SNAPSHOT_DIRS {
        let live = layout.dir(relative);
        if live.exists() {
            fs::remove_dir_all(&live)?;
        }
        let saved = path.join(relative);
        if saved.is_dir() {
            copy_dir_all(&saved, &live)?;
        } else {
            fs::create_dir_all(&live)?;
        }
    }

    info!(snapshot = id, "Restored iteration snapshot");
    Ok(IterationSnapshot { id, path })
}

/// Remove `Statistics/K_fold_<k>` for k = 0, 1, ... up to the first gap
pub fn purge_kfold_dirs(layout: &RunLayout) -> Result<usize> {
    let mut k = 0;
    loop {
        let dir = layout.kfold_dir(k);
        if !dir.exists() {
            break;
        }
        fs::remove_dir_all(&dir)?;
        k += 1;
    }
    if k > 0 {
        info!(folds = k, "Removed K-fold directories");
    }
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn populated_layout(dir: &TempDir) -> RunLayout {
        let layout = RunLayout::new(dir.path().join("run"));
        layout.create_directories().unwrap();
        fs::write(layout.masks_dir().join("land.geojson"), b"land v1").unwrap();
        fs::write(layout.dir("Out").join("labeled_img.tif"), b"labels v1").unwrap();
        fs::create_dir_all(layout.kfold_dir(0)).unwrap();
        fs::write(layout.kfold_dir(0).join("report.json"), b"{}").unwrap();
        layout
    }

    fn contents(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_path_buf();
                    files.insert(rel, fs::read(&path).unwrap());
                }
            }
        }
        files
    }

    #[test]
    fn test_take_numbers_sequentially() {
        let dir = TempDir::new().unwrap();
        let layout = populated_layout(&dir);

        assert_eq!(take(&layout).unwrap().id, 0);
        assert_eq!(take(&layout).unwrap().id, 1);
        let ids: Vec<u32> = list(&layout).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_snapshot_isolated_from_live_changes() {
        let dir = TempDir::new().unwrap();
        let layout = populated_layout(&dir);
        let snapshot = take(&layout).unwrap();
        let before = contents(&snapshot.path);
        assert!(before.contains_key(Path::new("In_data/Masks/land.geojson")));

        fs::write(layout.masks_dir().join("land.geojson"), b"land v2").unwrap();
        fs::remove_file(layout.dir("Out").join("labeled_img.tif")).unwrap();
        fs::write(layout.dir("Models").join("model.rf_otb"), b"model").unwrap();

        assert_eq!(contents(&snapshot.path), before);
    }

    #[test]
    fn test_restore_replaces_live_dirs() {
        let dir = TempDir::new().unwrap();
        let layout = populated_layout(&dir);
        take(&layout).unwrap();

        fs::write(layout.masks_dir().join("land.geojson"), b"land v2").unwrap();
        fs::write(layout.masks_dir().join("snow.geojson"), b"snow").unwrap();

        restore(&layout, 0).unwrap();
        assert_eq!(fs::read(layout.masks_dir().join("land.geojson")).unwrap(), b"land v1");
        assert!(!layout.masks_dir().join("snow.geojson").exists());
        assert!(matches!(restore(&layout, 7), Err(AlcdError::MissingInput { .. })));
    }

    #[test]
    fn test_purge_kfold_dirs() {
        let dir = TempDir::new().unwrap();
        let layout = populated_layout(&dir);
        fs::create_dir_all(layout.kfold_dir(1)).unwrap();
        fs::create_dir_all(layout.kfold_dir(3)).unwrap();

        assert_eq!(purge_kfold_dirs(&layout).unwrap(), 2);
        assert!(!layout.kfold_dir(0).exists());
        assert!(!layout.kfold_dir(1).exists());
        assert!(layout.kfold_dir(3).exists());
    }
}
