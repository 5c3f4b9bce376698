// backup.rs - timestamped copies of a local image directory, with retention and restore

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const METADATA_FILE: &str = "backup-metadata.json";
pub const BACKUP_PREFIX: &str = "images-";
pub const DEFAULT_RETENTION: usize = 5;
pub const LATEST: &str = "latest";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid backup metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("source directory {0} does not exist")]
    MissingSource(PathBuf),

    #[error("backups directory {0} is inside the source directory")]
    NestedInSource(PathBuf),

    #[error("backup {backup} and restore target {target} overlap")]
    OverlapsTarget { backup: PathBuf, target: PathBuf },

    #[error("backup {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("no backup named {0}")]
    NotFound(String),
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub file_count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub metadata: BackupMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub bytes: u64,
}

/// Directory name for a backup taken at `now`; sorts chronologically.
pub fn backup_name(now: DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, now.format("%Y%m%dT%H%M%S%3fZ"))
}

// Symlinks are never followed. `skip` only applies to the top level.
fn copy_tree(
    src: &Path,
    dst: &Path,
    skip: Option<&str>,
    stats: &mut CopyStats,
) -> Result<(), BackupError> {
    fs::create_dir_all(dst).map_err(io_at(dst))?;

    for entry in fs::read_dir(src).map_err(io_at(src))? {
        let entry = entry.map_err(io_at(src))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_at(&path))?;
        let name = entry.file_name();

        if skip.map_or(false, |s| name == s) {
            continue;
        }
        let target = dst.join(&name);

        if file_type.is_symlink() {
            debug!("Skipping symlink {}", path.display());
        } else if file_type.is_dir() {
            copy_tree(&path, &target, None, stats)?;
        } else if file_type.is_file() {
            stats.bytes += fs::copy(&path, &target).map_err(io_at(&path))?;
            stats.files += 1;
        }
    }
    Ok(())
}

// Canonical form of a path that may not exist yet: the deepest existing
// ancestor is canonicalized and the missing components are appended.
fn resolve_path(path: &Path) -> Result<PathBuf, BackupError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_err(io_at(path))?.join(path)
    };

    let mut missing = vec![];
    let mut existing = absolute.as_path();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize().map_err(io_at(existing))?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

fn read_metadata(dir: &Path) -> Result<Option<BackupMetadata>, BackupError> {
    let path = dir.join(METADATA_FILE);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_at(&path)(e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| BackupError::Metadata { path, source })
}

/// Copies `source` into a new timestamped directory under `backups_root`,
/// then prunes down to the newest `keep` backups.
pub fn create_backup(
    source: &Path,
    backups_root: &Path,
    now: DateTime<Utc>,
    keep: usize,
) -> Result<BackupEntry, BackupError> {
    if !source.is_dir() {
        return Err(BackupError::MissingSource(source.to_path_buf()));
    }
    let canonical_source = source.canonicalize().map_err(io_at(source))?;
    if resolve_path(backups_root)?.starts_with(&canonical_source) {
        return Err(BackupError::NestedInSource(backups_root.to_path_buf()));
    }
    fs::create_dir_all(backups_root).map_err(io_at(backups_root))?;

    let name = backup_name(now);
    let path = backups_root.join(&name);
    if path.exists() {
        return Err(BackupError::AlreadyExists(path));
    }

    let mut stats = CopyStats::default();
    if let Err(e) = copy_tree(source, &path, None, &mut stats) {
        // Never leave a half-written backup that looks complete
        let _ = fs::remove_dir_all(&path);
        return Err(e);
    }

    let metadata = BackupMetadata {
        created_at: now,
        source: canonical_source.display().to_string(),
        file_count: stats.files,
        total_bytes: stats.bytes,
    };
    let metadata_path = path.join(METADATA_FILE);
    let raw = serde_json::to_vec_pretty(&metadata).map_err(|source| BackupError::Metadata {
        path: metadata_path.clone(),
        source,
    })?;
    fs::write(&metadata_path, raw).map_err(io_at(&metadata_path))?;
    info!(
        "Backed up {} file(s), {} bytes to {}",
        stats.files,
        stats.bytes,
        path.display()
    );

    let removed = prune_backups(backups_root, keep)?;
    if !removed.is_empty() {
        info!("Pruned {} old backup(s)", removed.len());
    }

    Ok(BackupEntry {
        name,
        path,
        metadata,
    })
}

/// Completed backups, newest first. Directories without metadata are ignored.
pub fn list_backups(backups_root: &Path) -> Result<Vec<BackupEntry>, BackupError> {
    if !backups_root.exists() {
        return Ok(vec![]);
    }

    let mut entries = vec![];
    for entry in fs::read_dir(backups_root).map_err(io_at(backups_root))? {
        let entry = entry.map_err(io_at(backups_root))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(BACKUP_PREFIX) || !path.is_dir() {
            continue;
        }

        match read_metadata(&path) {
            Ok(Some(metadata)) => entries.push(BackupEntry {
                name,
                path,
                metadata,
            }),
            Ok(None) => debug!("Ignoring {} without metadata", path.display()),
            Err(e) => warn!("Ignoring unreadable backup: {}", e),
        }
    }

    entries.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(entries)
}

/// Deletes all but the newest `keep` backups (at least one is kept).
pub fn prune_backups(backups_root: &Path, keep: usize) -> Result<Vec<PathBuf>, BackupError> {
    let mut removed = vec![];
    for entry in list_backups(backups_root)?.into_iter().skip(keep.max(1)) {
        fs::remove_dir_all(&entry.path).map_err(io_at(&entry.path))?;
        debug!("Removed backup {}", entry.name);
        removed.push(entry.path);
    }
    Ok(removed)
}

/// `latest` or an exact backup directory name.
pub fn resolve_backup(backups_root: &Path, name: &str) -> Result<BackupEntry, BackupError> {
    let backups = list_backups(backups_root)?;
    let found = if name == LATEST {
        backups.into_iter().next()
    } else {
        backups.into_iter().find(|b| b.name == name)
    };
    found.ok_or_else(|| BackupError::NotFound(name.to_string()))
}

/// Copies a backup into `target`. With `clear_existing` the target is emptied first,
/// otherwise files from the backup overwrite same-named ones and others are left alone.
pub fn restore_backup(
    backup_dir: &Path,
    target: &Path,
    clear_existing: bool,
) -> Result<CopyStats, BackupError> {
    if read_metadata(backup_dir)?.is_none() {
        return Err(BackupError::NotFound(backup_dir.display().to_string()));
    }

    // Clearing a parent would delete the backup, copying into it would recurse
    let backup = backup_dir.canonicalize().map_err(io_at(backup_dir))?;
    let resolved_target = resolve_path(target)?;
    if resolved_target.starts_with(&backup) || backup.starts_with(&resolved_target) {
        return Err(BackupError::OverlapsTarget {
            backup,
            target: resolved_target,
        });
    }

    if clear_existing && target.exists() {
        warn!("Clearing {} before restore", target.display());
        fs::remove_dir_all(target).map_err(io_at(target))?;
    }

    let mut stats = CopyStats::default();
    copy_tree(backup_dir, target, Some(METADATA_FILE), &mut stats)?;
    info!(
        "Restored {} file(s), {} bytes into {}",
        stats.files,
        stats.bytes,
        target.display()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, second).unwrap()
    }

    fn seed(dir: &Path) {
        fs::create_dir_all(dir.join("properties/hk-1")).unwrap();
        fs::write(dir.join("logo.png"), b"1234").unwrap();
        fs::write(dir.join("properties/hk-1/front.jpg"), b"123456").unwrap();
    }

    #[test]
    fn backup_names_sort_by_time() {
        assert_eq!(backup_name(at(5)), "images-20260301T120005000Z");
        assert!(backup_name(at(5)) < backup_name(at(6)));
    }

    #[test]
    fn backup_copies_the_tree_and_writes_metadata() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        let root = work.path().join("backups");
        seed(&source);

        let entry = create_backup(&source, &root, at(0), DEFAULT_RETENTION).unwrap();
        assert_eq!(entry.name, "images-20260301T120000000Z");
        assert_eq!(entry.metadata.file_count, 2);
        assert_eq!(entry.metadata.total_bytes, 10);
        assert_eq!(
            fs::read(entry.path.join("properties/hk-1/front.jpg")).unwrap(),
            b"123456"
        );

        let raw = fs::read_to_string(entry.path.join(METADATA_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["fileCount"], 2);
        assert_eq!(json["totalBytes"], 10);
        assert!(json["createdAt"].as_str().unwrap().starts_with("2026-03-01T12:00:00"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_copied() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        seed(&source);
        std::os::unix::fs::symlink(source.join("logo.png"), source.join("alias.png")).unwrap();

        let entry = create_backup(&source, &work.path().join("b"), at(0), 1).unwrap();
        assert_eq!(entry.metadata.file_count, 2);
        assert!(!entry.path.join("alias.png").exists());
    }

    #[test]
    fn retention_keeps_the_newest() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        let root = work.path().join("backups");
        seed(&source);

        for second in 0..4 {
            create_backup(&source, &root, at(second), 2).unwrap();
        }
        let names: Vec<String> = list_backups(&root).unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(
            names,
            vec!["images-20260301T120003000Z", "images-20260301T120002000Z"]
        );
    }

    #[test]
    fn listing_ignores_incomplete_and_foreign_directories() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        let root = work.path().join("backups");
        seed(&source);
        create_backup(&source, &root, at(0), 5).unwrap();

        fs::create_dir_all(root.join("images-20990101T000000000Z")).unwrap();
        fs::create_dir_all(root.join("notes")).unwrap();
        let broken = root.join("images-20980101T000000000Z");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(METADATA_FILE), b"{not json").unwrap();

        let backups = list_backups(&root).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "images-20260301T120000000Z");
        assert!(list_backups(&work.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn resolve_finds_latest_or_named() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        let root = work.path().join("backups");
        seed(&source);
        create_backup(&source, &root, at(0), 5).unwrap();
        create_backup(&source, &root, at(1), 5).unwrap();

        assert_eq!(
            resolve_backup(&root, LATEST).unwrap().name,
            "images-20260301T120001000Z"
        );
        assert_eq!(
            resolve_backup(&root, "images-20260301T120000000Z").unwrap().name,
            "images-20260301T120000000Z"
        );
        assert!(matches!(
            resolve_backup(&root, "images-nope"),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn restore_can_clear_or_merge() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        let root = work.path().join("backups");
        seed(&source);
        let entry = create_backup(&source, &root, at(0), 5).unwrap();

        let target = work.path().join("restored");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.jpg"), b"old").unwrap();

        let stats = restore_backup(&entry.path, &target, false).unwrap();
        assert_eq!(stats, CopyStats { files: 2, bytes: 10 });
        assert!(target.join("stale.jpg").exists());
        assert!(target.join("properties/hk-1/front.jpg").exists());
        assert!(!target.join(METADATA_FILE).exists());

        restore_backup(&entry.path, &target, true).unwrap();
        assert!(!target.join("stale.jpg").exists());
        assert!(target.join("logo.png").exists());
    }

    #[test]
    fn invalid_sources_are_refused() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        assert!(matches!(
            create_backup(&source, &work.path().join("b"), at(0), 5),
            Err(BackupError::MissingSource(_))
        ));

        seed(&source);
        let nested = source.join("backups");
        assert!(matches!(
            create_backup(&source, &nested.join("daily"), at(0), 5),
            Err(BackupError::NestedInSource(_))
        ));
        // a refused backup leaves nothing behind in the source
        assert!(!nested.exists());
        assert!(matches!(
            restore_backup(&source, &work.path().join("t"), false),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn restore_refuses_a_parent_of_the_backup() {
        let work = tempdir().unwrap();
        let data = work.path().join("data");
        let source = work.path().join("images");
        seed(&source);
        let entry = create_backup(&source, &data.join("backups"), at(0), 5).unwrap();

        for clear in [true, false] {
            assert!(matches!(
                restore_backup(&entry.path, &data, clear),
                Err(BackupError::OverlapsTarget { .. })
            ));
        }
        assert!(entry.path.join(METADATA_FILE).exists());
        assert!(entry.path.join("logo.png").exists());
    }

    #[test]
    fn restore_refuses_a_target_inside_the_backup() {
        let work = tempdir().unwrap();
        let source = work.path().join("images");
        seed(&source);
        let entry = create_backup(&source, &work.path().join("backups"), at(0), 5).unwrap();

        assert!(matches!(
            restore_backup(&entry.path, &entry.path.join("restored"), false),
            Err(BackupError::OverlapsTarget { .. })
        ));
        assert!(!entry.path.join("restored").exists());
    }

    #[test]
    fn missing_paths_resolve_under_their_existing_ancestor() {
        let work = tempdir().unwrap();
        let base = work.path().canonicalize().unwrap();
        assert_eq!(
            resolve_path(&work.path().join("a/b")).unwrap(),
            base.join("a").join("b")
        );
        assert_eq!(resolve_path(work.path()).unwrap(), base);
    }
}
