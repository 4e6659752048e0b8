//! Directory-backed durable store.
//!
//! Each key maps to one file: `fp/ak/0` lives at `<root>/fp/ak/0.val`. Writes
//! go to `<name>.val.tmp`, are synced, then renamed over the target so a key
//! is either fully old or fully new after a crash. Leftover temp files are
//! ignored by [`load`](DurableStore::load) and overwritten by the next write.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::keys::{self, SEPARATOR};
use super::lock::OwnerLock;
use super::{io_context, DurableStore};
use crate::{StorageError, StorageResult};

const VALUE_EXTENSION: &str = ".val";
const TEMP_SUFFIX: &str = ".tmp";
const LOCK_FILENAME: &str = ".owner.lock";

/// Durable store keeping one file per key under a root directory.
///
/// Opening a store takes an exclusive lock on the root; a second `open` of
/// the same root fails until the first store is dropped.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    _owner: OwnerLock,
}

impl FileStore {
    /// Opens (creating if needed) the store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the root is
    /// already owned by another open store.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|err| StorageError::io(format!("create {}", root.display()), &err))?;
        let owner = OwnerLock::acquire(&root.join(LOCK_FILENAME))?;
        log::debug!("opened file store at {}", root.display());
        Ok(Self {
            root,
            _owner: owner,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        let mut segments = key.split(SEPARATOR).peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}{VALUE_EXTENSION}"));
            }
        }
        path
    }

    fn subtree_dir(&self, subtree: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(subtree.split(SEPARATOR));
        path
    }
}

impl DurableStore for FileStore {
    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        keys::validate(key)?;
        let path = self.value_path(key);
        let io_err = |err: std::io::Error| StorageError::io(io_context("write", key), &err);

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(io_err)?;

        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp).map_err(io_err)?;
        file.write_all(value).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&temp, &path).map_err(io_err)?;
        sync_dir(parent).map_err(io_err)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        keys::validate(key)?;
        let path = self.value_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StorageError::io(io_context("delete", key), &err)),
        }
        let parent = path.parent().unwrap_or(&self.root);
        sync_dir(parent).map_err(|err| StorageError::io(io_context("delete", key), &err))
    }

    fn load(&self, subtree: &str, visitor: &mut dyn FnMut(&str, &[u8])) -> StorageResult<()> {
        keys::validate(subtree)?;
        let dir = self.subtree_dir(subtree);
        if !dir.is_dir() {
            return Ok(());
        }

        let mut found = Vec::new();
        collect_values(&dir, "", &mut found)
            .map_err(|err| StorageError::io(io_context("load", subtree), &err))?;
        found.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, path) in found {
            let key = keys::join(subtree, &name);
            if keys::validate(&key).is_err() {
                log::warn!("skipping stray file {}", path.display());
                continue;
            }
            let value =
                fs::read(&path).map_err(|err| StorageError::io(io_context("read", &key), &err))?;
            visitor(&name, &value);
        }
        Ok(())
    }

    /// Removes the subtree directory as a whole, including temp files left by
    /// an interrupted write and files whose names are not valid keys.
    fn delete_subtree(&self, subtree: &str) -> StorageResult<()> {
        keys::validate(subtree)?;
        let dir = self.subtree_dir(subtree);
        let io_err = |err: std::io::Error| StorageError::io(io_context("delete", subtree), &err);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_err(err)),
        }
        let parent = dir.parent().unwrap_or(&self.root);
        sync_dir(parent).map_err(io_err)
    }
}

/// Collects `(relative name, path)` for every value file below `dir`.
fn collect_values(
    dir: &Path,
    prefix: &str,
    out: &mut Vec<(String, PathBuf)>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        let name = if prefix.is_empty() {
            file_name.clone()
        } else {
            format!("{prefix}{SEPARATOR}{file_name}")
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_values(&entry.path(), &name, out)?;
        } else if let Some(stripped) = name.strip_suffix(VALUE_EXTENSION) {
            if file_name.len() > VALUE_EXTENSION.len() {
                out.push((stripped.to_string(), entry.path()));
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
