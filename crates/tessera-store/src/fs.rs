use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::ObjectStore;
use crate::error::StoreError;

/// Object store backed by the local filesystem.
///
/// Objects are stored at `{root}/{bucket}/{key}`. Keys may contain `/` to
/// form nested directories.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
  root: PathBuf,
}

impl FsObjectStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
    let relative = Path::new(bucket).join(key);
    let escapes = bucket.is_empty()
      || key.is_empty()
      || relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
      return Err(StoreError::backend(format!(
        "invalid object path: {}/{}",
        bucket, key
      )));
    }
    Ok(self.root.join(relative))
  }
}

impl ObjectStore for FsObjectStore {
  fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
    let path = self.path(bucket, key)?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, data)?;
    Ok(())
  }

  fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
    let path = self.path(bucket, key)?;
    std::fs::read(&path).map_err(|e| match e.kind() {
      ErrorKind::NotFound => StoreError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
      },
      _ => StoreError::Io(e),
    })
  }

  fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
    let path = self.path(bucket, key)?;
    match std::fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
    Ok(self.path(bucket, key)?.is_file())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_put_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(dir.path());

    store.put("inputs", "case/1.txt", b"hello").unwrap();
    assert!(store.exists("inputs", "case/1.txt").unwrap());
    assert_eq!(store.get("inputs", "case/1.txt").unwrap(), b"hello");
    assert!(dir.path().join("inputs/case/1.txt").is_file());

    store.delete("inputs", "case/1.txt").unwrap();
    assert!(!store.exists("inputs", "case/1.txt").unwrap());
    store.delete("inputs", "case/1.txt").unwrap();
  }

  #[test]
  fn test_missing_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(dir.path());
    assert!(matches!(
      store.get("inputs", "absent"),
      Err(StoreError::NotFound { .. })
    ));
  }

  #[test]
  fn test_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(dir.path());
    assert!(store.put("inputs", "../escape", b"x").is_err());
    assert!(store.put("/abs", "k", b"x").is_err());
    assert!(store.put("", "k", b"x").is_err());
  }
}
