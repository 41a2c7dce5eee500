use std::collections::HashMap;
use std::sync::RwLock;

use crate::ObjectStore;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
  objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ObjectStore for InMemoryObjectStore {
  fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
    let mut objects = self.objects.write()?;
    objects.insert((bucket.to_string(), key.to_string()), data.to_vec());
    Ok(())
  }

  fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
    let objects = self.objects.read()?;
    objects
      .get(&(bucket.to_string(), key.to_string()))
      .cloned()
      .ok_or_else(|| StoreError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
      })
  }

  fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
    let mut objects = self.objects.write()?;
    objects.remove(&(bucket.to_string(), key.to_string()));
    Ok(())
  }

  fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
    let objects = self.objects.read()?;
    Ok(objects.contains_key(&(bucket.to_string(), key.to_string())))
  }
}
