use super::{BlobStore, StoredObject};
use crate::models::StorageReference;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

struct MockObject {
    data: Vec<u8>,
    content_type: String,
    version: u64,
}

/// In-memory blob store with hooks for stalling, hanging and rejecting writes.
#[derive(Clone)]
pub struct MockBlobStore {
    files: Arc<Mutex<HashMap<String, MockObject>>>,
    next_version: Arc<AtomicU64>,
    write_count: Arc<Mutex<usize>>,
    base_url: String,
    put_count: Arc<Mutex<usize>>,
    delete_count: Arc<Mutex<usize>>,
    hanging: Arc<AtomicBool>,
    put_gate: Option<Arc<Semaphore>>,
    put_started: Arc<Notify>,
    put_error: Arc<Mutex<Option<fn(String) -> Error>>>,
    delete_error: Arc<Mutex<Option<fn(String) -> Error>>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
            write_count: Arc::new(Mutex::new(0)),
            base_url: "https://mock-storage.example.com".to_string(),
            put_count: Arc::new(Mutex::new(0)),
            delete_count: Arc::new(Mutex::new(0)),
            hanging: Arc::new(AtomicBool::new(false)),
            put_gate: None,
            put_started: Arc::new(Notify::new()),
            put_error: Arc::new(Mutex::new(None)),
            delete_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_file(self, key: String, content: Vec<u8>) -> Self {
        let object = self.object(content, "application/octet-stream");
        self.files.lock().unwrap().insert(key, object);
        self
    }

    fn object(&self, data: Vec<u8>, content_type: &str) -> MockObject {
        MockObject {
            data,
            content_type: content_type.to_string(),
            version: self.next_version.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Puts wait until [`MockBlobStore::release_puts`] hands out a permit.
    pub fn holding_puts(mut self) -> Self {
        self.put_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release_puts(&self, count: usize) {
        if let Some(gate) = &self.put_gate {
            gate.add_permits(count);
        }
    }

    /// Resolves once a put has entered the store.
    pub async fn put_started(&self) {
        self.put_started.notified().await;
    }

    /// While set, puts never resolve.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn fail_puts_with(&self, make_error: fn(String) -> Error) {
        *self.put_error.lock().unwrap() = Some(make_error);
    }

    pub fn fail_deletes_with(&self, make_error: fn(String) -> Error) {
        *self.delete_error.lock().unwrap() = Some(make_error);
    }

    pub fn get_put_count(&self) -> usize {
        *self.put_count.lock().unwrap()
    }

    /// Successful conditional writes (`write_if`).
    pub fn get_write_count(&self) -> usize {
        *self.write_count.lock().unwrap()
    }

    pub fn get_delete_count(&self) -> usize {
        *self.delete_count.lock().unwrap()
    }

    pub fn get_files(&self) -> HashMap<String, Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(key, object)| (key.clone(), object.data.clone()))
            .collect()
    }

    pub fn get_content_type(&self, key: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(key)
            .map(|object| object.content_type.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.lock().unwrap().contains_key(key)
    }
}

impl Default for MockBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<StorageReference> {
        self.put_started.notify_one();

        if let Some(gate) = &self.put_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| Error::Invariant(format!("Mock put gate closed: {}", e)))?;
            permit.forget();
        }

        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let put_error = *self.put_error.lock().unwrap();
        if let Some(make_error) = put_error {
            return Err(make_error(format!("Mock put rejected: {}", path)));
        }

        let object = self.object(data.to_vec(), content_type);
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return Err(Error::PreconditionFailed(format!(
                "Object already exists: {}",
                path
            )));
        }
        files.insert(path.to_string(), object);
        *self.put_count.lock().unwrap() += 1;

        Ok(StorageReference::new(path))
    }

    async fn get_url(&self, reference: &StorageReference) -> Result<String> {
        if !self.contains(reference.as_str()) {
            return Err(Error::NotFound(format!("File not found: {}", reference)));
        }
        Ok(format!("{}/{}", self.base_url, reference))
    }

    async fn delete(&self, reference: &StorageReference) -> Result<()> {
        *self.delete_count.lock().unwrap() += 1;

        let delete_error = *self.delete_error.lock().unwrap();
        if let Some(make_error) = delete_error {
            return Err(make_error(format!("Mock delete rejected: {}", reference)));
        }

        self.files.lock().unwrap().remove(reference.as_str());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<StoredObject>> {
        Ok(self.files.lock().unwrap().get(path).map(|object| StoredObject {
            data: object.data.clone(),
            version: object.version.to_string(),
        }))
    }

    async fn write_if(
        &self,
        path: &str,
        data: &[u8],
        content_type: &str,
        expected_version: Option<&str>,
    ) -> Result<()> {
        let put_error = *self.put_error.lock().unwrap();
        if let Some(make_error) = put_error {
            return Err(make_error(format!("Mock write rejected: {}", path)));
        }

        let object = self.object(data.to_vec(), content_type);
        let mut files = self.files.lock().unwrap();
        let current = files.get(path).map(|existing| existing.version.to_string());
        if current.as_deref() != expected_version {
            return Err(Error::PreconditionFailed(format!(
                "{} is at version {:?}, expected {:?}",
                path, current, expected_version
            )));
        }
        files.insert(path.to_string(), object);
        *self.write_count.lock().unwrap() += 1;
        Ok(())
    }
}
