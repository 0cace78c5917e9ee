//! Document store for catalog records
//!
//! A narrow, collection-of-JSON-documents interface matching the hosted
//! database the admin panel writes to. [`BlobDocumentStore`] keeps each
//! collection as one JSON object in the image bucket so every instance sees
//! the same records; [`InMemoryDocumentStore`] backs tests.

use crate::storage::BlobStore;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const PROJECTS: &str = "projects";
pub const CLIENTS: &str = "clients";
pub const CONTACTS: &str = "contacts";
pub const SUBSCRIBERS: &str = "subscribers";

/// Bucket prefix holding one `<collection>.json` object per collection.
pub const CATALOG_ROOT: &str = "catalog";

const WRITE_RETRY_INTERVAL_MS: u64 = 50;
const WRITE_RETRIES: usize = 5;

/// A stored document: its id and its fields (never containing `id`).
pub type Document = (String, Value);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document and return its generated id.
    async fn insert(&self, collection: &str, fields: Value) -> Result<String>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// Merge `fields` into an existing document. `NotFound` if it is missing.
    async fn patch(&self, collection: &str, id: &str, fields: Value) -> Result<()>;

    /// Remove a document, returning its last fields if it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Indexed equality lookup on a top-level field.
    async fn find_by(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>>;
}

/// Serialize a record's fields for storage.
pub fn to_fields<T: Serialize>(record: &T) -> Result<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    Ok(value)
}

/// Rebuild a typed record from a stored document.
pub fn from_document<T: DeserializeOwned>(id: &str, fields: Value) -> Result<T> {
    let mut map = match fields {
        Value::Object(map) => map,
        other => {
            return Err(Error::Invariant(format!(
                "Document {} is not an object: {}",
                id, other
            )))
        }
    };
    map.insert("id".to_string(), Value::String(id.to_string()));
    Ok(serde_json::from_value(Value::Object(map))?)
}

fn object(fields: Value) -> Result<Map<String, Value>> {
    match fields {
        Value::Object(map) => Ok(map),
        other => Err(Error::Validation(format!(
            "Document fields must be an object, got {}",
            other
        ))),
    }
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Map<String, Value>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, fields: Value) -> Result<String> {
        let mut fields = object(fields)?;
        fields.remove("id");
        let id = Uuid::new_v4().simple().to_string();

        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Value::Object(fields.clone())))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn patch(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let updates = object(fields)?;
        let mut collections = self.collections.lock().unwrap();
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;

        for (key, value) in updates {
            if key != "id" {
                existing.insert(key, value);
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .map(Value::Object))
    }

    async fn find_by(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| fields.get(field) == Some(value))
                    .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// All documents of one collection, keyed by id.
type Collection = Map<String, Value>;

pub struct BlobDocumentStore {
    blobs: Arc<dyn BlobStore>,
    root: String,
}

impl BlobDocumentStore {
    pub fn new(blobs: Arc<dyn BlobStore>, root: impl Into<String>) -> Self {
        Self {
            blobs,
            root: root.into().trim_matches('/').to_string(),
        }
    }

    pub fn collection_path(&self, collection: &str) -> String {
        format!("{}/{}.json", self.root, collection)
    }

    async fn load(&self, path: &str) -> Result<(Collection, Option<String>)> {
        match self.blobs.read(path).await? {
            Some(object) => {
                let docs: Collection = serde_json::from_slice(&object.data)?;
                Ok((docs, Some(object.version)))
            }
            None => Ok((Collection::new(), None)),
        }
    }

    /// Apply `change` to the collection and write it back if it changed.
    /// Retried from a fresh read when another writer got there first.
    async fn update<T, F>(&self, collection: &str, change: F) -> Result<T>
    where
        T: Send,
        F: Fn(&mut Collection) -> Result<T> + Send + Sync,
    {
        let change = &change;
        let strategy = FixedInterval::from_millis(WRITE_RETRY_INTERVAL_MS).take(WRITE_RETRIES);

        RetryIf::spawn(
            strategy,
            move || self.try_update(collection, change),
            |e: &Error| {
                let lost_race = matches!(e, Error::PreconditionFailed(_));
                if lost_race {
                    warn!("Collection {} changed while writing. Will retry...", collection);
                }
                lost_race
            },
        )
        .await
    }

    async fn try_update<T, F>(&self, collection: &str, change: &F) -> Result<T>
    where
        F: Fn(&mut Collection) -> Result<T>,
    {
        let path = self.collection_path(collection);
        let (mut docs, version) = self.load(&path).await?;
        let before = docs.clone();

        let outcome = change(&mut docs)?;
        if docs != before {
            let body = serde_json::to_vec_pretty(&docs)?;
            self.blobs
                .write_if(&path, &body, "application/json", version.as_deref())
                .await?;
            debug!("Wrote {} ({} documents)", path, docs.len());
        }
        Ok(outcome)
    }
}

#[async_trait]
impl DocumentStore for BlobDocumentStore {
    async fn insert(&self, collection: &str, fields: Value) -> Result<String> {
        let mut fields = object(fields)?;
        fields.remove("id");
        let id = Uuid::new_v4().simple().to_string();

        self.update(collection, |docs| {
            docs.insert(id.clone(), Value::Object(fields.clone()));
            Ok(())
        })
        .await?;
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let (mut docs, _) = self.load(&self.collection_path(collection)).await?;
        Ok(docs.remove(id))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let (docs, _) = self.load(&self.collection_path(collection)).await?;
        Ok(docs.into_iter().collect())
    }

    async fn patch(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let updates = object(fields)?;

        self.update(collection, |docs| {
            let existing = docs
                .get_mut(id)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
            for (key, value) in &updates {
                if key != "id" {
                    existing.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.update(collection, |docs| Ok(docs.remove(id))).await
    }

    async fn find_by(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>> {
        let (docs, _) = self.load(&self.collection_path(collection)).await?;
        Ok(docs
            .into_iter()
            .filter(|(_, fields)| fields.get(field) == Some(value))
            .collect())
    }
}
