//! Shared models and storage doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use docrest::prelude::*;
use docrest::storage::{ARCHIVE_SUFFIX, Cursor};
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// Models
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "intValue", default)]
    pub int_value: i64,
    #[serde(rename = "dateValue", default, skip_serializing_if = "Option::is_none")]
    pub date_value: Option<DateTime<Utc>>,
    #[serde(rename = "arrValue", default)]
    pub arr_value: Vec<String>,
    #[serde(rename = "idArr", default)]
    pub id_arr: Vec<ObjectId>,
    #[serde(rename = "idValue", default, skip_serializing_if = "Option::is_none")]
    pub id_value: Option<ObjectId>,
}

impl Page {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }
}

impl Identifiable for Page {
    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

impl Model for Page {
    fn field_kind(&self, field: &str) -> FieldKind {
        match field {
            "_id" | "idValue" | "idArr" => FieldKind::ObjectId,
            "intValue" => FieldKind::Integer,
            "dateValue" => FieldKind::Timestamp,
            "content" => FieldKind::String,
            _ => FieldKind::Other,
        }
    }

    fn as_identifiable(&mut self) -> Option<&mut dyn Identifiable> {
        Some(self)
    }
}

/// Model whose only rule is a required `content`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatedModel {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub content: String,
}

impl Validatable for ValidatedModel {
    fn validate(&self) -> Vec<String> {
        if self.content.is_empty() {
            vec!["Content is required".to_string()]
        } else {
            vec![]
        }
    }
}

impl Model for ValidatedModel {
    fn as_validatable(&self) -> Option<&dyn Validatable> {
        Some(self)
    }
}

/// Model recording which fields the client changed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackedPage {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub changed: Vec<String>,
}

impl DiffTrackable for TrackedPage {
    fn reset_tracker(&mut self) {
        self.changed.clear();
    }

    fn mark_modified(&mut self, field: &str) {
        self.changed.push(field.to_string());
    }
}

impl Model for TrackedPage {
    fn as_diff_trackable(&mut self) -> Option<&mut dyn DiffTrackable> {
        Some(self)
    }
}

// =============================================================================
// Storage double
// =============================================================================

/// Failure modes injected by [`TestDatabase`]
#[derive(Default)]
pub struct Behavior {
    pub finds: AtomicUsize,
    pub saves: AtomicUsize,
    pub fail_all: Mutex<Option<String>>,
    pub reject_save: Mutex<Option<Vec<String>>>,
    pub fail_archive: Mutex<bool>,
}

/// In-memory database with counters and injectable failures
#[derive(Clone, Default)]
pub struct TestDatabase {
    pub inner: InMemoryDatabase,
    pub behavior: Arc<Behavior>,
}

impl TestDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finds(&self) -> usize {
        self.behavior.finds.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.behavior.saves.load(Ordering::SeqCst)
    }

    pub fn fail_all(&self, message: &str) {
        *self.behavior.fail_all.lock().unwrap() = Some(message.to_string());
    }

    pub fn reject_saves(&self, errors: Vec<String>) {
        *self.behavior.reject_save.lock().unwrap() = Some(errors);
    }

    pub fn fail_archive(&self) {
        *self.behavior.fail_archive.lock().unwrap() = true;
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner.documents(collection)
    }

    pub fn handle(&self) -> Arc<dyn Database> {
        Arc::new(self.clone())
    }
}

impl Database for TestDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(TestCollection {
            inner: self.inner.collection(name),
            behavior: self.behavior.clone(),
        })
    }
}

struct TestCollection {
    inner: Arc<dyn Collection>,
    behavior: Arc<Behavior>,
}

impl TestCollection {
    fn check(&self) -> Result<(), StorageError> {
        match self.behavior.fail_all.lock().unwrap().clone() {
            Some(message) => Err(StorageError::Backend(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Collection for TestCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find(&self, filter: &Filter) -> Result<Box<dyn Cursor>, StorageError> {
        self.behavior.finds.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.find(filter).await
    }

    async fn find_one(&self, filter: &Filter) -> Result<Document, StorageError> {
        self.behavior.finds.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.find_one(filter).await
    }

    async fn save(&self, document: &mut Document) -> Result<SaveResult, StorageError> {
        self.behavior.saves.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if let Some(errors) = self.behavior.reject_save.lock().unwrap().clone() {
            return Ok(SaveResult::rejected(errors));
        }
        self.inner.save(document).await
    }

    async fn delete(&self, document: &Document) -> Result<(), StorageError> {
        self.check()?;
        self.inner.delete(document).await
    }

    async fn upsert(&self, key: &Filter, document: Document) -> Result<(), StorageError> {
        self.check()?;
        if *self.behavior.fail_archive.lock().unwrap() && self.name().ends_with(ARCHIVE_SUFFIX) {
            return Err(StorageError::Backend("archive unavailable".to_string()));
        }
        self.inner.upsert(key, document).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Store a page directly, returning its id
pub async fn seed(db: &TestDatabase, collection: &str, page: Page) -> ObjectId {
    let Value::Object(mut document) = serde_json::to_value(&page).unwrap() else {
        panic!("page must serialize to an object");
    };
    db.inner.collection(collection).save(&mut document).await.unwrap();
    ObjectId::parse_str(document["_id"].as_str().unwrap()).unwrap()
}

/// Serve one endpoint through the full server stack
pub fn serve<M: Model>(endpoint: Endpoint<M>) -> TestServer {
    let app = ServerBuilder::new().register(endpoint).build().unwrap();
    TestServer::try_new(app).unwrap()
}

pub fn pages_endpoint(db: &TestDatabase) -> Endpoint<Page> {
    Endpoint::new("/api/pages", db.handle(), Page::default)
}
