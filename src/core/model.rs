//! Model abstraction and optional capabilities
//!
//! The pipeline treats a model as an opaque serde value. A model opts into
//! extra behaviour by implementing capability traits and exposing them through
//! the `as_*` accessors on [`Model`]:
//!
//! - [`Validatable`]: report every validation failure before persistence
//! - [`DiffTrackable`]: track which fields a client changed on update
//! - [`Identifiable`]: typed access to the identity field
//!
//! ```rust,ignore
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Page {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     id: Option<ObjectId>,
//!     content: String,
//! }
//!
//! impl Validatable for Page {
//!     fn validate(&self) -> Vec<String> {
//!         if self.content.is_empty() { vec!["Content is required".into()] } else { vec![] }
//!     }
//! }
//!
//! impl Model for Page {
//!     fn as_validatable(&self) -> Option<&dyn Validatable> { Some(self) }
//! }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::object_id::ObjectId;

/// Declared kind of a model field, used for query coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    ObjectId,
    Timestamp,
    Integer,
    Boolean,
    String,
    Other,
}

/// A model validates itself and returns all failure messages
pub trait Validatable {
    fn validate(&self) -> Vec<String>;
}

/// A model that records which of its fields were modified
pub trait DiffTrackable {
    /// Forget every recorded change
    fn reset_tracker(&mut self);

    /// Record that `field` was changed by the client
    fn mark_modified(&mut self, field: &str);
}

/// A model with a typed identity field
pub trait Identifiable {
    fn id(&self) -> Option<ObjectId>;

    fn set_id(&mut self, id: ObjectId);
}

/// Base trait for every resource served by an endpoint
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Declared kind of a field, by stored field name
    fn field_kind(&self, _field: &str) -> FieldKind {
        FieldKind::Other
    }

    fn as_validatable(&self) -> Option<&dyn Validatable> {
        None
    }

    fn as_diff_trackable(&mut self) -> Option<&mut dyn DiffTrackable> {
        None
    }

    fn as_identifiable(&mut self) -> Option<&mut dyn Identifiable> {
        None
    }
}

/// Schemaless documents
impl Model for serde_json::Value {}

/// Produces blank model instances
pub trait ModelFactory<M>: Send + Sync {
    fn create(&self) -> M;
}

impl<M, F> ModelFactory<M> for F
where
    F: Fn() -> M + Send + Sync,
{
    fn create(&self) -> M {
        self()
    }
}

/// Run the model's validation capability, if it has one
pub fn validation_errors<M: Model>(model: &M) -> Vec<String> {
    model
        .as_validatable()
        .map(|validatable| validatable.validate())
        .unwrap_or_default()
}
