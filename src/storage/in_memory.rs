//! In-memory storage engine for testing and development
//!
//! Understands the subset of the MongoDB filter dialect the translator and
//! hooks produce: literal equality (arrays match when any element matches),
//! `$in`, `$nin`, `$ne`, `$lt`, `$lte`, `$gt`, `$gte`, `$regex` with
//! `$options`, `$exists`, `$and`, `$or`, dotted paths, and the extended JSON
//! literals `$oid` and `$date`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Collection, Cursor, Database, SaveResult};
use crate::core::error::StorageError;
use crate::core::filter::{DATE_KEY, Document, Filter, ID_FIELD, date_from_value, is_operator_map};
use crate::core::object_id::{OID_KEY, ObjectId};
use crate::core::query::{PaginationInfo, SortDirection, SortField};

/// In-memory database
///
/// Collections are created on first access and shared by every clone.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    collections: Arc<RwLock<HashMap<String, Arc<InMemoryCollection>>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, name: &str) -> Arc<InMemoryCollection> {
        if let Ok(collections) = self.collections.read() {
            if let Some(existing) = collections.get(name) {
                return existing.clone();
            }
        }
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryCollection::new(name)))
            .clone()
    }

    /// Snapshot of every document in a collection, in insertion order
    pub fn documents(&self, name: &str) -> Vec<Document> {
        self.get_or_create(name).snapshot()
    }
}

impl Database for InMemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.get_or_create(name)
    }
}

/// One in-memory collection
pub struct InMemoryCollection {
    name: String,
    documents: RwLock<Vec<Document>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<Document> {
        self.documents
            .read()
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    fn matching(&self, filter: &Filter) -> Result<Vec<Document>, StorageError> {
        let documents = self
            .documents
            .read()
            .map_err(|e| StorageError::Backend(format!("Failed to acquire read lock: {}", e)))?;

        Ok(documents
            .iter()
            .filter(|doc| matches(doc, filter.as_map()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Filter) -> Result<Box<dyn Cursor>, StorageError> {
        Ok(Box::new(InMemoryCursor::new(self.matching(filter)?)))
    }

    async fn find_one(&self, filter: &Filter) -> Result<Document, StorageError> {
        self.matching(filter)?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)
    }

    async fn save(&self, document: &mut Document) -> Result<SaveResult, StorageError> {
        let id = document
            .get(ID_FIELD)
            .and_then(id_string)
            .unwrap_or_else(|| ObjectId::new().to_hex());
        document.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        let mut documents = self
            .documents
            .write()
            .map_err(|e| StorageError::Backend(format!("Failed to acquire write lock: {}", e)))?;

        match documents
            .iter_mut()
            .find(|doc| doc.get(ID_FIELD).and_then(id_string).as_deref() == Some(id.as_str()))
        {
            Some(existing) => *existing = document.clone(),
            None => documents.push(document.clone()),
        }

        Ok(SaveResult::ok())
    }

    async fn delete(&self, document: &Document) -> Result<(), StorageError> {
        let id = document
            .get(ID_FIELD)
            .and_then(id_string)
            .ok_or(StorageError::NotFound)?;

        let mut documents = self
            .documents
            .write()
            .map_err(|e| StorageError::Backend(format!("Failed to acquire write lock: {}", e)))?;

        let before = documents.len();
        documents.retain(|doc| doc.get(ID_FIELD).and_then(id_string).as_deref() != Some(id.as_str()));
        if documents.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn upsert(&self, key: &Filter, mut document: Document) -> Result<(), StorageError> {
        if let Some(id) = document.get(ID_FIELD).and_then(id_string) {
            document.insert(ID_FIELD.to_string(), Value::String(id));
        }

        let mut documents = self
            .documents
            .write()
            .map_err(|e| StorageError::Backend(format!("Failed to acquire write lock: {}", e)))?;

        match documents.iter_mut().find(|doc| matches(doc, key.as_map())) {
            Some(existing) => *existing = document,
            None => documents.push(document),
        }
        Ok(())
    }
}

/// Cursor over a materialized result set
pub struct InMemoryCursor {
    documents: Vec<Document>,
    position: usize,
    end: usize,
}

impl InMemoryCursor {
    fn new(documents: Vec<Document>) -> Self {
        let end = documents.len();
        Self {
            documents,
            position: 0,
            end,
        }
    }
}

#[async_trait]
impl Cursor for InMemoryCursor {
    fn sort(&mut self, fields: &[SortField]) {
        if fields.is_empty() {
            return;
        }
        self.documents.sort_by(|a, b| {
            fields
                .iter()
                .map(|field| {
                    let ordering = sort_order(lookup(a, &field.field), lookup(b, &field.field));
                    match field.direction {
                        SortDirection::Ascending => ordering,
                        SortDirection::Descending => ordering.reverse(),
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    async fn paginate(&mut self, per_page: usize, page: usize) -> Result<PaginationInfo, StorageError> {
        let info = PaginationInfo::compute(self.documents.len(), per_page, page);
        self.position = info.offset();
        self.end = self.position + info.records_on_page;
        Ok(info)
    }

    async fn next(&mut self) -> Result<Option<Document>, StorageError> {
        if self.position >= self.end {
            return Ok(None);
        }
        let document = self.documents.get(self.position).cloned();
        self.position += 1;
        Ok(document)
    }
}

/// Identity as a hex string, from either a plain string or `{"$oid": ...}`
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get(OID_KEY).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Whether a document satisfies a filter expression
pub fn matches(document: &Document, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => sub_filters(condition).is_some_and(|mut subs| subs.all(|f| matches(document, f))),
        "$or" => sub_filters(condition).is_some_and(|mut subs| subs.any(|f| matches(document, f))),
        field => field_matches(lookup(document, field), condition),
    })
}

fn sub_filters(condition: &Value) -> Option<impl Iterator<Item = &Map<String, Value>>> {
    let items = condition.as_array()?;
    if items.iter().any(|item| !item.is_object()) {
        return None;
    }
    Some(items.iter().filter_map(Value::as_object))
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if is_operator_map(ops) => ops
            .iter()
            .all(|(op, operand)| operator_matches(op, operand, value, ops)),
        literal => equals_or_contains(value, literal),
    }
}

fn operator_matches(op: &str, operand: &Value, value: Option<&Value>, ops: &Map<String, Value>) -> bool {
    match op {
        "$eq" => equals_or_contains(value, operand),
        "$ne" => !equals_or_contains(value, operand),
        "$in" => operand
            .as_array()
            .is_some_and(|members| members.iter().any(|m| equals_or_contains(value, m))),
        "$nin" => operand
            .as_array()
            .is_some_and(|members| !members.iter().any(|m| equals_or_contains(value, m))),
        "$exists" => operand.as_bool().unwrap_or(true) == value.is_some(),
        "$lt" => compares(value, operand, |o| o == Ordering::Less),
        "$lte" => compares(value, operand, |o| o != Ordering::Greater),
        "$gt" => compares(value, operand, |o| o == Ordering::Greater),
        "$gte" => compares(value, operand, |o| o != Ordering::Less),
        "$regex" => {
            let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
            regex_matches(value, operand, options)
        }
        "$options" => true,
        unknown => {
            tracing::debug!(operator = %unknown, "unsupported filter operator");
            false
        }
    }
}

fn equals_or_contains(value: Option<&Value>, literal: &Value) -> bool {
    match value {
        None => literal.is_null(),
        Some(Value::Array(items)) if !literal.is_array() => {
            items.iter().any(|item| values_equal(item, literal))
        }
        Some(v) => values_equal(v, literal),
    }
}

fn compares(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, operand).is_some_and(&accept)),
        Some(v) => compare_values(v, operand).is_some_and(accept),
        None => false,
    }
}

fn regex_matches(value: Option<&Value>, pattern: &Value, options: &str) -> bool {
    let Some(pattern) = pattern.as_str() else {
        return false;
    };
    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
    {
        Ok(regex) => regex,
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "invalid regex in filter");
            return false;
        }
    };
    match value {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| regex.is_match(s)),
        _ => false,
    }
}

/// Resolve extended JSON literals to the form documents store them in
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key(OID_KEY) => {
            id_string(value).map(Value::String).unwrap_or_else(|| value.clone())
        }
        other => other.clone(),
    }
}

fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Object(map) if map.contains_key(DATE_KEY) => date_from_value(value),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

fn is_date_literal(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key(DATE_KEY))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if is_date_literal(a) || is_date_literal(b) {
        return match (as_datetime(a), as_datetime(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
    }
    let (a, b) = (normalize(a), normalize(b));
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if is_date_literal(a) || is_date_literal(b) {
        return Some(as_datetime(a)?.cmp(&as_datetime(b)?));
    }
    match (normalize(a), normalize(b)) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(&y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(&y)),
        _ => None,
    }
}

/// Sort position of a value: a type rank and, within numbers, strings,
/// dates and booleans, the value itself. `$oid` literals rank as strings and
/// `$date` literals as dates, so every pair lands in exactly one bucket.
enum SortKey {
    Missing,
    Number(f64),
    Text(String),
    Date(Option<DateTime<Utc>>),
    Object,
    Array,
    Bool(bool),
}

impl SortKey {
    fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SortKey::Missing,
            Some(Value::Number(n)) => SortKey::Number(n.as_f64().unwrap_or(f64::NAN)),
            Some(Value::String(s)) => SortKey::Text(s.clone()),
            Some(v) if is_date_literal(v) => SortKey::Date(date_from_value(v)),
            Some(v @ Value::Object(_)) => match normalize(v) {
                Value::String(s) => SortKey::Text(s),
                _ => SortKey::Object,
            },
            Some(Value::Array(_)) => SortKey::Array,
            Some(Value::Bool(b)) => SortKey::Bool(*b),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
            SortKey::Date(_) => 3,
            SortKey::Object => 4,
            SortKey::Array => 5,
            SortKey::Bool(_) => 6,
        }
    }
}

/// Total order used for sorting; missing values sort first
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (SortKey::of(a), SortKey::of(b)) {
        (SortKey::Number(x), SortKey::Number(y)) => x.total_cmp(&y),
        (SortKey::Text(x), SortKey::Text(y)) => x.cmp(&y),
        (SortKey::Date(x), SortKey::Date(y)) => x.cmp(&y),
        (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(&y),
        (x, y) => x.rank().cmp(&y.rank()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn filter(value: Value) -> Filter {
        Filter::from_value(value).unwrap()
    }

    async fn seeded() -> (InMemoryDatabase, Arc<dyn Collection>) {
        let db = InMemoryDatabase::new();
        let pages = db.collection("pages");
        for (content, rank, tags) in [("alpha", 1, vec!["a"]), ("beta", 2, vec!["b", "c"]), ("Gamma", 3, vec![])] {
            let mut d = doc(json!({"content": content, "rank": rank, "tags": tags}));
            pages.save(&mut d).await.unwrap();
        }
        (db, pages)
    }

    async fn contents(pages: &Arc<dyn Collection>, f: Value) -> Vec<String> {
        let mut cursor = pages.find(&filter(f)).await.unwrap();
        let mut out = Vec::new();
        while let Some(d) = cursor.next().await.unwrap() {
            out.push(d["content"].as_str().unwrap().to_string());
        }
        out
    }

    #[tokio::test]
    async fn test_save_assigns_id() {
        let db = InMemoryDatabase::new();
        let pages = db.collection("pages");
        let mut d = doc(json!({"content": "foo"}));
        pages.save(&mut d).await.unwrap();

        let id = d[ID_FIELD].as_str().unwrap().to_string();
        assert!(ObjectId::is_valid(&id));

        let found = pages
            .find_one(&Filter::by_id(&ObjectId::parse_str(&id).unwrap()))
            .await
            .unwrap();
        assert_eq!(found["content"], "foo");
        assert_eq!(db.documents("pages").len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_existing() {
        let (db, pages) = seeded().await;
        let mut first = db.documents("pages").remove(0);
        first.insert("content".into(), json!("changed"));
        pages.save(&mut first).await.unwrap();

        let docs = db.documents("pages");
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["content"], "changed");
    }

    #[tokio::test]
    async fn test_operators() {
        let (_db, pages) = seeded().await;

        assert_eq!(contents(&pages, json!({"content": "beta"})).await, vec!["beta"]);
        assert_eq!(contents(&pages, json!({"tags": "c"})).await, vec!["beta"]);
        assert_eq!(contents(&pages, json!({"rank": {"$gte": 2}})).await, vec!["beta", "Gamma"]);
        assert_eq!(contents(&pages, json!({"rank": {"$gt": 1, "$lt": 3}})).await, vec!["beta"]);
        assert_eq!(contents(&pages, json!({"rank": {"$in": [1, 3]}})).await, vec!["alpha", "Gamma"]);
        assert_eq!(contents(&pages, json!({"rank": {"$nin": [1, 3]}})).await, vec!["beta"]);
        assert_eq!(contents(&pages, json!({"rank": {"$ne": 1}})).await, vec!["beta", "Gamma"]);
        assert_eq!(
            contents(&pages, json!({"content": {"$regex": "^g", "$options": "i"}})).await,
            vec!["Gamma"]
        );
        assert!(contents(&pages, json!({"content": {"$regex": "^g", "$options": ""}})).await.is_empty());
        assert_eq!(contents(&pages, json!({"missing": {"$exists": false}})).await.len(), 3);
        assert_eq!(
            contents(&pages, json!({"$or": [{"rank": 1}, {"content": "Gamma"}]})).await,
            vec!["alpha", "Gamma"]
        );
        assert_eq!(
            contents(&pages, json!({"$and": [{"rank": {"$gt": 1}}, {"tags": "b"}]})).await,
            vec!["beta"]
        );
    }

    #[tokio::test]
    async fn test_oid_and_date_literals() {
        let db = InMemoryDatabase::new();
        let pages = db.collection("pages");
        let id = ObjectId::new();
        let mut d = doc(json!({
            "_id": id.to_hex(),
            "content": "dated",
            "dateValue": "2020-01-01T00:00:00Z",
            "idArr": [id.to_hex()]
        }));
        pages.save(&mut d).await.unwrap();

        assert_eq!(
            contents(&pages, json!({"idArr": {"$in": [{"$oid": id.to_hex()}]}})).await,
            vec!["dated"]
        );
        assert_eq!(
            contents(&pages, json!({"dateValue": {"$gt": {"$date": "2019-01-01T00:00:00.000Z"}}})).await,
            vec!["dated"]
        );
        assert!(
            contents(&pages, json!({"dateValue": {"$lt": {"$date": "2019-01-01T00:00:00.000Z"}}}))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_sort_and_paginate() {
        let (_db, pages) = seeded().await;
        let mut cursor = pages.find(&Filter::new()).await.unwrap();
        cursor.sort(&[SortField::desc("rank")]);
        let info = cursor.paginate(2, 2).await.unwrap();

        assert_eq!(info.current, 2);
        assert_eq!(info.total_pages, 2);
        assert_eq!(info.records_on_page, 1);
        let only = cursor.next().await.unwrap().unwrap();
        assert_eq!(only["content"], "alpha");
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[test]
    fn test_sort_order_is_total_over_mixed_values() {
        let id = ObjectId::new().to_hex();
        let values = [
            None,
            Some(json!(null)),
            Some(json!(2)),
            Some(json!(1.5)),
            Some(json!("0")),
            Some(json!("zzzzzzzzzzzzzzzzzzzzzzzzz")),
            Some(json!({"$oid": id})),
            Some(json!({"$date": "2020-01-01T00:00:00Z"})),
            Some(json!({"$date": "2019-01-01T00:00:00Z"})),
            Some(json!({"nested": 1})),
            Some(json!([1, 2])),
            Some(json!(true)),
            Some(json!(false)),
        ];

        for a in &values {
            for b in &values {
                let ab = sort_order(a.as_ref(), b.as_ref());
                assert_eq!(ab, sort_order(b.as_ref(), a.as_ref()).reverse(), "{a:?} vs {b:?}");
                for c in &values {
                    let bc = sort_order(b.as_ref(), c.as_ref());
                    if ab != Ordering::Greater && bc != Ordering::Greater {
                        assert_ne!(sort_order(a.as_ref(), c.as_ref()), Ordering::Greater, "{a:?} {b:?} {c:?}");
                    }
                }
            }
        }

        // An $oid literal sorts with the strings, below any object
        let oid = json!({"$oid": id});
        assert_eq!(sort_order(Some(&oid), Some(&json!(id))), Ordering::Equal);
        assert_eq!(sort_order(Some(&oid), Some(&json!({"nested": 1}))), Ordering::Less);
        assert_eq!(sort_order(Some(&oid), Some(&json!("zzzzzzzzzzzzzzzzzzzzzzzzz"))), Ordering::Less);
    }

    #[tokio::test]
    async fn test_delete_and_upsert() {
        let (db, pages) = seeded().await;
        let first = db.documents("pages").remove(0);
        pages.delete(&first).await.unwrap();
        assert_eq!(db.documents("pages").len(), 2);
        assert_eq!(pages.delete(&first).await, Err(StorageError::NotFound));

        let archive = db.collection("pages_deleted");
        let id = ObjectId::parse_str(first[ID_FIELD].as_str().unwrap()).unwrap();
        archive.upsert(&Filter::by_id(&id), first.clone()).await.unwrap();
        archive.upsert(&Filter::by_id(&id), first.clone()).await.unwrap();
        assert_eq!(db.documents("pages_deleted").len(), 1);
    }

    #[tokio::test]
    async fn test_find_one_not_found() {
        let (_db, pages) = seeded().await;
        let result = pages.find_one(&filter(json!({"content": "nope"}))).await;
        assert_eq!(result, Err(StorageError::NotFound));
    }
}
