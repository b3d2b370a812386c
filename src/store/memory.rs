/// In-Memory Document Store
///
/// Optimistic transactions over a map of documents:
/// - every read records the version it saw (missing documents read as 0)
/// - every query records the version of the collection it scanned
/// - commit aborts if any recorded version moved, checks update
///   preconditions, then swaps in the new state in one step
///
/// Used as the database stand-in for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use tracing::debug;
use super::{DocumentStore, StoreError, Transaction};
use crate::document::{Document, DocumentUpdate, Fields, Value};
use crate::path::{CollectionPath, DocumentPath};

#[derive(Default)]
struct State {
    docs: BTreeMap<DocumentPath, Fields>,
    /// Last write per document; kept after deletes so re-creation is seen.
    doc_versions: HashMap<DocumentPath, u64>,
    collection_versions: HashMap<CollectionPath, u64>,
    clock: u64,
    fail_next_commit: Option<StoreError>,
}

impl State {
    fn doc_version(&self, path: &DocumentPath) -> u64 {
        self.doc_versions.get(path).copied().unwrap_or(0)
    }

    fn collection_version(&self, collection: &CollectionPath) -> u64 {
        self.collection_versions.get(collection).copied().unwrap_or(0)
    }

    fn touch(&mut self, path: &DocumentPath) {
        self.clock += 1;
        let now = self.clock;
        self.doc_versions.insert(path.clone(), now);
        self.collection_versions.insert(path.parent(), now);
    }
}

fn lock(state: &Mutex<State>) -> Result<MutexGuard<'_, State>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a document outside of any transaction.
    pub fn insert(&self, path: DocumentPath, fields: Fields) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;
        state.touch(&path);
        state.docs.insert(path, fields);
        Ok(())
    }

    /// Current committed contents of a document.
    pub fn document(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .docs
            .get(path)
            .map(|fields| Document::new(path.clone(), fields.clone())))
    }

    /// Every committed document, ordered by path.
    pub fn snapshot(&self) -> Result<Vec<Document>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .docs
            .iter()
            .map(|(path, fields)| Document::new(path.clone(), fields.clone()))
            .collect())
    }

    /// Number of committed documents
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.state)?.docs.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Make the next commit fail with `err` without applying anything.
    pub fn inject_commit_failure(&self, err: StoreError) -> Result<(), StoreError> {
        lock(&self.state)?.fail_next_commit = Some(err);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            state: self.state.clone(),
            reads: HashMap::new(),
            queries: HashMap::new(),
            writes: Vec::new(),
        })
    }
}

enum Write {
    Update(DocumentPath, DocumentUpdate),
    Delete(DocumentPath),
}

pub struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    reads: HashMap<DocumentPath, u64>,
    queries: HashMap<CollectionPath, u64>,
    writes: Vec<Write>,
}

impl MemoryTransaction {
    fn ensure_no_writes(&self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(
                "reads must be executed before all writes".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.ensure_no_writes()?;
        let state = lock(&self.state)?;
        self.reads.insert(path.clone(), state.doc_version(path));
        Ok(state
            .docs
            .get(path)
            .map(|fields| Document::new(path.clone(), fields.clone())))
    }

    async fn query_equal(
        &mut self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_no_writes()?;
        let state = lock(&self.state)?;
        self.queries
            .insert(collection.clone(), state.collection_version(collection));

        let matches: Vec<Document> = state
            .docs
            .iter()
            .filter(|(path, fields)| collection.contains(path) && fields.get(field) == Some(value))
            .map(|(path, fields)| Document::new(path.clone(), fields.clone()))
            .collect();

        for doc in &matches {
            self.reads.insert(doc.path.clone(), state.doc_version(&doc.path));
        }

        Ok(matches)
    }

    fn update(&mut self, path: &DocumentPath, update: DocumentUpdate) {
        self.writes.push(Write::Update(path.clone(), update));
    }

    fn delete(&mut self, path: &DocumentPath) {
        self.writes.push(Write::Delete(path.clone()));
    }

    fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;

        if let Some(err) = state.fail_next_commit.take() {
            return Err(err);
        }

        for (path, seen) in &self.reads {
            if state.doc_version(path) != *seen {
                return Err(StoreError::Aborted(format!(
                    "document {} changed since it was read",
                    path
                )));
            }
        }
        for (collection, seen) in &self.queries {
            if state.collection_version(collection) != *seen {
                return Err(StoreError::Aborted(format!(
                    "collection {} changed since it was queried",
                    collection
                )));
            }
        }

        // Apply to a copy so a failed precondition leaves nothing behind
        let mut docs = state.docs.clone();
        for write in &self.writes {
            match write {
                Write::Update(path, update) => {
                    let fields = docs.get_mut(path).ok_or_else(|| {
                        StoreError::PreconditionFailed(format!("no document to update: {}", path))
                    })?;
                    update.apply_to(fields);
                }
                Write::Delete(path) => {
                    docs.remove(path);
                }
            }
        }

        state.docs = docs;
        for write in &self.writes {
            match write {
                Write::Update(path, _) | Write::Delete(path) => state.touch(path),
            }
        }

        debug!(writes = self.writes.len(), "In-memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!(discarded = self.writes.len(), "In-memory transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Number;

    fn path(raw: &str) -> DocumentPath {
        DocumentPath::parse(raw).unwrap()
    }

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes() {
        let store = MemoryStore::new();
        store.insert(path("users/u1"), fields(&[("totalPoints", Value::Integer(1))])).unwrap();
        store.insert(path("users/u1/claims/c1"), Fields::new()).unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get(&path("users/u1")).await.unwrap().is_some());
        tx.update(
            &path("users/u1"),
            DocumentUpdate::new().increment("totalPoints", Number::Integer(4)),
        );
        tx.delete(&path("users/u1/claims/c1"));
        assert_eq!(tx.pending_writes(), 2);
        tx.commit().await.unwrap();

        let user = store.document(&path("users/u1")).unwrap().unwrap();
        assert_eq!(user.get("totalPoints"), Some(&Value::Integer(5)));
        assert!(store.document(&path("users/u1/claims/c1")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_document_applies_nothing() {
        let store = MemoryStore::new();
        store.insert(path("users/u1/claims/c1"), Fields::new()).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete(&path("users/u1/claims/c1"));
        tx.update(
            &path("users/u1"),
            DocumentUpdate::new().increment("totalPoints", Number::Integer(4)),
        );

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
        assert!(store.document(&path("users/u1/claims/c1")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_conflicting_read_aborts() {
        let store = MemoryStore::new();
        store.insert(path("users/u1"), fields(&[("totalPoints", Value::Integer(0))])).unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.get(&path("users/u1")).await.unwrap();
        second.get(&path("users/u1")).await.unwrap();

        let bump = DocumentUpdate::new().increment("totalPoints", Number::Integer(1));
        first.update(&path("users/u1"), bump.clone());
        second.update(&path("users/u1"), bump);

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));

        let user = store.document(&path("users/u1")).unwrap().unwrap();
        assert_eq!(user.get("totalPoints"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_query_conflicts_with_new_document() {
        let store = MemoryStore::new();
        let claims = path("users/u1").collection("claims").unwrap();

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .query_equal(&claims, "rewardRef", &Value::String("x".into()))
            .await
            .unwrap();
        assert!(found.is_empty());

        store
            .insert(path("users/u1/claims/c9"), fields(&[("rewardRef", Value::String("x".into()))]))
            .unwrap();

        tx.delete(&path("users/u1/claims/c0"));
        assert!(matches!(tx.commit().await, Err(StoreError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_query_only_matches_direct_children() {
        let store = MemoryStore::new();
        let target = Value::Reference(path("users/u1/rewards/r1"));
        store.insert(path("users/u1/claims/c1"), fields(&[("rewardRef", target.clone())])).unwrap();
        store.insert(path("users/u2/claims/c1"), fields(&[("rewardRef", target.clone())])).unwrap();
        store
            .insert(
                path("users/u1/claims/c2"),
                fields(&[("rewardRef", Value::Reference(path("users/u1/rewards/r2")))]),
            )
            .unwrap();

        let claims = path("users/u1").collection("claims").unwrap();
        let mut tx = store.begin().await.unwrap();
        let found = tx.query_equal(&claims, "rewardRef", &target).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, path("users/u1/claims/c1"));
    }

    #[tokio::test]
    async fn test_read_after_write_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.delete(&path("users/u1/claims/c1"));
        assert!(matches!(
            tx.get(&path("users/u1")).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_nothing() {
        let store = MemoryStore::new();
        store.insert(path("users/u1/claims/c1"), Fields::new()).unwrap();
        store
            .inject_commit_failure(StoreError::Aborted("simulated".into()))
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete(&path("users/u1/claims/c1"));
        assert!(tx.commit().await.is_err());
        assert_eq!(store.len().unwrap(), 1);

        // Only the next commit fails
        let mut tx = store.begin().await.unwrap();
        tx.delete(&path("users/u1/claims/c1"));
        tx.commit().await.unwrap();
        assert!(store.is_empty().unwrap());
    }
}
