//! Blog document storage.
//!
//! Handlers only see the [`DocumentStore`] trait; the server wires in a
//! [`MemoryStore`]. Identifiers are 12 bytes written as 24 hexadecimal
//! characters: a 4-byte creation timestamp (seconds since the Unix epoch)
//! followed by an 8-byte sequence number, so they sort by creation time.

use core::{fmt, str::FromStr};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use portable_atomic::{AtomicU64, Ordering};
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};
use tonic::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId {
    timestamp: u32,
    sequence: u64,
}

impl DocumentId {
    pub const HEX_LEN: usize = 24;

    pub const fn new(timestamp: u32, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}{:016x}", self.timestamp, self.sequence)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Cannot parse ID")]
pub struct ParseIdError;

impl FromStr for DocumentId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseIdError);
        }
        let (timestamp, sequence) = s.split_at(8);
        Ok(Self {
            timestamp: u32::from_str_radix(timestamp, 16).map_err(|_| ParseIdError)?,
            sequence: u64::from_str_radix(sequence, 16).map_err(|_| ParseIdError)?,
        })
    }
}

/// The stored fields of a blog post.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlogItem {
    pub author_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlog {
    pub id: DocumentId,
    pub item: BlogItem,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Cannot find blog id: {0}")]
    NotFound(DocumentId),

    /// The backend could not complete the operation.
    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => {
                Status::not_found(format!("Cannot find blog with specified ID: {id}"))
            }
            StoreError::Backend(reason) => Status::internal(format!("Internal error: {reason}")),
        }
    }
}

/// A stream of documents, in identifier order.
pub type Cursor = BoxStream<'static, StoreResult<StoredBlog>>;

#[tonic::async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Stores `item` under a fresh identifier.
    async fn insert(&self, item: BlogItem) -> StoreResult<StoredBlog>;

    async fn find(&self, id: DocumentId) -> StoreResult<StoredBlog>;

    /// Replaces every field of an existing document.
    async fn replace(&self, id: DocumentId, item: BlogItem) -> StoreResult<StoredBlog>;

    async fn delete(&self, id: DocumentId) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Cursor>;
}

/// In-memory store ordered by identifier.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<DocumentId, BlogItem>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn next_id(&self) -> DocumentId {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX));
        DocumentId::new(timestamp, self.sequence.fetch_add(1, Ordering::Relaxed))
    }
}

#[tonic::async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, item: BlogItem) -> StoreResult<StoredBlog> {
        let id = self.next_id();
        self.documents.write().insert(id, item.clone());
        Ok(StoredBlog { id, item })
    }

    async fn find(&self, id: DocumentId) -> StoreResult<StoredBlog> {
        self.documents
            .read()
            .get(&id)
            .map(|item| StoredBlog {
                id,
                item: item.clone(),
            })
            .ok_or(StoreError::NotFound(id))
    }

    async fn replace(&self, id: DocumentId, item: BlogItem) -> StoreResult<StoredBlog> {
        let mut documents = self.documents.write();
        let slot = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        *slot = item.clone();
        Ok(StoredBlog { id, item })
    }

    async fn delete(&self, id: DocumentId) -> StoreResult<()> {
        self.documents
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> StoreResult<Cursor> {
        let snapshot: Vec<_> = self
            .documents
            .read()
            .iter()
            .map(|(id, item)| {
                Ok(StoredBlog {
                    id: *id,
                    item: item.clone(),
                })
            })
            .collect();
        Ok(stream::iter(snapshot).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str) -> BlogItem {
        BlogItem {
            author_id: "author".into(),
            title: title.into(),
            content: "content".into(),
        }
    }

    #[test]
    fn id_hex_form() {
        let id = DocumentId::new(0x6512_bd43, 0x2a);
        let hex = id.to_string();
        assert_eq!(hex, "6512bd43000000000000002a");
        assert_eq!(hex.len(), DocumentId::HEX_LEN);
        assert_eq!(hex.parse::<DocumentId>(), Ok(id));
        assert_eq!(
            "6512BD43000000000000002A".parse::<DocumentId>(),
            Ok(id)
        );
    }

    #[test]
    fn id_rejects_anything_else() {
        for bad in [
            "",
            "abc",
            "6512bd43000000000000002",
            "6512bd43000000000000002a0",
            "6512bd43000000000000002g",
            "+512bd43000000000000002a",
            "not-an-id-at-all-at-all!",
        ] {
            assert_eq!(bad.parse::<DocumentId>(), Err(ParseIdError), "{bad}");
        }
    }

    #[test]
    fn ids_sort_by_time_then_sequence() {
        let a = DocumentId::new(1, 9);
        let b = DocumentId::new(2, 0);
        let c = DocumentId::new(2, 1);
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn crud() {
        let store = MemoryStore::new();
        let created = store.insert(item("first")).await.unwrap();
        assert_eq!(store.find(created.id).await.unwrap(), created);

        let updated = store.replace(created.id, item("second")).await.unwrap();
        assert_eq!(updated.item.title, "second");
        assert_eq!(store.find(created.id).await.unwrap().item.title, "second");

        store.delete(created.id).await.unwrap();
        assert_eq!(
            store.find(created.id).await,
            Err(StoreError::NotFound(created.id))
        );
        assert_eq!(
            store.delete(created.id).await,
            Err(StoreError::NotFound(created.id))
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn replace_missing_is_not_found() {
        let store = MemoryStore::new();
        let id = DocumentId::new(1, 1);
        assert_eq!(
            store.replace(id, item("x")).await,
            Err(StoreError::NotFound(id))
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_in_insertion_order() {
        let store = MemoryStore::new();
        for title in ["a", "b", "c"] {
            store.insert(item(title)).await.unwrap();
        }
        let titles: Vec<String> = store
            .list()
            .await
            .unwrap()
            .map(|doc| doc.unwrap().item.title)
            .collect()
            .await;
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert_eq!(store.len(), 3);
    }
}
