//! Persistent vector collections.
//!
//! A vector store is a directory holding `collections.sqlite3`. Each named
//! collection records its embedding dimension; each document row carries the
//! text, a JSON metadata object and the embedding as little-endian f32 bytes.
//! Collections are read back whole into a [`VectorIndex`] for serving.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use parley_core::error::ParleyError;

use crate::index::VectorIndex;

/// File name of the collection database inside the store directory.
pub const STORE_FILE: &str = "collections.sqlite3";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS collections (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL UNIQUE,
        dimensions  INTEGER NOT NULL,
        created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );

    CREATE TABLE IF NOT EXISTS documents (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        id             TEXT NOT NULL UNIQUE,
        collection_id  INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        document       TEXT NOT NULL,
        metadata       TEXT NOT NULL DEFAULT '{}',
        embedding      BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_collection
        ON documents (collection_id, seq);
";

/// A named collection and the dimension of its embeddings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub id: i64,
    pub name: String,
    pub dimensions: usize,
}

/// A document ready to be written to a collection.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: Uuid,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
}

/// Handle on a vector store directory.
pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl VectorStore {
    /// Open an existing store directory.
    ///
    /// Fails when the directory does not exist. The collection database is
    /// created inside it if absent, in which case it simply holds no
    /// collections yet.
    pub fn open(dir: &Path) -> Result<Self, ParleyError> {
        if !dir.is_dir() {
            return Err(ParleyError::VectorStore(format!(
                "Vector store directory not found: {}",
                dir.display()
            )));
        }

        let conn = Connection::open(dir.join(STORE_FILE))
            .map_err(|e| ParleyError::VectorStore(format!("Failed to open vector store: {}", e)))?;
        init_schema(&conn)?;

        info!(path = %dir.display(), "Vector store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a store directory, creating it first if needed.
    pub fn create(dir: &Path) -> Result<Self, ParleyError> {
        std::fs::create_dir_all(dir)?;
        Self::open(dir)
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ParleyError::VectorStore(format!("Failed to open in-memory store: {}", e))
        })?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::VectorStore(format!("Store lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Look up a collection by name.
    pub fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, ParleyError> {
        self.with_conn(|conn| find_collection(conn, name))
    }

    /// All collections, by name.
    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>, ParleyError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, dimensions FROM collections ORDER BY name")
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(CollectionInfo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        dimensions: row.get::<_, i64>(2)? as usize,
                    })
                })
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ParleyError::VectorStore(e.to_string()))
        })
    }

    /// Return the named collection, creating it with the given dimension if
    /// it does not exist yet.
    ///
    /// An existing collection with a different dimension is an error.
    pub fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<CollectionInfo, ParleyError> {
        if name.trim().is_empty() {
            return Err(ParleyError::VectorStore(
                "Collection name must not be empty".to_string(),
            ));
        }

        self.with_conn(|conn| {
            if let Some(existing) = find_collection(conn, name)? {
                if existing.dimensions != dimensions {
                    return Err(ParleyError::VectorStore(format!(
                        "Collection '{}' holds {}-dimensional embeddings, got {}",
                        name, existing.dimensions, dimensions
                    )));
                }
                return Ok(existing);
            }

            conn.execute(
                "INSERT INTO collections (name, dimensions) VALUES (?1, ?2)",
                rusqlite::params![name, dimensions as i64],
            )
            .map_err(|e| ParleyError::VectorStore(format!("Failed to create collection: {}", e)))?;

            info!(collection = name, dimensions, "Created collection");

            Ok(CollectionInfo {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                dimensions,
            })
        })
    }

    /// Write documents to an existing collection in one transaction.
    pub fn add_documents(
        &self,
        collection: &str,
        documents: &[StoredDocument],
    ) -> Result<usize, ParleyError> {
        self.with_conn(|conn| {
            let info = find_collection(conn, collection)?.ok_or_else(|| missing(collection))?;

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;
            for doc in documents {
                if doc.embedding.len() != info.dimensions {
                    return Err(ParleyError::VectorStore(format!(
                        "Document {} has {} dimensions, collection '{}' expects {}",
                        doc.id,
                        doc.embedding.len(),
                        collection,
                        info.dimensions
                    )));
                }
                let metadata = serde_json::to_string(&doc.metadata)?;
                tx.execute(
                    "INSERT INTO documents (id, collection_id, document, metadata, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        doc.id.to_string(),
                        info.id,
                        doc.content,
                        metadata,
                        encode_embedding(&doc.embedding),
                    ],
                )
                .map_err(|e| ParleyError::VectorStore(format!("Failed to add document: {}", e)))?;
            }
            tx.commit()
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;

            debug!(collection, count = documents.len(), "Added documents");
            Ok(documents.len())
        })
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<u64, ParleyError> {
        self.with_conn(|conn| {
            let info = find_collection(conn, collection)?.ok_or_else(|| missing(collection))?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection_id = ?1",
                    rusqlite::params![info.id],
                    |row| row.get(0),
                )
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Load every document of a collection into a fresh in-memory index.
    ///
    /// Documents are inserted in write order, so equal scores come back in
    /// the order they were indexed.
    pub fn load_collection(&self, name: &str) -> Result<VectorIndex, ParleyError> {
        self.with_conn(|conn| {
            let info = find_collection(conn, name)?.ok_or_else(|| missing(name))?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, document, metadata, embedding
                     FROM documents
                     WHERE collection_id = ?1
                     ORDER BY seq",
                )
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![info.id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })
                .map_err(|e| ParleyError::VectorStore(e.to_string()))?;

            let index = VectorIndex::new();
            for row in rows {
                let (id, document, metadata, blob) =
                    row.map_err(|e| ParleyError::VectorStore(e.to_string()))?;
                let id = Uuid::parse_str(&id)
                    .map_err(|e| ParleyError::VectorStore(format!("Invalid id '{}': {}", id, e)))?;
                let embedding = decode_embedding(&blob, info.dimensions)
                    .map_err(|reason| ParleyError::VectorStore(format!("Document {}: {}", id, reason)))?;
                let metadata: Map<String, Value> = serde_json::from_str(&metadata)?;
                index.insert(id, embedding, document, metadata)?;
            }

            info!(collection = name, documents = index.len(), "Loaded collection");
            Ok(index)
        })
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore").finish_non_exhaustive()
    }
}

fn init_schema(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| ParleyError::VectorStore(format!("Failed to initialise schema: {}", e)))
}

fn find_collection(conn: &Connection, name: &str) -> Result<Option<CollectionInfo>, ParleyError> {
    conn.query_row(
        "SELECT id, name, dimensions FROM collections WHERE name = ?1",
        rusqlite::params![name],
        |row| {
            Ok(CollectionInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                dimensions: row.get::<_, i64>(2)? as usize,
            })
        },
    )
    .optional()
    .map_err(|e| ParleyError::VectorStore(e.to_string()))
}

fn missing(name: &str) -> ParleyError {
    ParleyError::VectorStore(format!("Collection not found: {}", name))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8], dimensions: usize) -> Result<Vec<f32>, String> {
    if blob.len() != dimensions * 4 {
        return Err(format!(
            "embedding is {} bytes, expected {}",
            blob.len(),
            dimensions * 4
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(content: &str, embedding: Vec<f32>, metadata: Value) -> StoredDocument {
        StoredDocument {
            id: Uuid::new_v4(),
            content: content.to_string(),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            embedding,
        }
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = VectorStore::open(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("directory not found"));
    }

    #[test]
    fn test_create_makes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chroma_db");
        let store = VectorStore::create(&path).unwrap();
        assert!(path.join(STORE_FILE).exists());
        assert!(store.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_ensure_collection_is_idempotent() {
        let store = VectorStore::in_memory().unwrap();
        let first = store.ensure_collection("articles", 4).unwrap();
        let second = store.ensure_collection("articles", 4).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_collections().unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_collection_dimension_mismatch() {
        let store = VectorStore::in_memory().unwrap();
        store.ensure_collection("articles", 4).unwrap();
        assert!(store.ensure_collection("articles", 8).is_err());
        assert!(store.ensure_collection("  ", 8).is_err());
    }

    #[test]
    fn test_load_missing_collection_fails() {
        let store = VectorStore::in_memory().unwrap();
        let err = store.load_collection("articles").unwrap_err();
        assert!(err.to_string().contains("Collection not found"));
        assert!(store.collection("articles").unwrap().is_none());
    }

    #[test]
    fn test_add_and_load_round_trip() {
        let store = VectorStore::in_memory().unwrap();
        store.ensure_collection("articles", 3).unwrap();
        let docs = vec![
            doc("alpha", vec![1.0, 0.0, 0.0], json!({"title": "A"})),
            doc("beta", vec![0.0, 1.0, 0.0], json!({"source": "b.md"})),
        ];
        assert_eq!(store.add_documents("articles", &docs).unwrap(), 2);
        assert_eq!(store.count("articles").unwrap(), 2);

        let index = store.load_collection("articles").unwrap();
        assert_eq!(index.len(), 2);
        let hits = index.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].id, docs[1].id);
        assert_eq!(hits[0].content, "beta");
        assert_eq!(hits[0].metadata["source"], "b.md");
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let store = VectorStore::in_memory().unwrap();
        store.ensure_collection("articles", 3).unwrap();
        let result = store.add_documents(
            "articles",
            &[
                doc("ok", vec![1.0, 0.0, 0.0], json!({})),
                doc("bad", vec![1.0], json!({})),
            ],
        );
        assert!(result.is_err());
        assert_eq!(store.count("articles").unwrap(), 0);
    }

    #[test]
    fn test_add_to_missing_collection_fails() {
        let store = VectorStore::in_memory().unwrap();
        assert!(store
            .add_documents("nope", &[doc("x", vec![1.0], json!({}))])
            .is_err());
    }

    #[test]
    fn test_collections_are_separate() {
        let store = VectorStore::in_memory().unwrap();
        store.ensure_collection("a", 2).unwrap();
        store.ensure_collection("b", 2).unwrap();
        store
            .add_documents("a", &[doc("in a", vec![1.0, 0.0], json!({}))])
            .unwrap();
        assert_eq!(store.load_collection("a").unwrap().len(), 1);
        assert!(store.load_collection("b").unwrap().is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::create(dir.path()).unwrap();
            store.ensure_collection("articles", 2).unwrap();
            store
                .add_documents("articles", &[doc("kept", vec![0.5, 0.5], json!({}))])
                .unwrap();
        }
        let store = VectorStore::open(dir.path()).unwrap();
        let index = store.load_collection("articles").unwrap();
        assert_eq!(index.search(&[0.5, 0.5], 1).unwrap()[0].content, "kept");
    }

    #[test]
    fn test_decode_embedding_checks_length() {
        let blob = encode_embedding(&[1.5, -2.0]);
        assert_eq!(decode_embedding(&blob, 2).unwrap(), vec![1.5, -2.0]);
        assert!(decode_embedding(&blob, 3).is_err());
    }
}
