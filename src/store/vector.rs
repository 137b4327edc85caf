use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::models::VectorStats;

/// A stored vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    chunk_id: String,
    user_id: String,
    doc_id: String,
    source: String,
    chunk_index: usize,
    text: String,
    metadata: serde_json::Map<String, serde_json::Value>,
    embedding: Vec<f32>,
}

/// Chunk text plus metadata handed to [`VectorStore::add_document_chunks`].
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub chunk_index: usize,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// In-memory vector store with disk persistence. Destination of rebuilt
/// embeddings.
pub struct VectorStore {
    entries: RwLock<Vec<VectorEntry>>,
    persist_path: std::path::PathBuf,
}

impl VectorStore {
    pub fn open_or_create(vector_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join("vectors.json");

        let entries = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("Failed to read vector store")?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path,
        })
    }

    /// Insert or replace the vectors of one document's chunks. `embeddings`
    /// must be parallel with `chunks`. Returns the chunk ids written.
    pub fn add_document_chunks(
        &self,
        user_id: &str,
        doc_id: &str,
        source: &str,
        chunks: &[ChunkInput],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<String>> {
        if chunks.len() != embeddings.len() {
            anyhow::bail!(
                "Got {} embeddings for {} chunks of document {doc_id}",
                embeddings.len(),
                chunks.len()
            );
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<String> = chunks
            .iter()
            .map(|c| format!("{doc_id}_{}", c.chunk_index))
            .collect();
        let replaced: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();

        let mut entries = self.entries.write();
        entries.retain(|e| !replaced.contains(e.chunk_id.as_str()));

        for ((chunk, embedding), chunk_id) in chunks.iter().zip(embeddings).zip(&chunk_ids) {
            entries.push(VectorEntry {
                chunk_id: chunk_id.clone(),
                user_id: user_id.to_string(),
                doc_id: doc_id.to_string(),
                source: source.to_string(),
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                embedding,
            });
        }

        self.persist(&entries)?;
        tracing::debug!("Inserted {} chunks for document {doc_id}", chunk_ids.len());
        Ok(chunk_ids)
    }

    /// Drop every vector.
    pub fn clear(&self) -> Result<usize> {
        self.remove_where(|_| true)
    }

    /// Delete all vectors owned by a user.
    pub fn delete_user(&self, user_id: &str) -> Result<usize> {
        self.remove_where(|e| e.user_id == user_id)
    }

    /// Delete all vectors of a document.
    pub fn delete_document(&self, doc_id: &str) -> Result<usize> {
        self.remove_where(|e| e.doc_id == doc_id)
    }

    fn remove_where(&self, pred: impl Fn(&VectorEntry) -> bool) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !pred(e));
        let removed = before - entries.len();
        self.persist(&entries)?;
        Ok(removed)
    }

    fn persist(&self, entries: &[VectorEntry]) -> Result<()> {
        let data = serde_json::to_string(entries)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).context("Failed to write vector store")?;
        std::fs::rename(&tmp_path, &self.persist_path)
            .context("Failed to replace vector store file")?;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn stats(&self) -> VectorStats {
        let entries = self.entries.read();
        let users: HashSet<&str> = entries.iter().map(|e| e.user_id.as_str()).collect();
        let docs: HashSet<&str> = entries.iter().map(|e| e.doc_id.as_str()).collect();
        VectorStats {
            total_entities: entries.len() as u64,
            unique_users: users.len() as u64,
            unique_documents: docs.len() as u64,
        }
    }

    /// Chunk ids of a document, ordered by chunk index.
    pub fn document_chunk_ids(&self, doc_id: &str) -> Vec<String> {
        let entries = self.entries.read();
        let mut found: Vec<&VectorEntry> = entries.iter().filter(|e| e.doc_id == doc_id).collect();
        found.sort_by_key(|e| e.chunk_index);
        found.into_iter().map(|e| e.chunk_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(i: usize, text: &str) -> ChunkInput {
        ChunkInput {
            chunk_index: i,
            text: text.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_add_is_upsert_by_chunk_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();

        store
            .add_document_chunks("u1", "d1", "a.pdf", &[input(0, "a"), input(1, "b")], vec![vec![1.0], vec![2.0]])
            .unwrap();
        store
            .add_document_chunks("u1", "d1", "a.pdf", &[input(1, "b2")], vec![vec![3.0]])
            .unwrap();

        assert_eq!(store.entry_count(), 2);
        assert_eq!(store.document_chunk_ids("d1"), vec!["d1_0", "d1_1"]);
    }

    #[test]
    fn test_batch_upsert_replaces_only_its_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        store
            .add_document_chunks("u2", "other", "o.pdf", &[input(0, "keep")], vec![vec![9.0]])
            .unwrap();

        let first: Vec<ChunkInput> = (0..200).map(|i| input(i, "v1")).collect();
        store
            .add_document_chunks("u1", "d1", "a.pdf", &first, vec![vec![1.0]; 200])
            .unwrap();
        let second: Vec<ChunkInput> = (100..300).map(|i| input(i, "v2")).collect();
        let ids = store
            .add_document_chunks("u1", "d1", "a.pdf", &second, vec![vec![2.0]; 200])
            .unwrap();

        assert_eq!(ids.len(), 200);
        assert_eq!(ids[0], "d1_100");
        assert_eq!(store.document_chunk_ids("d1").len(), 300);
        assert_eq!(store.document_chunk_ids("other"), vec!["other_0"]);
        assert_eq!(store.entry_count(), 301);
    }

    #[test]
    fn test_mismatched_embeddings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        let err = store
            .add_document_chunks("u1", "d1", "a.pdf", &[input(0, "a")], vec![])
            .unwrap_err();
        assert!(err.to_string().contains("0 embeddings for 1 chunks"));
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn test_scoped_deletes_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        store
            .add_document_chunks("u1", "d1", "a.pdf", &[input(0, "a")], vec![vec![0.1]])
            .unwrap();
        store
            .add_document_chunks("u1", "d2", "b.pdf", &[input(0, "b")], vec![vec![0.2]])
            .unwrap();
        store
            .add_document_chunks("u2", "d3", "c.md", &[input(0, "c")], vec![vec![0.3]])
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.unique_documents, 3);

        assert_eq!(store.delete_document("d2").unwrap(), 1);
        assert_eq!(store.delete_user("u2").unwrap(), 1);
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn test_reopen_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open_or_create(dir.path()).unwrap();
            store
                .add_document_chunks("u1", "d1", "a.pdf", &[input(0, "a")], vec![vec![0.5, 0.5]])
                .unwrap();
        }
        let reopened = VectorStore::open_or_create(dir.path()).unwrap();
        assert_eq!(reopened.entry_count(), 1);
    }
}
