use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::models::{BackupChunk, BackupDocument, BackupStats, BucketCount};

/// Number of users listed in [`BackupStats::user_distribution`].
const TOP_USERS: usize = 10;

/// Which chunks a rebuild reads back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFilter {
    All,
    Documents(Vec<String>),
    Document(String),
}

impl ChunkFilter {
    fn matches(&self, chunk: &BackupChunk) -> bool {
        match self {
            ChunkFilter::All => true,
            ChunkFilter::Documents(ids) => ids.iter().any(|id| id == &chunk.document_id),
            ChunkFilter::Document(id) => &chunk.document_id == id,
        }
    }
}

/// Durable copy of document chunks, independent of the vector index.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn documents_for_user(&self, user_id: &str) -> Result<Vec<BackupDocument>>;

    async fn document(&self, id: &str) -> Result<Option<BackupDocument>>;

    async fn count_chunks(&self, filter: &ChunkFilter) -> Result<usize>;

    /// Chunks matching `filter`, ordered by `(document_id, chunk_index)`.
    async fn chunks(&self, filter: &ChunkFilter) -> Result<Vec<BackupChunk>>;

    async fn stats(&self) -> Result<BackupStats>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackupData {
    documents: Vec<BackupDocument>,
    chunks: Vec<BackupChunk>,
}

/// Backup store persisted as a single JSON file.
pub struct JsonBackupStore {
    data: RwLock<BackupData>,
    persist_path: PathBuf,
}

impl JsonBackupStore {
    pub fn open_or_create(backup_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(backup_dir)?;
        let persist_path = backup_dir.join("backup.json");

        let data = if persist_path.exists() {
            let raw = std::fs::read_to_string(&persist_path)
                .context("Failed to read backup store")?;
            serde_json::from_str(&raw).context("Backup store file is corrupt")?
        } else {
            BackupData::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            persist_path,
        })
    }

    /// Add or replace a document record.
    pub fn insert_document(&self, document: BackupDocument) -> Result<()> {
        let mut data = self.data.write();
        data.documents.retain(|d| d.id != document.id);
        data.documents.push(document);
        self.persist(&data)
    }

    /// Add or replace chunk records.
    pub fn insert_chunks(&self, chunks: Vec<BackupChunk>) -> Result<()> {
        let mut data = self.data.write();
        let ids: HashSet<String> = chunks.iter().map(|c| c.id.clone()).collect();
        data.chunks.retain(|c| !ids.contains(&c.id));
        data.chunks.extend(chunks);
        self.persist(&data)
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, data: &BackupData) -> Result<()> {
        let raw = serde_json::to_string_pretty(data)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, raw).context("Failed to write backup store")?;
        std::fs::rename(&tmp_path, &self.persist_path)
            .context("Failed to replace backup store file")?;
        Ok(())
    }
}

#[async_trait]
impl BackupStore for JsonBackupStore {
    async fn documents_for_user(&self, user_id: &str) -> Result<Vec<BackupDocument>> {
        let data = self.data.read();
        Ok(data
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn document(&self, id: &str) -> Result<Option<BackupDocument>> {
        let data = self.data.read();
        Ok(data.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn count_chunks(&self, filter: &ChunkFilter) -> Result<usize> {
        let data = self.data.read();
        Ok(data.chunks.iter().filter(|c| filter.matches(c)).count())
    }

    async fn chunks(&self, filter: &ChunkFilter) -> Result<Vec<BackupChunk>> {
        let data = self.data.read();
        let mut chunks: Vec<BackupChunk> = data
            .chunks
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        chunks.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(chunks)
    }

    async fn stats(&self) -> Result<BackupStats> {
        let data = self.data.read();
        Ok(compute_stats(&data.documents, data.chunks.len()))
    }
}

fn compute_stats(documents: &[BackupDocument], total_chunks: usize) -> BackupStats {
    let total_documents = documents.len();
    let by_user = bucket_counts(documents.iter().map(|d| d.user_id.as_str()));
    let total_users = by_user.len() as u64;

    let average = total_chunks as f64 / total_documents.max(1) as f64;

    BackupStats {
        total_documents: total_documents as u64,
        total_chunks: total_chunks as u64,
        average_chunks_per_document: (average * 100.0).round() / 100.0,
        user_distribution: by_user.into_iter().take(TOP_USERS).collect(),
        file_type_distribution: bucket_counts(documents.iter().map(|d| d.file_type.as_str())),
        status_distribution: bucket_counts(documents.iter().map(|d| d.status.as_str())),
        total_users,
    }
}

/// Group values and sort buckets by count descending, then value ascending.
fn bucket_counts<'a>(values: impl Iterator<Item = &'a str>) -> Vec<BucketCount> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let mut buckets: Vec<BucketCount> = counts
        .into_iter()
        .map(|(value, count)| BucketCount {
            value: value.to_string(),
            count,
        })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str, user: &str, file_type: &str) -> BackupDocument {
        BackupDocument {
            id: id.into(),
            user_id: user.into(),
            filename: format!("{id}.{file_type}"),
            file_type: file_type.into(),
            status: "completed".into(),
            total_chunks: 0,
            uploaded_at: Utc::now(),
        }
    }

    fn chunk(id: &str, doc_id: &str, index: usize) -> BackupChunk {
        BackupChunk {
            id: id.into(),
            document_id: doc_id.into(),
            chunk_index: index,
            content: format!("content of {id}"),
            page_number: None,
            chunk_metadata: None,
        }
    }

    #[tokio::test]
    async fn test_chunks_sorted_by_document_then_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonBackupStore::open_or_create(dir.path()).unwrap();
        store
            .insert_chunks(vec![
                chunk("c3", "d2", 0),
                chunk("c2", "d1", 1),
                chunk("c1", "d1", 0),
            ])
            .unwrap();

        let chunks = store.chunks(&ChunkFilter::All).await.unwrap();
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_filters_restrict_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonBackupStore::open_or_create(dir.path()).unwrap();
        store
            .insert_chunks(vec![chunk("a", "d1", 0), chunk("b", "d2", 0), chunk("c", "d3", 0)])
            .unwrap();

        let one = ChunkFilter::Document("d2".into());
        assert_eq!(store.count_chunks(&one).await.unwrap(), 1);

        let two = ChunkFilter::Documents(vec!["d1".into(), "d3".into()]);
        assert_eq!(store.count_chunks(&two).await.unwrap(), 2);

        let none = ChunkFilter::Documents(vec![]);
        assert!(store.chunks(&none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_distributions() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonBackupStore::open_or_create(dir.path()).unwrap();
        store.insert_document(doc("d1", "alice", "pdf")).unwrap();
        store.insert_document(doc("d2", "alice", "md")).unwrap();
        store.insert_document(doc("d3", "bob", "pdf")).unwrap();
        store
            .insert_chunks(vec![chunk("a", "d1", 0), chunk("b", "d1", 1), chunk("c", "d3", 0)])
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.average_chunks_per_document, 1.0);
        assert_eq!(stats.total_users, 2);
        assert_eq!(
            stats.user_distribution[0],
            BucketCount { value: "alice".into(), count: 2 }
        );
        assert_eq!(stats.file_type_distribution[0].value, "pdf");
    }

    #[tokio::test]
    async fn test_empty_store_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonBackupStore::open_or_create(dir.path()).unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.average_chunks_per_document, 0.0);
    }

    #[tokio::test]
    async fn test_reopen_restores_documents() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonBackupStore::open_or_create(dir.path()).unwrap();
            store.insert_document(doc("d1", "alice", "pdf")).unwrap();
        }
        let store = JsonBackupStore::open_or_create(dir.path()).unwrap();
        assert!(store.document("d1").await.unwrap().is_some());
        assert_eq!(store.documents_for_user("alice").await.unwrap().len(), 1);
    }
}
