use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RebuildConfig;
use crate::llm::embeddings::Embedder;
use crate::models::{
    BackupChunk, BackupDocument, RebuildFilters, RebuildStatus, RebuildSummary,
};
use crate::rebuild::progress::ProgressEmitter;
use crate::store::backup::{BackupStore, ChunkFilter};
use crate::store::vector::{ChunkInput, VectorStore};

/// Validated rebuild parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildParams {
    pub run_id: Uuid,
    pub user_filter: Option<String>,
    pub document_filter: Option<String>,
    pub batch_size: usize,
}

impl RebuildParams {
    pub fn new(batch_size: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            user_filter: None,
            document_filter: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Validate request filters against the configured batch bounds. Blank
    /// filter strings count as unset.
    pub fn from_filters(filters: &RebuildFilters, config: &RebuildConfig) -> Result<Self, String> {
        let batch_size = filters.batch_size.unwrap_or(config.default_batch_size);
        if !(config.min_batch_size..=config.max_batch_size).contains(&batch_size) {
            return Err(format!(
                "batch_size must be between {} and {}",
                config.min_batch_size, config.max_batch_size
            ));
        }
        Ok(Self {
            user_filter: non_blank(filters.user_filter.as_deref()),
            document_filter: non_blank(filters.document_filter.as_deref()),
            ..Self::new(batch_size)
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Regenerates vector embeddings from the backup store.
#[derive(Clone)]
pub struct RebuildService {
    backup: Arc<dyn BackupStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

enum Outcome {
    Completed(Option<String>),
    Cancelled,
}

impl RebuildService {
    pub fn new(
        backup: Arc<dyn BackupStore>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            backup,
            vectors,
            embedder,
        }
    }

    /// Run one rebuild to completion, reporting through `emitter`.
    ///
    /// Never returns an error: failures end the run with a `failed` event and
    /// are recorded in the summary.
    pub async fn rebuild(
        &self,
        params: &RebuildParams,
        emitter: &mut ProgressEmitter,
        cancel: &CancellationToken,
    ) -> RebuildSummary {
        let mut summary = RebuildSummary {
            run_id: params.run_id,
            started_at: Utc::now(),
            completed_at: None,
            status: RebuildStatus::Starting,
            total_chunks: 0,
            processed_chunks: 0,
            total_documents: 0,
            processed_documents: 0,
            errors: Vec::new(),
            final_entities: 0,
            final_users: 0,
            final_documents: 0,
        };

        tracing::info!(
            run_id = %summary.run_id,
            user_filter = ?params.user_filter,
            document_filter = ?params.document_filter,
            batch_size = params.batch_size,
            "Starting vector store rebuild from backup"
        );
        emitter.emit(RebuildStatus::Starting, None);

        let result = self.run(params, emitter, cancel, &mut summary).await;

        summary.processed_chunks = emitter.processed_chunks();
        summary.processed_documents = emitter.processed_documents();
        summary.completed_at = Some(Utc::now());

        match result {
            Ok(Outcome::Completed(message)) => {
                summary.status = RebuildStatus::Completed;
                tracing::info!(
                    run_id = %summary.run_id,
                    "Rebuild completed: {} chunks from {} documents ({} errors)",
                    summary.processed_chunks,
                    summary.processed_documents,
                    summary.errors.len()
                );
                emitter.emit_with_errors(RebuildStatus::Completed, message, summary.errors.clone());
            }
            Ok(Outcome::Cancelled) => {
                summary.status = RebuildStatus::Failed;
                summary.errors.push("Rebuild cancelled".to_string());
                tracing::warn!(run_id = %summary.run_id, "Rebuild cancelled");
                emitter.emit_with_errors(
                    RebuildStatus::Failed,
                    Some("Rebuild cancelled".to_string()),
                    summary.errors.clone(),
                );
            }
            Err(e) => {
                let message = format!("Rebuild failed: {e:#}");
                tracing::error!(run_id = %summary.run_id, "{message}");
                summary.status = RebuildStatus::Failed;
                summary.errors.push(message.clone());
                emitter.emit_with_errors(RebuildStatus::Failed, Some(message), summary.errors.clone());
            }
        }

        summary
    }

    async fn run(
        &self,
        params: &RebuildParams,
        emitter: &mut ProgressEmitter,
        cancel: &CancellationToken,
        summary: &mut RebuildSummary,
    ) -> Result<Outcome> {
        emitter.emit(RebuildStatus::Initializing, None);
        let removed = self.clear_scope(params)?;
        tracing::info!("Cleared {removed} existing vectors in rebuild scope");

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        emitter.emit(RebuildStatus::Counting, None);
        let filter = self.chunk_filter(params).await?;
        let chunks = self
            .backup
            .chunks(&filter)
            .await
            .context("Failed to read chunks from backup store")?;

        let total_documents = chunks
            .iter()
            .map(|c| c.document_id.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u64;
        summary.total_chunks = chunks.len() as u64;
        summary.total_documents = total_documents;
        emitter.update_totals(chunks.len() as u64, total_documents);

        if chunks.is_empty() {
            tracing::info!("No chunks found to rebuild");
            return Ok(Outcome::Completed(Some("No chunks found to rebuild.".to_string())));
        }

        tracing::info!(
            "Processing {} chunks from {total_documents} documents in batches of {}",
            chunks.len(),
            params.batch_size
        );
        emitter.emit(RebuildStatus::Processing, None);

        let mut processed_chunks = 0u64;
        let mut processed_documents = 0u64;

        for group in chunks.chunk_by(|a, b| a.document_id == b.document_id) {
            let doc_id = &group[0].document_id;

            let document = match self.backup.document(doc_id).await {
                Ok(Some(doc)) => Some(doc),
                Ok(None) => {
                    summary.errors.push(format!("Document {doc_id} not found"));
                    tracing::warn!("Document {doc_id} not found in backup; skipping its chunks");
                    None
                }
                Err(e) => {
                    summary
                        .errors
                        .push(format!("Failed to process document {doc_id}: {e:#}"));
                    tracing::warn!("Failed to load document {doc_id}: {e:#}");
                    None
                }
            };

            if let Some(document) = document {
                for batch in group.chunks(params.batch_size) {
                    if cancel.is_cancelled() {
                        return Ok(Outcome::Cancelled);
                    }

                    let result = tokio::select! {
                        _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
                        result = self.process_batch(&document, batch) => result,
                    };
                    match result {
                        Ok(()) => processed_chunks += batch.len() as u64,
                        Err(e) => {
                            let msg = format!("Failed to process document {doc_id}: {e:#}");
                            tracing::warn!("{msg}");
                            summary.errors.push(msg);
                        }
                    }

                    emitter.update_progress(processed_chunks, processed_documents);
                    emitter.emit(RebuildStatus::Processing, None);
                }
            }

            processed_documents += 1;
            emitter.update_progress(processed_chunks, processed_documents);
        }

        emitter.emit(RebuildStatus::Processing, None);

        emitter.emit(RebuildStatus::Finalizing, None);
        let stats = self.vectors.stats();
        summary.final_entities = stats.total_entities;
        summary.final_users = stats.unique_users;
        summary.final_documents = stats.unique_documents;

        let message = if summary.errors.is_empty() {
            format!(
                "Rebuild completed successfully! Processed {processed_chunks} chunks from {processed_documents} documents."
            )
        } else {
            format!(
                "Rebuild completed with {} errors. Processed {processed_chunks} chunks from {processed_documents} documents.",
                summary.errors.len()
            )
        };
        Ok(Outcome::Completed(Some(message)))
    }

    /// Remove the vectors a rebuild with `params` is about to regenerate.
    fn clear_scope(&self, params: &RebuildParams) -> Result<usize> {
        if let Some(user_id) = &params.user_filter {
            self.vectors.delete_user(user_id)
        } else if let Some(doc_id) = &params.document_filter {
            self.vectors.delete_document(doc_id)
        } else {
            self.vectors.clear()
        }
    }

    /// A user filter wins over a document filter when both are set.
    async fn chunk_filter(&self, params: &RebuildParams) -> Result<ChunkFilter> {
        if let Some(user_id) = &params.user_filter {
            let docs = self
                .backup
                .documents_for_user(user_id)
                .await
                .with_context(|| format!("Failed to list documents of user {user_id}"))?;
            Ok(ChunkFilter::Documents(docs.into_iter().map(|d| d.id).collect()))
        } else if let Some(doc_id) = &params.document_filter {
            Ok(ChunkFilter::Document(doc_id.clone()))
        } else {
            Ok(ChunkFilter::All)
        }
    }

    async fn process_batch(
        &self,
        document: &BackupDocument,
        batch: &[BackupChunk],
    ) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let inputs: Vec<ChunkInput> = batch
            .iter()
            .map(|c| ChunkInput {
                chunk_index: c.chunk_index,
                text: c.content.clone(),
                metadata: chunk_metadata(c, &document.file_type),
            })
            .collect();

        let embeddings = self
            .embedder
            .embed(&texts)
            .await
            .with_context(|| format!("embedding with {} failed", self.embedder.model_name()))?;

        self.vectors.add_document_chunks(
            &document.user_id,
            &document.id,
            &document.filename,
            &inputs,
            embeddings,
        )?;
        Ok(())
    }
}

fn chunk_metadata(
    chunk: &BackupChunk,
    file_type: &str,
) -> serde_json::Map<String, serde_json::Value> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("chunk_index".into(), chunk.chunk_index.into());
    metadata.insert("backup_chunk_id".into(), chunk.id.clone().into());
    metadata.insert("file_type".into(), file_type.into());
    metadata.insert("char_count".into(), chunk.content.chars().count().into());
    metadata.insert(
        "word_count".into(),
        chunk.content.split_whitespace().count().into(),
    );
    if let Some(page) = chunk.page_number {
        metadata.insert("page_number".into(), page.into());
    }
    if let Some(extra) = &chunk.chunk_metadata {
        for (k, v) in extra {
            metadata.insert(k.clone(), v.clone());
        }
    }
    metadata
}
