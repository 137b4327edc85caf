use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a rebuild run as reported on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStatus {
    #[serde(alias = "started")]
    Starting,
    Initializing,
    Counting,
    Processing,
    Finalizing,
    Completed,
    Failed,
}

impl RebuildStatus {
    /// `completed` and `failed` end a run; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, RebuildStatus::Completed | RebuildStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RebuildStatus::Starting => "starting",
            RebuildStatus::Initializing => "initializing",
            RebuildStatus::Counting => "counting",
            RebuildStatus::Processing => "processing",
            RebuildStatus::Finalizing => "finalizing",
            RebuildStatus::Completed => "completed",
            RebuildStatus::Failed => "failed",
        }
    }
}

/// Optional scope and batching for a rebuild request.
///
/// Serialized as query parameters; unset fields are omitted entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebuildFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl RebuildFilters {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_filter: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self {
            document_filter: Some(document_id.into()),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// One incremental progress update of a rebuild run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebuildProgressEvent {
    pub status: RebuildStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub total_chunks: u64,
    #[serde(default)]
    pub processed_chunks: u64,
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub processed_documents: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Per-batch failures accumulated so far (only sent on terminal events).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Set by the server's out-of-band `error` frames (e.g. timeouts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RebuildProgressEvent {
    pub fn new(status: RebuildStatus, progress: f64, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            total_chunks: 0,
            processed_chunks: 0,
            total_documents: 0,
            processed_documents: 0,
            timestamp: None,
            errors: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Human-readable reason for a failed run, falling back to a generic
    /// message when the server sent none.
    pub fn failure_message(&self) -> &str {
        if !self.message.trim().is_empty() {
            &self.message
        } else if let Some(error) = self.error.as_deref().filter(|e| !e.trim().is_empty()) {
            error
        } else {
            "Vector store rebuild failed"
        }
    }
}

/// Terminal result of a streamed rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebuildOutcome {
    pub success: bool,
    /// The last event received, i.e. the terminal one.
    pub data: RebuildProgressEvent,
}

impl RebuildOutcome {
    pub fn from_terminal(event: RebuildProgressEvent) -> Self {
        Self {
            success: event.status == RebuildStatus::Completed,
            data: event,
        }
    }

    pub fn message(&self) -> &str {
        if self.success {
            &self.data.message
        } else {
            self.data.failure_message()
        }
    }

    /// Turn a failed outcome into [`crate::error::Error::RebuildFailed`].
    pub fn into_result(self) -> crate::error::Result<RebuildProgressEvent> {
        if self.success {
            Ok(self.data)
        } else {
            Err(crate::error::Error::RebuildFailed {
                message: self.data.failure_message().to_string(),
                data: Box::new(self.data),
            })
        }
    }
}

/// Immediate acknowledgement of a fire-and-forget rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebuildAck {
    pub message: String,
    pub run_id: Uuid,
    #[serde(default)]
    pub filters: RebuildFilters,
}

/// Final statistics of one rebuild run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RebuildStatus,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub total_documents: u64,
    pub processed_documents: u64,
    pub errors: Vec<String>,
    pub final_entities: u64,
    pub final_users: u64,
    pub final_documents: u64,
}

/// A document retained in the backup store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub file_type: String,
    #[serde(default = "default_document_status")]
    pub status: String,
    #[serde(default)]
    pub total_chunks: usize,
    pub uploaded_at: DateTime<Utc>,
}

fn default_document_status() -> String {
    "completed".to_string()
}

/// A chunk of document text retained in the backup store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub chunk_metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A `(value, count)` bucket of a backup distribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketCount {
    pub value: String,
    pub count: u64,
}

/// Aggregate description of what the backup store can restore.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupStats {
    pub total_documents: u64,
    pub total_chunks: u64,
    #[serde(default)]
    pub average_chunks_per_document: f64,
    /// Top users by document count.
    #[serde(default)]
    pub user_distribution: Vec<BucketCount>,
    #[serde(default)]
    pub file_type_distribution: Vec<BucketCount>,
    #[serde(default)]
    pub status_distribution: Vec<BucketCount>,
    #[serde(default)]
    pub total_users: u64,
}

/// Counts describing the vector store contents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorStats {
    pub total_entities: u64,
    pub unique_users: u64,
    pub unique_documents: u64,
}

/// Response of the vector health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHealth {
    pub status: String,
    #[serde(flatten)]
    pub vectors: VectorStats,
    pub backup_chunks: u64,
    pub backup_documents: u64,
    pub rebuild_in_progress: bool,
}
