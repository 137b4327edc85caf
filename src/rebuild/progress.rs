use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::models::{RebuildProgressEvent, RebuildStatus};

/// Share of the progress bar covered by the `processing` phase.
const PROCESSING_SPAN: f64 = 80.0;
const PROCESSING_BASE: f64 = 10.0;

/// Tracks counters for one rebuild run and turns status changes into
/// [`RebuildProgressEvent`]s.
///
/// Progress never goes backwards and the processed counters never exceed
/// their totals, regardless of the order in which callers update them.
#[derive(Debug)]
pub struct ProgressEmitter {
    tx: Option<mpsc::UnboundedSender<RebuildProgressEvent>>,
    status: Option<RebuildStatus>,
    progress: f64,
    total_chunks: u64,
    processed_chunks: u64,
    total_documents: u64,
    processed_documents: u64,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::UnboundedSender<RebuildProgressEvent>) -> Self {
        Self {
            tx: Some(tx),
            ..Self::silent()
        }
    }

    /// An emitter that only tracks state; used by fire-and-forget rebuilds.
    pub fn silent() -> Self {
        Self {
            tx: None,
            status: None,
            progress: 0.0,
            total_chunks: 0,
            processed_chunks: 0,
            total_documents: 0,
            processed_documents: 0,
        }
    }

    pub fn update_totals(&mut self, total_chunks: u64, total_documents: u64) {
        self.total_chunks = total_chunks;
        self.total_documents = total_documents;
        self.processed_chunks = self.processed_chunks.min(total_chunks);
        self.processed_documents = self.processed_documents.min(total_documents);
    }

    pub fn update_progress(&mut self, processed_chunks: u64, processed_documents: u64) {
        self.processed_chunks = processed_chunks.max(self.processed_chunks).min(self.total_chunks);
        self.processed_documents = processed_documents
            .max(self.processed_documents)
            .min(self.total_documents);
    }

    pub fn processed_chunks(&self) -> u64 {
        self.processed_chunks
    }

    pub fn processed_documents(&self) -> u64 {
        self.processed_documents
    }

    /// Record `status`, compute the new progress value and send the event.
    ///
    /// Once a terminal status has been emitted, later calls are ignored and
    /// return `None`.
    pub fn emit(&mut self, status: RebuildStatus, message: Option<String>) -> Option<RebuildProgressEvent> {
        self.emit_with_errors(status, message, Vec::new())
    }

    pub fn emit_with_errors(
        &mut self,
        status: RebuildStatus,
        message: Option<String>,
        errors: Vec<String>,
    ) -> Option<RebuildProgressEvent> {
        if self.status.is_some_and(RebuildStatus::is_terminal) {
            tracing::debug!("Ignoring {} after terminal status", status.as_str());
            return None;
        }
        self.status = Some(status);

        let target = match status {
            RebuildStatus::Starting => 0.0,
            RebuildStatus::Initializing => 5.0,
            RebuildStatus::Counting => PROCESSING_BASE,
            RebuildStatus::Processing => PROCESSING_BASE + self.chunk_fraction() * PROCESSING_SPAN,
            RebuildStatus::Finalizing => 95.0,
            RebuildStatus::Completed => 100.0,
            RebuildStatus::Failed => self.progress,
        };
        self.progress = round_tenth(target.min(100.0)).max(self.progress);

        let event = RebuildProgressEvent {
            status,
            progress: self.progress,
            message: message.unwrap_or_else(|| self.default_message(status)),
            total_chunks: self.total_chunks,
            processed_chunks: self.processed_chunks,
            total_documents: self.total_documents,
            processed_documents: self.processed_documents,
            timestamp: Some(now_secs()),
            errors,
            error: None,
        };

        if let Some(tx) = &self.tx {
            if tx.send(event.clone()).is_err() {
                tracing::debug!("Progress receiver dropped; continuing without subscriber");
                self.tx = None;
            }
        }
        Some(event)
    }

    fn chunk_fraction(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            self.processed_chunks as f64 / self.total_chunks as f64
        }
    }

    fn default_message(&self, status: RebuildStatus) -> String {
        match status {
            RebuildStatus::Starting => "Starting vector store rebuild...".to_string(),
            RebuildStatus::Initializing => "Initializing vector store...".to_string(),
            RebuildStatus::Counting => "Counting documents and chunks...".to_string(),
            RebuildStatus::Processing => format!(
                "Processing chunks ({}/{})...",
                self.processed_chunks, self.total_chunks
            ),
            RebuildStatus::Finalizing => "Finalizing rebuild...".to_string(),
            RebuildStatus::Completed => "Rebuild completed successfully!".to_string(),
            RebuildStatus::Failed => "Rebuild failed.".to_string(),
        }
    }
}

fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progress_values() {
        let mut emitter = ProgressEmitter::silent();
        assert_eq!(emitter.emit(RebuildStatus::Starting, None).unwrap().progress, 0.0);
        assert_eq!(emitter.emit(RebuildStatus::Initializing, None).unwrap().progress, 5.0);
        assert_eq!(emitter.emit(RebuildStatus::Counting, None).unwrap().progress, 10.0);

        emitter.update_totals(200, 4);
        emitter.update_progress(50, 1);
        let processing = emitter.emit(RebuildStatus::Processing, None).unwrap();
        assert_eq!(processing.progress, 30.0);
        assert_eq!(processing.message, "Processing chunks (50/200)...");

        assert_eq!(emitter.emit(RebuildStatus::Finalizing, None).unwrap().progress, 95.0);
        assert_eq!(emitter.emit(RebuildStatus::Completed, None).unwrap().progress, 100.0);
    }

    #[test]
    fn test_failed_keeps_current_progress() {
        let mut emitter = ProgressEmitter::silent();
        emitter.update_totals(3, 1);
        emitter.update_progress(1, 0);
        emitter.emit(RebuildStatus::Processing, None);
        let failed = emitter
            .emit(RebuildStatus::Failed, Some("Rebuild failed: boom".into()))
            .unwrap();
        assert_eq!(failed.progress, 36.7);
        assert_eq!(failed.message, "Rebuild failed: boom");
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut emitter = ProgressEmitter::silent();
        emitter.emit(RebuildStatus::Finalizing, None);
        // A late processing update must not pull the bar back to 10%
        let late = emitter.emit(RebuildStatus::Processing, None).unwrap();
        assert_eq!(late.progress, 95.0);
    }

    #[test]
    fn test_processed_counters_clamped_to_totals() {
        let mut emitter = ProgressEmitter::silent();
        emitter.update_totals(10, 2);
        emitter.update_progress(25, 7);
        let event = emitter.emit(RebuildStatus::Processing, None).unwrap();
        assert_eq!(event.processed_chunks, 10);
        assert_eq!(event.processed_documents, 2);
        assert_eq!(event.progress, 90.0);
    }

    #[test]
    fn test_nothing_after_terminal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut emitter = ProgressEmitter::new(tx);
        emitter.emit(RebuildStatus::Completed, None);
        assert!(emitter.emit(RebuildStatus::Failed, None).is_none());

        assert_eq!(rx.try_recv().unwrap().status, RebuildStatus::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut emitter = ProgressEmitter::new(tx);
        assert!(emitter.emit(RebuildStatus::Starting, None).is_some());
        assert!(emitter.emit(RebuildStatus::Counting, None).is_some());
    }
}
