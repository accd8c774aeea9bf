//! Lifecycle coordination: routes domain events into index writes.
//!
//! Every event is independent and idempotent. Failures on the indexing path
//! are logged and swallowed so the host workflow that emitted the event never
//! breaks; while the schema is not installed every operation is a no-op.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::search::dao::{Dao, RecordFields};
use crate::search::error::SearchError;
use crate::search::extractor::{extract_text, FileParserFactory};
use crate::search::normalizer::normalize;
use crate::{HostRepository, Submission};

/// Domain events the index reacts to.
#[derive(Debug, Clone)]
pub enum IndexingEvent {
    /// A submission's current publication metadata changed.
    MetadataChanged { submission: Submission },
    /// A submission file was added or replaced.
    FileChanged { submission_id: i64, file_stage: i64, file_id: i64 },
    /// A submission file was removed.
    FileDeleted { submission_id: i64 },
    SubmissionDeleted { submission_id: i64 },
    PublicationUnpublished { submission_id: i64 },
}

/// Counters reported by a bulk rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildStats {
    pub contexts: usize,
    pub submissions: usize,
    pub files: usize,
    pub pruned: u64,
}

/// Event router driving the normalizer, the extractor and the record store.
pub struct Indexer {
    dao: Dao,
    host: Arc<dyn HostRepository>,
    parsers: Arc<dyn FileParserFactory>,
    installed: bool,
}

impl Indexer {
    pub fn new(
        dao: Dao,
        host: Arc<dyn HostRepository>,
        parsers: Arc<dyn FileParserFactory>,
        installed: bool,
    ) -> Self {
        Self { dao, host, parsers, installed }
    }

    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Route one domain event, logging and swallowing any failure.
    pub async fn handle(&self, event: IndexingEvent) {
        if !self.installed {
            debug!("search index not installed; ignoring {event:?}");
            return;
        }
        let outcome = match event {
            IndexingEvent::MetadataChanged { submission } => {
                self.index_submission(&submission).await
            }
            IndexingEvent::FileChanged { submission_id, file_id, .. } => {
                self.index_submission_file(submission_id, file_id).await
            }
            IndexingEvent::FileDeleted { submission_id } => {
                self.dao.clear_galley_text(submission_id).await
            }
            IndexingEvent::SubmissionDeleted { submission_id }
            | IndexingEvent::PublicationUnpublished { submission_id } => {
                self.dao.delete_by_submission(submission_id).await
            }
        };
        if let Err(err) = outcome {
            error!("indexing event failed: {err}");
        }
    }

    /// Reindex a submission's metadata; the galley text snapshot is left
    /// untouched.
    pub async fn index_submission(&self, submission: &Submission) -> Result<(), SearchError> {
        let fields = normalize(&submission.current_publication);
        self.dao.upsert(submission.id, submission.context_id, &fields).await
    }

    /// Replace the submission's galley text snapshot with the extracted text
    /// of one file. The last indexed file wins.
    pub async fn index_submission_file(
        &self,
        submission_id: i64,
        file_id: i64,
    ) -> Result<(), SearchError> {
        let Some(file) = self.host.file(file_id).await? else {
            return Ok(());
        };
        let Some(submission) = self.host.submission(submission_id).await? else {
            return Ok(());
        };
        let galley_text = extract_text(self.parsers.as_ref(), &file);
        self.dao
            .upsert(submission_id, submission.context_id, &RecordFields::galley_only(galley_text))
            .await
    }

    /// Rebuild the index for the given contexts, then prune records whose
    /// submissions are no longer published.
    ///
    /// Each submission is an independent unit of work with no surrounding
    /// transaction, so an interrupted rebuild can simply be re-run.
    pub async fn rebuild(&self, context_ids: &[i64]) -> Result<RebuildStats, SearchError> {
        let mut stats = RebuildStats::default();
        for &context_id in context_ids {
            let submissions = self.host.published_submissions(context_id).await?;
            info!(
                "rebuilding context {context_id} ({} published submissions)",
                submissions.len()
            );
            for submission in &submissions {
                self.index_submission(submission).await?;
                for file in self.host.proof_files(submission.id).await? {
                    self.index_submission_file(submission.id, file.id).await?;
                    stats.files += 1;
                }
                stats.submissions += 1;
            }
            stats.contexts += 1;
        }
        stats.pruned = self.dao.prune_unpublished(context_ids).await?;
        info!(
            "rebuild complete: {} submissions, {} files, {} stale rows pruned",
            stats.submissions, stats.files, stats.pruned
        );
        Ok(stats)
    }
}
