//! Upload-with-rollback: store the file, run the caller's metadata step, and
//! delete the file again if that step fails.
//!
//! ```text
//! Start ──Stored──▶ Uploaded ──Committed──▶ Committed
//!   │                  │
//!   StoreFailed        CommitFailed
//!   ▼                  ▼
//! Aborted          Compensating ──Deleted──▶ RolledBack
//!                      │
//!                      DeleteFailed
//!                      ▼
//!                  RollbackFailed
//! ```
//!
//! Transitions are pure ([`SagaState::advance`]); the async driver in
//! [`UploadPipeline::upload_with_rollback`] performs the side effects and
//! feeds their outcome back in as events.

use crate::{
    models::{bucket::EntityClass, upload::{UploadRequest, UploadResult}},
    services::pipeline::{PipelineFailure, StoredUpload, UploadPipeline, audit_rejection},
};
use std::future::Future;
use tracing::{error, info, warn};

/// Log target for conditions that need a human: an orphaned object.
pub const ALERT_TARGET: &str = "document_vault::alert";

#[derive(Debug, Clone, PartialEq)]
pub enum SagaState {
    Start,
    Uploaded(StoredUpload),
    Committed(StoredUpload),
    Compensating {
        upload: StoredUpload,
        commit_error: String,
    },
    RolledBack {
        key: String,
        commit_error: String,
    },
    RollbackFailed {
        key: String,
        commit_error: String,
        delete_error: String,
    },
    Aborted(PipelineFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SagaEvent {
    Stored(StoredUpload),
    StoreFailed(PipelineFailure),
    CommitSucceeded,
    CommitFailed(String),
    Deleted,
    DeleteFailed(String),
}

impl SagaState {
    pub fn name(&self) -> &'static str {
        match self {
            SagaState::Start => "start",
            SagaState::Uploaded(_) => "uploaded",
            SagaState::Committed(_) => "committed",
            SagaState::Compensating { .. } => "compensating",
            SagaState::RolledBack { .. } => "rolled_back",
            SagaState::RollbackFailed { .. } => "rollback_failed",
            SagaState::Aborted(_) => "aborted",
        }
    }

    /// Apply one event. An event that does not apply to the current state
    /// leaves it unchanged.
    pub fn advance(self, event: SagaEvent) -> SagaState {
        match (self, event) {
            (SagaState::Start, SagaEvent::Stored(upload)) => SagaState::Uploaded(upload),
            (SagaState::Start, SagaEvent::StoreFailed(failure)) => SagaState::Aborted(failure),
            (SagaState::Uploaded(upload), SagaEvent::CommitSucceeded) => {
                SagaState::Committed(upload)
            }
            (SagaState::Uploaded(upload), SagaEvent::CommitFailed(commit_error)) => {
                SagaState::Compensating {
                    upload,
                    commit_error,
                }
            }
            (
                SagaState::Compensating {
                    upload,
                    commit_error,
                },
                SagaEvent::Deleted,
            ) => SagaState::RolledBack {
                key: upload.key.to_string(),
                commit_error,
            },
            (
                SagaState::Compensating {
                    upload,
                    commit_error,
                },
                SagaEvent::DeleteFailed(delete_error),
            ) => SagaState::RollbackFailed {
                key: upload.key.to_string(),
                commit_error,
                delete_error,
            },
            (state, event) => {
                warn!(state = state.name(), ?event, "ignoring out-of-order saga event");
                state
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Committed(_)
                | SagaState::RolledBack { .. }
                | SagaState::RollbackFailed { .. }
                | SagaState::Aborted(_)
        )
    }

    pub fn into_result(self) -> UploadResult {
        match self {
            SagaState::Committed(upload) => {
                UploadResult::succeeded(upload.key.to_string(), upload.signed_url)
            }
            SagaState::RolledBack { key, commit_error } => PipelineFailure::Commit {
                key,
                reason: commit_error,
            }
            .into_result(),
            SagaState::RollbackFailed {
                key,
                commit_error,
                delete_error,
            } => PipelineFailure::Compensation {
                key,
                commit_reason: commit_error,
                delete_reason: delete_error,
            }
            .into_result(),
            SagaState::Aborted(failure) => failure.into_result(),
            state => PipelineFailure::Transport(format!(
                "upload stopped in non-terminal state `{}`",
                state.name()
            ))
            .into_result(),
        }
    }
}

impl UploadPipeline {
    /// Store the file, then hand its signed URL to `commit`. If `commit`
    /// fails the stored object is deleted again, so a failed metadata step
    /// never leaves a reachable file behind.
    ///
    /// When that delete fails too the object is orphaned: the result carries
    /// its key and an alert is logged on [`ALERT_TARGET`].
    pub async fn upload_with_rollback<F, Fut>(
        &self,
        class: EntityClass,
        request: UploadRequest,
        commit: F,
    ) -> UploadResult
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut state = SagaState::Start;
        let entity_id = request.entity_id.clone();

        let stored = match self.store(class, request).await {
            Ok(upload) => SagaEvent::Stored(upload),
            Err(failure) => SagaEvent::StoreFailed(failure),
        };
        state = state.advance(stored);

        if let SagaState::Uploaded(upload) = &state {
            let committed = match commit(upload.signed_url.clone()).await {
                Ok(()) => SagaEvent::CommitSucceeded,
                Err(err) => SagaEvent::CommitFailed(format!("{err:#}")),
            };
            state = state.advance(committed);
        }

        if let SagaState::Compensating { upload, .. } = &state {
            let key = upload.key.to_string();
            let deleted = match self.gateway().delete(upload.class, &key).await {
                Ok(()) => SagaEvent::Deleted,
                Err(err) => SagaEvent::DeleteFailed(err.to_string()),
            };
            state = state.advance(deleted);
        }

        match &state {
            SagaState::Committed(upload) => {
                info!(bucket = %class, key = %upload.key, "document committed")
            }
            SagaState::RolledBack { key, commit_error } => {
                warn!(bucket = %class, key, %commit_error, "metadata commit failed, upload rolled back")
            }
            SagaState::RollbackFailed {
                key,
                commit_error,
                delete_error,
            } => error!(
                target: ALERT_TARGET,
                bucket = %class,
                key,
                %commit_error,
                %delete_error,
                "orphaned object: metadata commit and rollback both failed"
            ),
            SagaState::Aborted(failure) => audit_rejection(class, &entity_id, failure),
            SagaState::Start | SagaState::Uploaded(_) | SagaState::Compensating { .. } => {}
        }

        state.into_result()
    }
}
