use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::core::{FileIdentity, SessionId, UploadOutcome, UploadState};
use crate::utils::{ProgressCallback, ProgressReporter};

/// 一次上传尝试的内存状态，到达终态后丢弃
pub struct UploadSession {
    id: SessionId,
    state: UploadState,
    token: CancellationToken,
    reporter: ProgressReporter,
    pub(crate) file_identity: Option<FileIdentity>,
    pub(crate) file_size: u64,
    pub(crate) total_chunks: u64,
    pub(crate) uploaded_bytes: u64,
    pub(crate) persisted: BTreeSet<u64>,
    pub(crate) transmitted_chunks: u64,
}

impl UploadSession {
    pub fn new(file_size: u64, token: CancellationToken, on_progress: Option<ProgressCallback>) -> Self {
        Self {
            id: SessionId::new(),
            state: UploadState::Idle,
            token,
            reporter: ProgressReporter::new(on_progress),
            file_identity: None,
            file_size,
            total_chunks: 0,
            uploaded_bytes: 0,
            persisted: BTreeSet::new(),
            transmitted_chunks: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn transition(&mut self, to: UploadState) {
        if !UploadState::is_valid_transition(self.state, to) {
            warn!(session = %self.id, from = %self.state, to = %to, "Unexpected state transition");
        }

        debug!(session = %self.id, from = %self.state, to = %to, "State changed");
        self.state = to;
    }

    /// 已保存在服务端的分片也计入已上传字节
    pub(crate) fn count_persisted(&mut self, bytes: u64) {
        self.uploaded_bytes += bytes;
    }

    pub(crate) fn record_transmitted(&mut self, bytes: u64) {
        self.uploaded_bytes += bytes;
        self.transmitted_chunks += 1;
    }

    pub(crate) fn report_progress(&mut self) {
        self.reporter.report_bytes(self.uploaded_bytes, self.file_size);
    }

    pub(crate) fn is_fully_uploaded(&self) -> bool {
        self.uploaded_bytes >= self.file_size
    }

    pub(crate) fn complete(&mut self, server_merged: bool) -> UploadOutcome {
        self.transition(UploadState::Completed);
        self.reporter.complete();

        UploadOutcome::Completed {
            file_identity: self.file_identity.clone().unwrap_or_else(|| FileIdentity::new("")),
            transmitted_chunks: self.transmitted_chunks,
            skipped_chunks: self.persisted.len() as u64,
            server_merged,
        }
    }

    pub(crate) fn cancel(&mut self) -> UploadOutcome {
        self.transition(UploadState::Cancelled);

        UploadOutcome::Cancelled {
            file_identity: self.file_identity.clone(),
        }
    }

    pub(crate) fn fail(&mut self) {
        self.transition(UploadState::Failed);
    }
}
