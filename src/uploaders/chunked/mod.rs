mod identity;
mod planner;
mod session;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use crate::config::UploaderConfig;
use crate::core::{
    ChunkRequest, ChunkSpec, ChunkTransport, FileHandle, FileIdentity, Result, ResumeProbe,
    UploadError, UploadOutcome, UploadResult, UploadState,
};
use crate::protocol::chunked::{HttpChunkTransport, HttpResumeProbe};
use crate::utils::{ProgressCallback, format_bytes};

pub use identity::{DEFAULT_SAMPLE_BYTES, IdentityStrategy, attribute_identity, content_identity};
pub use planner::{MAX_CHUNKS, plan_chunks, total_chunks};
pub use session::UploadSession;

/// 分片上传器
///
/// 按顺序逐个上传分片：先查询服务端已有的分片并跳过，
/// 失败的分片按重试策略等待后重传同一个分片，服务端返回
/// `isAllMerged` 时立即结束。配置在构建后不可变，同一个上传器
/// 可以同时上传多个文件，每次上传都有独立的会话。
pub struct ChunkedUploader {
    config: UploaderConfig,
    probe: Arc<dyn ResumeProbe>,
    transport: Arc<dyn ChunkTransport>,
    on_progress: Option<ProgressCallback>,
    /// `start_upload` 启动的上传都挂在这个令牌下
    cancel_handle: Mutex<CancellationToken>,
}

impl ChunkedUploader {
    /// 使用 HTTP 接口
    pub fn new(config: UploaderConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| UploadError::invalid_config(format!("Failed to build HTTP client: {}", err)))?;

        let probe = HttpResumeProbe::new(client.clone(), &config.check_url);
        let transport = HttpChunkTransport::new(client, &config.upload_url);

        Self::with_transport(config, Arc::new(probe), Arc::new(transport))
    }

    /// 使用自定义的断点校验和分片传输实现
    pub fn with_transport(
        config: UploaderConfig,
        probe: Arc<dyn ResumeProbe>,
        transport: Arc<dyn ChunkTransport>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            probe,
            transport,
            on_progress: None,
            cancel_handle: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// 上传文件，可以通过 [`cancel`](Self::cancel) 中断
    pub async fn start_upload(&self, file: &FileHandle) -> Result<UploadOutcome> {
        let token = self
            .cancel_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();

        self.upload_with_token(file, token).await
    }

    pub async fn upload_path(&self, path: impl AsRef<Path>) -> Result<UploadOutcome> {
        let file = FileHandle::open(path).await?;
        self.start_upload(&file).await
    }

    /// 中断所有由 `start_upload` 启动且尚未结束的上传
    ///
    /// 已上传的分片不会回滚，之后的 `start_upload` 不受影响。
    pub fn cancel(&self) {
        let mut handle = self.cancel_handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle.cancel();
        *handle = CancellationToken::new();
        info!("Upload cancelled");
    }

    /// 使用调用方自己的取消令牌上传
    pub async fn upload_with_token(&self, file: &FileHandle, token: CancellationToken) -> Result<UploadOutcome> {
        let mut session = UploadSession::new(file.size(), token, self.on_progress.clone());
        let span = info_span!("upload", session = %session.id(), file = %file.name());

        self.run(&mut session, file).instrument(span).await
    }

    async fn run(&self, session: &mut UploadSession, file: &FileHandle) -> Result<UploadOutcome> {
        info!("Start uploading {} ({})", file.name(), format_bytes(file.size()));

        // 1. 文件唯一标识
        session.transition(UploadState::DerivingIdentity);
        let file_identity = match self.config.identity.derive(file).await {
            Ok(file_identity) => file_identity,
            Err(err) => {
                session.fail();
                return Err(err);
            }
        };
        debug!(file_id = %file_identity, "File identity derived");
        session.file_identity = Some(file_identity.clone());

        // 2. 断点校验
        session.transition(UploadState::ProbingResume);
        if session.is_cancelled() {
            info!("Upload cancelled before resume check");
            return Ok(session.cancel());
        }

        let token = session.token().clone();
        let uploaded_chunks = tokio::select! {
            uploaded_chunks = self.probe.uploaded_chunks(&file_identity) => uploaded_chunks,
            _ = token.cancelled() => {
                info!("Upload cancelled during resume check");
                return Ok(session.cancel());
            }
        };

        // 3. 计算分片
        session.transition(UploadState::Planning);
        let chunks = match plan_chunks(file.size(), self.config.chunk_size) {
            Ok(chunks) => chunks,
            Err(err) => {
                session.fail();
                return Err(err);
            }
        };
        session.total_chunks = chunks.len() as u64;

        for chunk in &chunks {
            if uploaded_chunks.contains(&chunk.index) {
                session.persisted.insert(chunk.index);
                session.count_persisted(chunk.len());
            }
        }

        if session.persisted.len() as u64 == session.total_chunks {
            info!("File already uploaded ({} chunks)", session.total_chunks);
            return Ok(session.complete(false));
        }

        // 4. 按顺序上传未完成的分片
        info!(
            "Uploading {} chunks, {} already on server",
            session.total_chunks,
            session.persisted.len()
        );
        session.transition(UploadState::Transmitting);
        session.report_progress();

        for chunk in &chunks {
            if session.persisted.contains(&chunk.index) {
                continue;
            }

            let result = match self.transmit_with_retry(session, file, &file_identity, chunk).await {
                Ok(result) => result,
                Err(UploadError::Cancelled) => {
                    info!(chunk_index = chunk.index, "Upload cancelled");
                    return Ok(session.cancel());
                }
                Err(err) => {
                    if session.state() != UploadState::Failed {
                        warn!(chunk_index = chunk.index, error = %err, "Upload failed");
                        session.fail();
                    }
                    return Err(err);
                }
            };

            session.record_transmitted(chunk.len());

            if result.is_all_merged() {
                info!(chunk_index = chunk.index, "All chunks merged by server");
                return Ok(session.complete(true));
            }

            if !session.is_fully_uploaded() {
                session.report_progress();
            }
            session.transition(UploadState::Transmitting);
        }

        info!("All {} chunks uploaded", session.total_chunks);
        Ok(session.complete(false))
    }

    /// 上传单个分片，失败时重试同一个分片
    async fn transmit_with_retry(
        &self,
        session: &mut UploadSession,
        file: &FileHandle,
        file_identity: &FileIdentity,
        chunk: &ChunkSpec,
    ) -> Result<UploadResult> {
        let policy = &self.config.retry;
        let mut failures: u32 = 0;

        loop {
            if session.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            debug!(
                "Uploading chunk {}/{} ({} - {})",
                chunk.index,
                session.total_chunks,
                format_bytes(chunk.start),
                format_bytes(chunk.end)
            );

            let error = match self.transmit(session, file, file_identity, chunk).await {
                Ok(result) => return Ok(result),
                Err(UploadError::Transmission(err)) => err,
                Err(err) => return Err(err),
            };

            failures = failures.saturating_add(1);
            session.transition(UploadState::Retrying);

            if !policy.allows_another(failures) {
                warn!(chunk_index = chunk.index, attempts = failures, error = %error, "Chunk upload failed, giving up");
                session.fail();
                return Err(UploadError::RetryLimitExceeded {
                    chunk_index: chunk.index,
                    attempts: failures,
                    source: error,
                });
            }

            warn!(chunk_index = chunk.index, attempts = failures, error = %error, "Chunk upload failed, will retry");
            policy.backoff(failures - 1, session.token()).await?;
            session.transition(UploadState::Transmitting);
        }
    }

    async fn transmit(
        &self,
        session: &UploadSession,
        file: &FileHandle,
        file_identity: &FileIdentity,
        chunk: &ChunkSpec,
    ) -> Result<UploadResult> {
        // 本地读取失败不重试
        let data = file.read_chunk(chunk).await?;

        let request = ChunkRequest {
            file_identity: file_identity.clone(),
            file_name: file.name().to_string(),
            file_size: file.size(),
            chunk: *chunk,
            total_chunks: session.total_chunks,
            chunk_size: self.config.chunk_size,
            data,
        };

        self.transport.send_chunk(&request, session.token()).await
    }
}
