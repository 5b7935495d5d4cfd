use std::collections::BTreeSet;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use super::types::{ChunkRequest, FileIdentity, UploadResult};
use super::errors::Result;

/// 断点校验 - 查询服务端已保存的分片
///
/// 实现方不返回错误：查询失败时返回空集合，由上传流程从头上传。
#[async_trait]
pub trait ResumeProbe: Send + Sync {
    async fn uploaded_chunks(&self, file_identity: &FileIdentity) -> BTreeSet<u64>;
}

/// 分片传输 - 一次请求提交一个分片
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// 提交分片
    ///
    /// `token` 被触发时必须中断进行中的请求并返回 `UploadError::Cancelled`，
    /// 其他失败一律返回 `UploadError::Transmission`。
    async fn send_chunk(
        &self,
        request: &ChunkRequest,
        token: &CancellationToken,
    ) -> Result<UploadResult>;
}
