use std::collections::BTreeSet;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::core::{
    ChunkRequest, ChunkTransport, FileIdentity, Result, ResumeProbe, TransmissionError,
    UploadError, UploadResult,
};

/// `GET <check_url>?fileId=<id>`，返回已上传分片序号的 JSON 数组
#[derive(Debug, Clone)]
pub struct HttpResumeProbe {
    client: Client,
    check_url: String,
}

impl HttpResumeProbe {
    pub fn new(client: Client, check_url: &str) -> Self {
        Self {
            client,
            check_url: check_url.to_string(),
        }
    }

    async fn fetch(&self, file_identity: &FileIdentity) -> Result<Vec<u64>> {
        let response = self
            .client
            .get(&self.check_url)
            .query(&[("fileId", file_identity.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::status(status.as_u16(), "Failed to check uploaded chunks"));
        }

        let chunks: Vec<u64> = response.json().await?;

        Ok(chunks)
    }
}

#[async_trait]
impl ResumeProbe for HttpResumeProbe {
    async fn uploaded_chunks(&self, file_identity: &FileIdentity) -> BTreeSet<u64> {
        match self.fetch(file_identity).await {
            Ok(chunks) => {
                debug!(file_id = %file_identity, chunks = ?chunks, "Uploaded chunks on server");
                chunks.into_iter().collect()
            }
            Err(err) => {
                // 校验失败从头上传
                warn!(file_id = %file_identity, error = %err, "Resume check failed, uploading from scratch");
                BTreeSet::new()
            }
        }
    }
}

/// `POST <upload_url>`，每个分片一次 multipart 请求
#[derive(Debug, Clone)]
pub struct HttpChunkTransport {
    client: Client,
    upload_url: String,
}

impl HttpChunkTransport {
    pub fn new(client: Client, upload_url: &str) -> Self {
        Self {
            client,
            upload_url: upload_url.to_string(),
        }
    }

    pub fn create_form(request: &ChunkRequest) -> Result<Form> {
        let chunk_file = Part::stream_with_length(request.data.clone(), request.data.len() as u64)
            .file_name(format!("chunk-{}", request.chunk.index))
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .text("fileId", request.file_identity.to_string())
            .text("fileName", request.file_name.clone())
            .text("fileSize", request.file_size.to_string())
            .text("chunkIndex", request.chunk.index.to_string())
            .text("totalChunks", request.total_chunks.to_string())
            .text("chunkSize", request.chunk_size.to_string())
            .part("chunkFile", chunk_file);

        Ok(form)
    }

    async fn post_chunk(&self, request: &ChunkRequest) -> Result<UploadResult> {
        let form = Self::create_form(request)?;

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::status(status.as_u16(), body));
        }

        let body = response.bytes().await?;
        let result: UploadResult = serde_json::from_slice(&body)
            .map_err(|err| TransmissionError::Decode(err.to_string()))?;

        Ok(result.into_accepted()?)
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn send_chunk(&self, request: &ChunkRequest, token: &CancellationToken) -> Result<UploadResult> {
        // 取消时丢弃请求 future，连接随之中断
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(UploadError::Cancelled),
            result = self.post_chunk(request) => result,
        }
    }
}
