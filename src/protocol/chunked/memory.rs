use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::core::{
    ChunkRequest, ChunkTransport, FileIdentity, Result, ResumeProbe, UploadError, UploadResult,
};

#[derive(Debug, Default)]
struct StoredFile {
    total_chunks: u64,
    chunks: BTreeMap<u64, Bytes>,
    merged: Option<Bytes>,
}

/// 进程内的分片服务端
///
/// 按文件标识保存分片，所有分片到齐后按序号合并，并在该次响应里返回
/// `isAllMerged: true`。
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    files: Mutex<HashMap<FileIdentity, StoredFile>>,
    /// 收到的分片请求序号，包括失败的
    received: Mutex<Vec<u64>>,
    fail_next: AtomicU32,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<FileIdentity, StoredFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 接下来的 `count` 个分片请求返回 503
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// 预先写入分片，模拟上一次中断的上传
    pub fn insert_chunk(&self, file_identity: &FileIdentity, total_chunks: u64, index: u64, data: Bytes) {
        let mut files = self.files();
        let file = files.entry(file_identity.clone()).or_default();
        file.total_chunks = total_chunks;
        file.chunks.insert(index, data);
    }

    pub fn stored_chunks(&self, file_identity: &FileIdentity) -> BTreeSet<u64> {
        self.files()
            .get(file_identity)
            .map(|file| file.chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn merged(&self, file_identity: &FileIdentity) -> Option<Bytes> {
        self.files()
            .get(file_identity)
            .and_then(|file| file.merged.clone())
    }

    pub fn received(&self) -> Vec<u64> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn accept(&self, request: &ChunkRequest) -> UploadResult {
        if request.chunk.index >= request.total_chunks {
            return UploadResult::rejected(format!(
                "chunkIndex {} out of range, totalChunks {}",
                request.chunk.index, request.total_chunks
            ));
        }

        if request.data.len() as u64 != request.chunk.len() {
            return UploadResult::rejected(format!(
                "chunk {} has {} bytes, expected {}",
                request.chunk.index,
                request.data.len(),
                request.chunk.len()
            ));
        }

        let mut files = self.files();
        let file = files.entry(request.file_identity.clone()).or_default();
        if file.merged.is_some() {
            return UploadResult::merged();
        }

        file.total_chunks = request.total_chunks;
        file.chunks.insert(request.chunk.index, request.data.clone());

        if file.chunks.len() as u64 == file.total_chunks {
            let mut merged = BytesMut::new();
            for data in file.chunks.values() {
                merged.extend_from_slice(data);
            }
            debug!(file_id = %request.file_identity, size = merged.len(), "Chunks merged");
            file.merged = Some(merged.freeze());

            return UploadResult::merged();
        }

        UploadResult::accepted()
    }
}

#[async_trait]
impl ResumeProbe for MemoryChunkStore {
    async fn uploaded_chunks(&self, file_identity: &FileIdentity) -> BTreeSet<u64> {
        self.stored_chunks(file_identity)
    }
}

#[async_trait]
impl ChunkTransport for MemoryChunkStore {
    async fn send_chunk(&self, request: &ChunkRequest, token: &CancellationToken) -> Result<UploadResult> {
        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.chunk.index);

        if self.take_failure() {
            return Err(UploadError::status(503, "Service Unavailable"));
        }

        Ok(self.accept(request).into_accepted()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChunkSpec, TransmissionError};

    fn request(index: u64, data: &'static [u8], total_chunks: u64) -> ChunkRequest {
        let start = index * 4;
        ChunkRequest {
            file_identity: FileIdentity::new("file"),
            file_name: "file.bin".to_string(),
            file_size: 10,
            chunk: ChunkSpec { index, start, end: start + data.len() as u64 },
            total_chunks,
            chunk_size: 4,
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_merges_in_index_order() {
        let store = MemoryChunkStore::new();
        let token = CancellationToken::new();
        let id = FileIdentity::new("file");

        let result = store.send_chunk(&request(2, b"89", 3), &token).await.unwrap();
        assert!(!result.is_all_merged());
        let result = store.send_chunk(&request(0, b"0123", 3), &token).await.unwrap();
        assert!(!result.is_all_merged());
        assert_eq!(store.uploaded_chunks(&id).await, BTreeSet::from([0, 2]));

        let result = store.send_chunk(&request(1, b"4567", 3), &token).await.unwrap();
        assert!(result.is_all_merged());
        assert_eq!(store.merged(&id).unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(store.received(), vec![2, 0, 1]);
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_chunk() {
        let store = MemoryChunkStore::new();
        let token = CancellationToken::new();

        let err = store.send_chunk(&request(3, b"xx", 3), &token).await.unwrap_err();
        assert!(matches!(err, UploadError::Transmission(TransmissionError::Rejected(Some(_)))));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryChunkStore::new();
        let token = CancellationToken::new();
        store.fail_next(1);

        let err = store.send_chunk(&request(0, b"0123", 3), &token).await.unwrap_err();
        assert!(matches!(err, UploadError::Transmission(TransmissionError::Status { status: 503, .. })));
        assert!(store.send_chunk(&request(0, b"0123", 3), &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_token() {
        let store = MemoryChunkStore::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = store.send_chunk(&request(0, b"0123", 3), &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.received().is_empty());
    }
}
