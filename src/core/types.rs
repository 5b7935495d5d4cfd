use std::path::{Path, PathBuf};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;
use super::errors::{Result, TransmissionError, UploadError};

/// 一次上传尝试的唯一标识，只用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 本地文件的只读引用
///
/// 上传过程中不会修改文件，每次读取分片都重新打开文件，
/// 所以同一个 `FileHandle` 可以被多个上传任务共享。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
    name: String,
    size: u64,
    /// 毫秒时间戳
    last_modified: i64,
}

impl FileHandle {
    /// 从文件系统元数据构建
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a regular file: {}", path.display()),
            )));
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let last_modified = match metadata.modified() {
            Ok(time) => DateTime::<Utc>::from(time).timestamp_millis(),
            Err(_) => 0,
        };

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            last_modified,
        })
    }

    /// 调用方已知文件属性时使用，不访问文件系统
    pub fn with_attributes(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        size: u64,
        last_modified: i64,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// 读取 `[start, end)` 范围的字节
    pub async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes> {
        if end < start {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid range {}..{}", start, end),
            ));
        }

        let mut file = File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    pub async fn read_chunk(&self, chunk: &ChunkSpec) -> std::io::Result<Bytes> {
        self.read_range(chunk.start, chunk.end).await
    }
}

/// 文件的续传标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

impl FileIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 分片信息，`end` 不包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSpec {
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl ChunkSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// 分片上传接口的响应体
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_all_merged: Option<bool>,
}

impl UploadResult {
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: None,
            is_all_merged: Some(false),
        }
    }

    pub fn merged() -> Self {
        Self {
            success: true,
            message: None,
            is_all_merged: Some(true),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            is_all_merged: None,
        }
    }

    pub fn is_all_merged(&self) -> bool {
        self.is_all_merged.unwrap_or(false)
    }

    /// `success: false` 视为传输失败
    pub fn into_accepted(self) -> std::result::Result<Self, TransmissionError> {
        if self.success {
            Ok(self)
        } else {
            Err(TransmissionError::Rejected(self.message))
        }
    }
}

/// 交给传输层的一次分片提交
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub file_identity: FileIdentity,
    pub file_name: String,
    pub file_size: u64,
    pub chunk: ChunkSpec,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub data: Bytes,
}

/// 上传状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadState {
    Idle,
    /// 计算文件标识
    DerivingIdentity,
    /// 查询已上传的分片
    ProbingResume,
    /// 计算分片
    Planning,
    /// 上传中
    Transmitting,
    /// 等待重试
    Retrying,
    Completed,
    Cancelled,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_valid_transition(from: UploadState, to: UploadState) -> bool {
        use UploadState::*;

        if from.is_terminal() {
            return false;
        }

        match (from, to) {
            (Idle, DerivingIdentity) => true,
            (DerivingIdentity, ProbingResume) => true,
            (ProbingResume, Planning) => true,
            (Planning, Transmitting) | (Planning, Completed) => true,
            (Transmitting, Transmitting) | (Transmitting, Retrying) | (Transmitting, Completed) => true,
            (Retrying, Transmitting) => true,
            (Retrying, Failed) => true,
            // 派生标识以外的阶段都能被取消
            (ProbingResume | Planning | Transmitting | Retrying, Cancelled) => true,
            (DerivingIdentity, Failed) | (Planning, Failed) | (Transmitting, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// 上传结束时的结果（失败通过 `Err` 返回）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed {
        file_identity: FileIdentity,
        transmitted_chunks: u64,
        skipped_chunks: u64,
        /// 服务端通过 isAllMerged 确认已合并
        server_merged: bool,
    },
    Cancelled {
        file_identity: Option<FileIdentity>,
    },
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// 多个上传任务可以并发运行
const _: () = {
    fn assert_send<T: Send + Sync>() {}
    fn assert_types() {
        assert_send::<FileHandle>();
        assert_send::<ChunkRequest>();
        assert_send::<UploadOutcome>();
    }
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_state_transition() {
        use UploadState::*;

        // valid
        assert!(UploadState::is_valid_transition(Idle, DerivingIdentity));
        assert!(UploadState::is_valid_transition(ProbingResume, Planning));
        assert!(UploadState::is_valid_transition(Planning, Completed));
        assert!(UploadState::is_valid_transition(Transmitting, Retrying));
        assert!(UploadState::is_valid_transition(Retrying, Transmitting));
        assert!(UploadState::is_valid_transition(Retrying, Failed));
        assert!(UploadState::is_valid_transition(Transmitting, Cancelled));

        // invalid
        assert!(!UploadState::is_valid_transition(Completed, Transmitting));
        assert!(!UploadState::is_valid_transition(Cancelled, Transmitting));
        assert!(!UploadState::is_valid_transition(Failed, Retrying));
        assert!(!UploadState::is_valid_transition(Idle, Transmitting));
        assert!(!UploadState::is_valid_transition(DerivingIdentity, Cancelled));
    }

    #[test]
    fn test_upload_result_wire_format() {
        let result: UploadResult =
            serde_json::from_str(r#"{"success":true,"isAllMerged":true}"#).unwrap();
        assert!(result.success);
        assert!(result.is_all_merged());
        assert_eq!(result.message, None);

        let result: UploadResult =
            serde_json::from_str(r#"{"success":false,"message":"bad chunk"}"#).unwrap();
        assert!(!result.success);
        assert!(!result.is_all_merged());
        assert_eq!(result.message.as_deref(), Some("bad chunk"));
    }

    #[test]
    fn test_file_identity_serializes_as_string() {
        let id = FileIdentity::new("YS50eHQtMy0x");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""YS50eHQtMy0x""#);
    }

    #[tokio::test]
    async fn test_read_range_does_not_consume_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let handle = FileHandle::open(&path).await.unwrap();
        assert_eq!(handle.name(), "data.bin");
        assert_eq!(handle.size(), 10);

        let chunk = ChunkSpec { index: 1, start: 4, end: 8 };
        assert_eq!(&handle.read_chunk(&chunk).await.unwrap()[..], b"4567");
        assert_eq!(&handle.read_chunk(&chunk).await.unwrap()[..], b"4567");
        assert_eq!(&handle.read_range(0, 2).await.unwrap()[..], b"01");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_keeps_non_utf8_name() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(std::ffi::OsStr::from_bytes(b"r\xffport.bin"));
        tokio::fs::write(&path, b"abc").await.unwrap();

        let handle = FileHandle::open(&path).await.unwrap();
        assert_eq!(handle.name(), "r\u{FFFD}port.bin");
        assert_eq!(handle.size(), 3);
    }
}
