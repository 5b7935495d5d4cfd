pub mod config;
pub mod core;
pub mod protocol;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use core::{
    ChunkRequest,
    ChunkSpec,
    ChunkTransport,
    FileHandle,
    FileIdentity,
    Result,
    ResumeProbe,
    TransmissionError,
    UploadError,
    UploadOutcome,
    UploadResult,
    UploadState,
};

pub use config::UploaderConfig;

// 重新导出上传器
pub use uploaders::{ChunkedUploader, IdentityStrategy};
pub use protocol::chunked::{HttpChunkTransport, HttpResumeProbe, MemoryChunkStore};
pub use utils::{ProgressCallback, RetryPolicy, RetryStrategy};

pub use tokio_util::sync::CancellationToken;
