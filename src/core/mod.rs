mod errors;
mod traits;
mod types;

pub use errors::{Result, TransmissionError, UploadError};
pub use traits::{ChunkTransport, ResumeProbe};
pub use types::{
    ChunkRequest,
    ChunkSpec,
    FileHandle,
    FileIdentity,
    SessionId,
    UploadOutcome,
    UploadResult,
    UploadState,
};
