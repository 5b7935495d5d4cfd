mod http;
mod memory;

pub use http::{HttpChunkTransport, HttpResumeProbe};
pub use memory::MemoryChunkStore;
