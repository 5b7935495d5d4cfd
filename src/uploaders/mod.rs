pub mod chunked;

pub use chunked::{ChunkedUploader, IdentityStrategy};
