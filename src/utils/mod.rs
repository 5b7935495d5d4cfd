pub mod progress;
pub mod retry;

pub use progress::{ProgressCallback, ProgressReporter, format_bytes, percentage};
pub use retry::{RetryBuilder, RetryPolicy, RetryStrategy};
