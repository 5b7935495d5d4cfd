pub mod chunked;
