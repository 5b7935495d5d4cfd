use crate::core::{ChunkSpec, Result, UploadError};

/// 单个文件允许的最大分片数
pub const MAX_CHUNKS: u64 = 10_000_000;

/// 总分片数 `ceil(file_size / chunk_size)`
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Result<u64> {
    if chunk_size == 0 {
        return Err(UploadError::invalid_config("chunk_size must be greater than 0"));
    }

    Ok(file_size.div_ceil(chunk_size))
}

/// 计算分片信息，最后一个分片可能不足 `chunk_size`
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkSpec>> {
    let count = total_chunks(file_size, chunk_size)?;
    if count > MAX_CHUNKS {
        return Err(UploadError::invalid_config(format!(
            "chunk_size {} splits {} bytes into {} chunks, at most {} allowed",
            chunk_size, file_size, count, MAX_CHUNKS
        )));
    }

    let mut chunks = Vec::with_capacity(count as usize);
    let mut start = 0;
    let mut index = 0;

    while start < file_size {
        let end = std::cmp::min(start.saturating_add(chunk_size), file_size);
        chunks.push(ChunkSpec { index, start, end });
        start = end;
        index += 1;
    }

    Ok(chunks)
}
