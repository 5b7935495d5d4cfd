use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use crate::core::{FileHandle, FileIdentity, Result, UploadError};

/// 内容采样默认大小 1MB（头尾各一段）
pub const DEFAULT_SAMPLE_BYTES: u64 = 1024 * 1024;

fn default_sample_bytes() -> u64 {
    DEFAULT_SAMPLE_BYTES
}

/// 文件标识的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// base64(文件名-大小-修改时间)
    #[default]
    Attributes,
    /// md5(头部采样 + 尾部采样 + "大小-修改时间")
    ContentHash {
        #[serde(default = "default_sample_bytes")]
        sample_bytes: u64,
    },
}

impl IdentityStrategy {
    pub async fn derive(&self, file: &FileHandle) -> Result<FileIdentity> {
        match *self {
            IdentityStrategy::Attributes => attribute_identity(file),
            IdentityStrategy::ContentHash { sample_bytes } => content_identity(file, sample_bytes).await,
        }
    }
}

/// 基于文件名、大小、修改时间的标识，不读取文件内容
///
/// 三个属性都为空时无法区分文件，返回错误。
pub fn attribute_identity(file: &FileHandle) -> Result<FileIdentity> {
    if file.name().is_empty() && file.size() == 0 && file.last_modified() == 0 {
        return Err(UploadError::identity(format!(
            "File has no usable attributes: {}",
            file.path().display()
        )));
    }

    let file_info = format!("{}-{}-{}", file.name(), file.size(), file.last_modified());

    Ok(FileIdentity::new(BASE64_STANDARD.encode(file_info)))
}

/// 大文件只读取头尾两段计算 md5
pub async fn content_identity(file: &FileHandle, sample_bytes: u64) -> Result<FileIdentity> {
    if sample_bytes == 0 {
        return Err(UploadError::identity("sample_bytes must be greater than 0"));
    }

    let size = file.size();
    let head_end = sample_bytes.min(size);
    let tail_start = size.saturating_sub(sample_bytes);

    let mut hasher = Md5::new();
    for (start, end) in [(0, head_end), (tail_start, size)] {
        let sample = file
            .read_range(start, end)
            .await
            .map_err(|err| UploadError::identity(format!("Failed to read {}: {}", file.path().display(), err)))?;
        hasher.update(&sample);
    }
    hasher.update(format!("{}-{}", size, file.last_modified()).as_bytes());

    Ok(FileIdentity::new(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_identity_is_stable() {
        let file = FileHandle::with_attributes("/tmp/report.pdf", "report.pdf", 12_582_912, 1_700_000_000_000);

        let first = attribute_identity(&file).unwrap();
        let second = attribute_identity(&file.clone()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str(), BASE64_STANDARD.encode("report.pdf-12582912-1700000000000"));
    }

    #[test]
    fn test_attribute_identity_differs_per_attribute() {
        let base = FileHandle::with_attributes("/tmp/a.bin", "a.bin", 10, 1);
        let renamed = FileHandle::with_attributes("/tmp/b.bin", "b.bin", 10, 1);
        let resized = FileHandle::with_attributes("/tmp/a.bin", "a.bin", 11, 1);
        let touched = FileHandle::with_attributes("/tmp/a.bin", "a.bin", 10, 2);

        let id = attribute_identity(&base).unwrap();
        assert_ne!(id, attribute_identity(&renamed).unwrap());
        assert_ne!(id, attribute_identity(&resized).unwrap());
        assert_ne!(id, attribute_identity(&touched).unwrap());
    }

    #[test]
    fn test_attribute_identity_requires_some_attribute() {
        let file = FileHandle::with_attributes("/", "", 0, 0);
        assert!(matches!(attribute_identity(&file), Err(UploadError::Identity(_))));

        // 没有文件名时仍可用大小和修改时间
        let nameless = FileHandle::with_attributes("/", "", 10, 1_700_000_000_000);
        let id = attribute_identity(&nameless).unwrap();
        assert_eq!(id.as_str(), BASE64_STANDARD.encode("-10-1700000000000"));
    }

    #[tokio::test]
    async fn test_content_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        tokio::fs::write(&path, vec![7u8; 10_000]).await.unwrap();

        let file = FileHandle::open(&path).await.unwrap();
        let strategy = IdentityStrategy::ContentHash { sample_bytes: 1024 };

        let first = strategy.derive(&file).await.unwrap();
        let second = strategy.derive(&file).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);

        // 同样的属性，不同的内容
        let other_path = dir.path().join("other.bin");
        tokio::fs::write(&other_path, vec![8u8; 10_000]).await.unwrap();
        let other = FileHandle::with_attributes(&other_path, file.name(), file.size(), file.last_modified());
        assert_ne!(first, strategy.derive(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_content_identity_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.txt");
        tokio::fs::write(&path, b"hi").await.unwrap();

        let file = FileHandle::open(&path).await.unwrap();
        let id = content_identity(&file, DEFAULT_SAMPLE_BYTES).await.unwrap();
        assert_eq!(id.as_str().len(), 32);
    }
}
