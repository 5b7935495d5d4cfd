use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use url::Url;
use crate::core::{Result, UploadError};
use crate::uploaders::chunked::IdentityStrategy;
use crate::utils::RetryPolicy;

/// 默认分片大小 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 默认请求超时 5 分钟
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// 上传器配置，构建后不可变
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UploaderConfig {
    /// 分片上传接口地址
    pub upload_url: String,
    /// 断点校验接口地址
    pub check_url: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub identity: IdentityStrategy,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 命令行未指定文件时使用
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl UploaderConfig {
    pub fn new(upload_url: impl Into<String>, check_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            check_url: check_url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            identity: IdentityStrategy::default(),
            retry: RetryPolicy::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            file_path: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_identity(mut self, identity: IdentityStrategy) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: UploaderConfig = toml::from_str(content)
            .map_err(|err| UploadError::invalid_config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| {
            UploadError::invalid_config(format!("Can't read {}: {}", path.display(), err))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::invalid_config("chunk_size must be greater than 0"));
        }

        for (name, value) in [("upload_url", &self.upload_url), ("check_url", &self.check_url)] {
            Url::parse(value)
                .map_err(|err| UploadError::invalid_config(format!("Invalid {}: {:?} ({})", name, value, err)))?;
        }

        if self.retry.max_attempts == Some(0) {
            return Err(UploadError::invalid_config("retry.max_attempts must be greater than 0"));
        }

        if let IdentityStrategy::ContentHash { sample_bytes } = self.identity {
            if sample_bytes == 0 {
                return Err(UploadError::invalid_config("identity.sample_bytes must be greater than 0"));
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RetryStrategy;

    #[test]
    fn test_defaults() {
        let config = UploaderConfig::from_toml_str(
            r#"
            upload_url = "http://localhost:8080/file/chunk"
            check_url = "http://localhost:8080/file/check"
            "#,
        ).unwrap();

        assert_eq!(config.chunk_size, 5_242_880);
        assert_eq!(config.identity, IdentityStrategy::Attributes);
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.retry.strategy, RetryStrategy::Fixed { delay_ms: 1000 });
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = UploaderConfig::from_toml_str(
            r#"
            upload_url = "http://localhost:8080/file/chunk"
            check_url = "http://localhost:8080/file/check"
            chunk_size = 1048576
            request_timeout_secs = 30
            file_path = "video.mp4"

            [identity]
            kind = "content_hash"
            sample_bytes = 4096

            [retry]
            max_attempts = 10
            "#,
        ).unwrap();

        assert_eq!(config.chunk_size, 1_048_576);
        assert_eq!(config.identity, IdentityStrategy::ContentHash { sample_bytes: 4096 });
        assert_eq!(config.retry.max_attempts, Some(10));
        assert_eq!(config.file_path, Some(PathBuf::from("video.mp4")));
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = UploaderConfig::new("http://a/upload", "http://a/check")
            .with_chunk_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_max_attempts() {
        let err = UploaderConfig::from_toml_str(
            r#"
            upload_url = "http://localhost/upload"
            check_url = "http://localhost/check"

            [retry]
            max_attempts = 0
            "#,
        ).unwrap_err();
        assert!(matches!(err, UploadError::InvalidConfig(_)));
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_rejects_bad_url() {
        let err = UploaderConfig::from_toml_str(
            r#"
            upload_url = "not a url"
            check_url = "http://localhost/check"
            "#,
        ).unwrap_err();
        assert!(err.to_string().contains("upload_url"));
    }
}
