use std::io::{Write, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, bail};
use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::execute;
use tracing_subscriber::EnvFilter;
use chunkferry::{ChunkedUploader, FileHandle, UploadOutcome, UploaderConfig};
use chunkferry::utils::ProgressCallback;

/// chunkferry [config.toml] <file>
fn parse_args() -> (PathBuf, Option<PathBuf>) {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => (PathBuf::from("config.toml"), None),
        [file] => (PathBuf::from("config.toml"), Some(PathBuf::from(file))),
        [config, file, ..] => (PathBuf::from(config), Some(PathBuf::from(file))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let (config_path, file_path) = parse_args();
    let config = UploaderConfig::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let file_path = match file_path.or_else(|| config.file_path.clone()) {
        Some(path) => path,
        None => bail!("No file to upload, pass a path or set `file_path` in {}", config_path.display()),
    };

    let file = FileHandle::open(&file_path)
        .await
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

    let progress: ProgressCallback = Arc::new(|percent| {
        let _ = execute!(
            stdout(),
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(format!("Uploading... {}%", percent))
        );
    });

    let uploader = Arc::new(ChunkedUploader::new(config)?.with_progress(progress));

    let ctrl_c = {
        let uploader = uploader.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                uploader.cancel();
            }
        })
    };

    let outcome = uploader.start_upload(&file).await;
    ctrl_c.abort();
    println!();
    stdout().flush()?;

    match outcome? {
        UploadOutcome::Completed { file_identity, transmitted_chunks, skipped_chunks, .. } => {
            println!(
                "Upload completed: {} (fileId {}, {} chunks sent, {} resumed)",
                file.name(),
                file_identity,
                transmitted_chunks,
                skipped_chunks
            );
            Ok(())
        }
        UploadOutcome::Cancelled { .. } => bail!("Upload cancelled"),
    }
}
