//! Fetch the sentence embedding model from HuggingFace on first run.
//!
//! sentence-transformers/all-MiniLM-L6-v2 (Apache 2.0), ONNX export ~90 MB.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const HF_BASE: &str = "https://huggingface.co";
const MAX_ATTEMPTS: u32 = 3;

/// Model file descriptor: (relative_url_path, local_filename, expected_min_bytes)
struct ModelFile {
    url_path: &'static str,
    local_name: &'static str,
    min_bytes: u64,
}

const MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const MINILM_DIR: &str = "all-MiniLM-L6-v2";

const MINILM_FILES: &[ModelFile] = &[
    ModelFile {
        url_path: "onnx/model.onnx",
        local_name: "model.onnx",
        min_bytes: 10_000_000,
    },
    ModelFile {
        url_path: "tokenizer.json",
        local_name: "tokenizer.json",
        min_bytes: 1_000,
    },
];

/// Ensure the MiniLM model is present under `model_dir`, downloading if missing.
/// Returns the model directory path.
pub async fn ensure_minilm_model(model_dir: &Path) -> Result<PathBuf> {
    let target_dir = model_dir.join(MINILM_DIR);
    ensure_model_files(&target_dir, MINILM_REPO, MINILM_FILES, "all-MiniLM-L6-v2").await?;
    Ok(target_dir)
}

fn missing_files<'a>(target_dir: &Path, files: &'a [ModelFile]) -> Vec<&'a ModelFile> {
    files
        .iter()
        .filter(|f| match target_dir.join(f.local_name).metadata() {
            Ok(meta) => meta.len() < f.min_bytes,
            Err(_) => true,
        })
        .collect()
}

async fn ensure_model_files(
    target_dir: &Path,
    repo: &str,
    files: &[ModelFile],
    display_name: &str,
) -> Result<()> {
    let missing = missing_files(target_dir, files);
    if missing.is_empty() {
        return Ok(());
    }

    tracing::info!(
        model = display_name,
        missing_files = missing.len(),
        dir = %target_dir.display(),
        "Downloading model files from HuggingFace"
    );

    tokio::fs::create_dir_all(target_dir).await.map_err(|e| {
        anyhow!(
            "Failed to create model directory {}: {}",
            target_dir.display(),
            e
        )
    })?;

    let client = reqwest::Client::builder()
        .user_agent("jdfit/0.1")
        .timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

    for file in &missing {
        let url = format!("{}/{}/resolve/main/{}", HF_BASE, repo, file.url_path);
        let dest = target_dir.join(file.local_name);
        download_with_retry(&client, &url, &dest, file.local_name).await?;
    }

    tracing::info!(model = display_name, "Model files ready");
    Ok(())
}

async fn download_with_retry(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    filename: &str,
) -> Result<()> {
    let mut last_error = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match download_streaming(client, url, dest, filename).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_error = Some(e);
                if attempt < MAX_ATTEMPTS {
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(
                        file = filename,
                        attempt,
                        "Download failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Download failed after {} attempts", MAX_ATTEMPTS)))
}

/// Stream to `<dest>.downloading`, then rename into place.
async fn download_streaming(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    filename: &str,
) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow!("HTTP request failed for {}: {}", filename, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("HTTP {} downloading {} from {}", status, filename, url));
    }

    let total_size = response.content_length().unwrap_or(0);
    tracing::info!(
        file = filename,
        size_mb = format!("{:.1}", total_size as f64 / 1_048_576.0),
        "Downloading"
    );

    let downloaded = write_atomically(response.bytes_stream(), dest, filename, total_size).await?;

    tracing::info!(
        file = filename,
        size_mb = format!("{:.1}", downloaded as f64 / 1_048_576.0),
        "Download complete"
    );
    Ok(())
}

/// Write `stream` to a temp file next to `dest` and rename it into place.
/// On any failure the temp file is removed and `dest` is left untouched.
async fn write_atomically<S, B, E>(
    stream: S,
    dest: &Path,
    filename: &str,
    total_size: u64,
) -> Result<u64>
where
    S: futures_util::Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let tmp_dest = dest.with_extension("downloading");
    let result = write_stream(stream, &tmp_dest, filename, total_size).await;
    let result = match result {
        Ok(downloaded) => tokio::fs::rename(&tmp_dest, dest)
            .await
            .map(|_| downloaded)
            .map_err(|e| anyhow!("Failed to finalize {}: {}", filename, e)),
        Err(e) => Err(e),
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_dest).await;
    }
    result
}

async fn write_stream<S, B, E>(
    stream: S,
    tmp_dest: &Path,
    filename: &str,
    total_size: u64,
) -> Result<u64>
where
    S: futures_util::Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(tmp_dest)
        .await
        .map_err(|e| anyhow!("Failed to create {}: {}", tmp_dest.display(), e))?;

    let mut stream = std::pin::pin!(stream);
    let mut downloaded: u64 = 0;
    let mut last_log_pct: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| anyhow!("Stream error downloading {}: {}", filename, e))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .map_err(|e| anyhow!("Write error for {}: {}", filename, e))?;
        downloaded += bytes.len() as u64;

        if total_size > 0 {
            let pct = (downloaded * 100) / total_size;
            if pct >= last_log_pct + 25 {
                last_log_pct = pct - (pct % 25);
                tracing::info!(
                    file = filename,
                    progress = format!("{}%", last_log_pct),
                    "Download progress"
                );
            }
        }
    }

    file.flush()
        .await
        .map_err(|e| anyhow!("Flush error for {}: {}", filename, e))?;
    Ok(downloaded)
}
