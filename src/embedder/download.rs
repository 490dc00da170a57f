//! First-run fetch of the ONNX export from the Hugging Face hub.
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

const HF_BASE: &str = "https://huggingface.co";

pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Local file name and its path inside the hub repository. These are the only
/// files the ONNX embedder opens.
const REQUIRED_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
];

/// Hub repository for a configured model name. Bare names live under
/// `sentence-transformers/`.
#[must_use]
pub fn repo_for(model_name: &str) -> String {
    if model_name.contains('/') {
        model_name.to_string()
    } else {
        format!("sentence-transformers/{model_name}")
    }
}

fn file_url(repo: &str, remote_path: &str) -> String {
    format!("{HF_BASE}/{repo}/resolve/main/{remote_path}")
}

/// Required files not yet present in `model_dir`.
#[must_use]
pub fn missing_files(model_dir: &Path) -> Vec<&'static str> {
    REQUIRED_FILES
        .iter()
        .filter(|(name, _)| !model_dir.join(name).is_file())
        .map(|&(name, _)| name)
        .collect()
}

/// Download whatever `missing_files` reports. Files already on disk are kept.
pub fn fetch_missing(model_dir: &Path, repo: &str) -> Result<()> {
    let missing = missing_files(model_dir);
    if missing.is_empty() {
        debug!("Model files already present in {}", model_dir.display());
        return Ok(());
    }

    fs::create_dir_all(model_dir)
        .with_context(|| format!("cannot create model directory {}", model_dir.display()))?;
    info!(
        "Fetching {} file(s) of {repo} into {}",
        missing.len(),
        model_dir.display()
    );

    for &(name, remote) in REQUIRED_FILES.iter().filter(|(n, _)| missing.contains(n)) {
        let url = file_url(repo, remote);
        download_file(&model_dir.join(name), &url)
            .with_context(|| format!("downloading {name} from {url}"))?;
    }

    info!("Model {repo} ready");
    Ok(())
}

fn progress_for(len: Option<u64>, name: &str) -> Result<ProgressBar> {
    let pb = match len {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {msg:16} {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .map_err(|e| anyhow::anyhow!("progress template: {e}"))?
                    .progress_chars("█▓░"),
            );
            pb
        }
        _ => ProgressBar::new_spinner(),
    };
    pb.set_message(name.to_string());
    Ok(pb)
}

/// Streams into `<dest>.part`, renamed over `dest` only after the body is complete.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let resp = reqwest::blocking::get(url)?.error_for_status()?;

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pb = progress_for(resp.content_length(), &name)?;

    let part = dest.with_extension("part");
    let mut file =
        fs::File::create(&part).with_context(|| format!("creating {}", part.display()))?;
    let written = io::copy(&mut pb.wrap_read(resp), &mut file);
    pb.finish_and_clear();

    match written.and_then(|_| file.sync_all()) {
        Ok(()) => {}
        Err(e) => {
            let _ = fs::remove_file(&part);
            return Err(e).context("writing model file");
        }
    }
    fs::rename(&part, dest).with_context(|| format!("moving {} into place", part.display()))?;
    Ok(())
}
