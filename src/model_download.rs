use std::{fs, io, path::Path, time::Duration};

use anyhow::{Context, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelStatus {
    /// The file was already on disk.
    Present,
    Downloaded { bytes: u64 },
}

/// Makes sure the `model` file exists at `path`, fetching it from `url`
/// when it is missing. `model` names the `[detector.<model>]` config section.
/// Partial downloads never land at `path`.
pub fn ensure_model_ready(
    model: &str,
    path: &Path,
    url: Option<&str>,
) -> anyhow::Result<ModelStatus> {
    if path.is_file() {
        return Ok(ModelStatus::Present);
    }

    let Some(url) = url else {
        bail!(
            "{model} model not found at {} and no download url is configured (set detector.{model}.url)",
            path.display()
        );
    };

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create model directory {}", dir.display()))?;
    }

    let partial = path.with_extension("download");
    let result = fetch(model, url, &partial).and_then(|bytes| {
        fs::rename(&partial, path)
            .with_context(|| format!("failed to move model into place at {}", path.display()))?;
        Ok(bytes)
    });
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }

    let bytes = result
        .with_context(|| format!("failed to download {model} model to {}", path.display()))?;
    Ok(ModelStatus::Downloaded { bytes })
}

fn fetch(model: &str, url: &str, dest: &Path) -> anyhow::Result<u64> {
    log::info!("downloading {model} model from {url}");

    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let mut response = client
        .get(url)
        .send()
        .context("request failed")?
        .error_for_status()
        .context("server returned an error status")?;

    let expected = response.content_length();
    let mut file =
        fs::File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    let progress = progress_bar(model, expected);
    let written = io::copy(&mut response, &mut progress.wrap_write(&mut file))
        .context("transfer interrupted")?;
    progress.finish_and_clear();

    if let Some(expected) = expected.filter(|&expected| expected != written) {
        bail!("received {written} of {expected} bytes");
    }
    file.sync_all().context("failed to flush model to disk")?;

    log::info!("{model} model downloaded ({written} bytes)");
    Ok(written)
}

fn progress_bar(model: &str, total: Option<u64>) -> ProgressBar {
    let (bar, template) = match total.filter(|&total| total > 0) {
        Some(total) => (
            ProgressBar::new(total),
            "{msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ),
        None => (ProgressBar::new_spinner(), "{spinner:.green} {msg} {bytes}"),
    };
    match ProgressStyle::with_template(template) {
        Ok(style) => bar.set_style(style.progress_chars("=>-")),
        Err(_) => return ProgressBar::hidden(),
    }
    bar.set_message(format!("{model} model"));
    bar
}
