//! Page rendering: PDF pages to PNG images via pdftoppm.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use decklens_core::{defaults, Error, Result};
use tokio::process::Command;
use tracing::debug;

/// One rendered document page.
#[derive(Debug)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page_number: i32,
    /// PNG image bytes.
    pub data: Vec<u8>,
    /// Persisted image path, when the renderer keeps slides on disk.
    pub image_path: Option<String>,
}

/// Renders a document's pages to images for the visual stage.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_pages(&self, file_path: &str) -> Result<Vec<RenderedPage>>;
}

/// Run a command that outputs to files rather than stdout.
async fn run_cmd_status(cmd: &mut Command, timeout_secs: u64) -> Result<()> {
    let output = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Render(format!(
                "External command timed out after {}s",
                timeout_secs
            ))
        })?
        .map_err(|e| Error::Render(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Render(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}

/// pdftoppm-based renderer.
///
/// With a slide directory configured, rendered pages are kept under
/// `<slide_dir>/<document stem>/` and their paths recorded on each page;
/// otherwise pages are rendered into a temp dir and only the bytes survive.
pub struct PdftoppmRenderer {
    dpi: u32,
    slide_dir: Option<PathBuf>,
}

impl PdftoppmRenderer {
    pub fn new() -> Self {
        Self {
            dpi: defaults::RENDER_DPI,
            slide_dir: None,
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_slide_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.slide_dir = Some(dir.into());
        self
    }

    /// Check that pdftoppm is available on this host.
    pub async fn health_check(&self) -> bool {
        matches!(
            Command::new("pdftoppm").arg("-v").output().await,
            Ok(out) if out.status.success()
        )
    }

    fn validate_pdf(file_path: &str, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidInput(format!("Empty PDF file: {}", file_path)));
        }
        if data.len() < 4 || &data[0..4] != b"%PDF" {
            return Err(Error::InvalidInput(format!(
                "File '{}' is not a valid PDF (missing %PDF header)",
                file_path
            )));
        }
        Ok(())
    }
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render_pages(&self, file_path: &str) -> Result<Vec<RenderedPage>> {
        let data = fs::read(file_path)
            .map_err(|e| Error::InvalidInput(format!("Cannot read {}: {}", file_path, e)))?;
        Self::validate_pdf(file_path, &data)?;

        // Render either into the persistent slide dir or a temp dir.
        let stem = std::path::Path::new(file_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let tmp_dir;
        let (out_dir, persistent) = match &self.slide_dir {
            Some(dir) => {
                let out = dir.join(&stem);
                fs::create_dir_all(&out).map_err(|e| {
                    Error::Render(format!("Failed to create slide dir: {}", e))
                })?;
                (out, true)
            }
            None => {
                tmp_dir = tempfile::TempDir::new()
                    .map_err(|e| Error::Render(format!("Failed to create temp dir: {}", e)))?;
                (tmp_dir.path().to_path_buf(), false)
            }
        };
        let img_prefix = out_dir.join("page").to_string_lossy().to_string();

        debug!(
            subsystem = "worker",
            component = "render",
            file_path,
            dpi = self.dpi,
            "Rendering document pages"
        );

        run_cmd_status(
            Command::new("pdftoppm")
                .arg("-png")
                .arg("-r")
                .arg(self.dpi.to_string())
                .arg(file_path)
                .arg(&img_prefix),
            defaults::RENDER_CMD_TIMEOUT_SECS,
        )
        .await?;

        // Collect rendered images sorted by name for page order.
        let mut image_paths: Vec<PathBuf> = Vec::new();
        let entries = fs::read_dir(&out_dir)
            .map_err(|e| Error::Render(format!("Failed to read render dir: {}", e)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Render(format!("Failed to read dir entry: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("png") {
                image_paths.push(path);
            }
        }
        image_paths.sort();

        let mut pages = Vec::with_capacity(image_paths.len());
        for (i, path) in image_paths.iter().enumerate() {
            let data = fs::read(path)
                .map_err(|e| Error::Render(format!("Failed to read rendered page: {}", e)))?;
            pages.push(RenderedPage {
                page_number: (i + 1) as i32,
                data,
                image_path: persistent.then(|| path.to_string_lossy().into_owned()),
            });
        }

        debug!(
            subsystem = "worker",
            component = "render",
            file_path,
            page_count = pages.len(),
            "Rendering complete"
        );
        Ok(pages)
    }
}
