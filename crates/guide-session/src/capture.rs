use async_trait::async_trait;
use chrono::Utc;
use guide_core::{CaptureAdapter, CaptureMetadata, CaptureResult, GuideError, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Serves pre-rendered screen images from a directory, one file per
/// context (`whatsapp.png`, `settings.jpg`, ...).
pub struct FileCaptureAdapter {
    screens_dir: PathBuf,
}

impl FileCaptureAdapter {
    pub fn new(screens_dir: impl Into<PathBuf>) -> Self {
        Self {
            screens_dir: screens_dir.into(),
        }
    }

    /// Image file for `context_label`, with the label sanitised so it can
    /// never leave `screens_dir`
    fn locate(&self, context_label: &str) -> Option<PathBuf> {
        let stem = context_label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect::<String>();

        EXTENSIONS
            .iter()
            .map(|ext| self.screens_dir.join(format!("{}.{}", stem, ext)))
            .find(|path| path.is_file())
    }
}

fn dimensions(bytes: &[u8], path: &Path) -> Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| GuideError::CaptureUnavailable(format!("{:?}: {}", path, e)))?
        .into_dimensions()
        .map_err(|e| GuideError::CaptureUnavailable(format!("{:?}: {}", path, e)))
}

#[async_trait]
impl CaptureAdapter for FileCaptureAdapter {
    async fn capture(&self, target_id: &str, context_label: &str) -> Result<Option<CaptureResult>> {
        let Some(path) = self.locate(context_label) else {
            debug!("No screen image for {} in {:?}", context_label, self.screens_dir);
            return Ok(None);
        };

        let image_bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| GuideError::CaptureUnavailable(format!("{:?}: {}", path, e)))?;
        let (width, height) = dimensions(&image_bytes, &path)?;

        debug!("Captured {} ({}x{}) from {:?}", context_label, width, height, path);
        Ok(Some(CaptureResult {
            image_bytes,
            metadata: CaptureMetadata {
                source_id: target_id.to_string(),
                timestamp: Utc::now(),
                width,
                height,
            },
        }))
    }
}
