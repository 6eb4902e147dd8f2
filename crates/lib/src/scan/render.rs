//! First-page rasterization of a ticket document.

use super::ScanError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

/// Region of the first page where the barcode is looked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropPreset {
    SouthEast,
    NorthEast,
}

impl CropPreset {
    /// Order in which presets are tried.
    pub const ORDER: [CropPreset; 2] = [CropPreset::SouthEast, CropPreset::NorthEast];

    pub fn gravity(self) -> &'static str {
        match self {
            CropPreset::SouthEast => "SouthEast",
            CropPreset::NorthEast => "NorthEast",
        }
    }

    /// Lowercase tag used in rendered file names.
    pub fn slug(self) -> &'static str {
        match self {
            CropPreset::SouthEast => "se",
            CropPreset::NorthEast => "ne",
        }
    }
}

/// Renders page one of `document` into the PNG at `output`, cropped per `preset`.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(
        &self,
        document: &Path,
        preset: CropPreset,
        output: &Path,
    ) -> Result<(), ScanError>;
}

/// ImageMagick `convert`, run without a shell.
#[derive(Debug, Clone)]
pub struct ImageMagickRenderer {
    bin: String,
    timeout: Duration,
}

impl ImageMagickRenderer {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    fn args(document: &Path, preset: CropPreset, output: &Path) -> Vec<OsString> {
        let mut first_page = document.as_os_str().to_os_string();
        first_page.push("[0]");
        let mut args: Vec<OsString> = vec!["-density".into(), "150".into(), first_page];
        args.extend(
            [
                "-quality",
                "85",
                "-gravity",
                preset.gravity(),
                "-crop",
                "50%x50%+0+0",
                "+repage",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl PageRenderer for ImageMagickRenderer {
    async fn render(
        &self,
        document: &Path,
        preset: CropPreset,
        output: &Path,
    ) -> Result<(), ScanError> {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.args(Self::args(document, preset, output))
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                ScanError::Render(format!("{} timed out after {:?}", self.bin, self.timeout))
            })?
            .map_err(|e| ScanError::Render(format!("exec {} failed: {}", self.bin, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::Render(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn southeast_is_tried_first() {
        assert_eq!(
            CropPreset::ORDER,
            [CropPreset::SouthEast, CropPreset::NorthEast]
        );
    }

    #[test]
    fn convert_arguments() {
        let args = ImageMagickRenderer::args(
            Path::new("/tmp/abc.pdf"),
            CropPreset::NorthEast,
            Path::new("/tmp/abc-ne.png"),
        );
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-density",
                "150",
                "/tmp/abc.pdf[0]",
                "-quality",
                "85",
                "-gravity",
                "NorthEast",
                "-crop",
                "50%x50%+0+0",
                "+repage",
                "/tmp/abc-ne.png",
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_render_error() {
        let renderer = ImageMagickRenderer::new(
            "farebot-no-such-convert-binary",
            Duration::from_secs(5),
        );
        let err = renderer
            .render(
                Path::new("/tmp/none.pdf"),
                CropPreset::SouthEast,
                Path::new("/tmp/none.png"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Render(_)));
    }
}
