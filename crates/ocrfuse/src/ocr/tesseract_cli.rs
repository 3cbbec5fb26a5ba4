//! Recognizer backed by the `tesseract` executable.
//!
//! Each call encodes the bitmap as PNG, pipes it to `tesseract stdin stdout ... tsv`
//! and parses the TSV written to stdout. The child is killed when the call is dropped,
//! so pass timeouts and cancellation do not leave processes behind.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{OcrFuseError, Result};
use crate::ocr::error::RecognitionError;
use crate::ocr::recognizer::Recognizer;
use crate::ocr::tsv::parse_tsv;
use crate::ocr::types::{EngineParams, OcrResult};

#[derive(Debug, Clone)]
pub struct TesseractCli {
    executable: PathBuf,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Command-line arguments for one pass, excluding the executable.
    pub fn arguments(params: &EngineParams) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            params.language.clone(),
            "--psm".to_string(),
            params.psm.to_string(),
            "--oem".to_string(),
            params.oem.to_string(),
        ];
        if let Some(dpi) = params.dpi {
            args.push("--dpi".to_string());
            args.push(dpi.to_string());
        }
        for (name, value) in &params.variables {
            args.push("-c".to_string());
            args.push(format!("{}={}", name, value));
        }
        args.push("tsv".to_string());
        args
    }

    /// Run `tesseract --version` and return the first line it prints.
    pub async fn check_available(&self) -> Result<String> {
        let output = Command::new(&self.executable)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                OcrFuseError::MissingDependency(format!("{} could not be started: {}", self.executable.display(), e))
            })?;

        if !output.status.success() {
            return Err(OcrFuseError::MissingDependency(format!(
                "{} --version exited with {}",
                self.executable.display(),
                output.status
            )));
        }

        // Older releases print the version banner on stderr
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner).lines().next().unwrap_or_default().trim().to_string())
    }
}

fn encode_png(image: &GrayImage) -> std::result::Result<Vec<u8>, RecognitionError> {
    let mut png = Vec::with_capacity(image.as_raw().len() / 4);
    PngEncoder::new(&mut png)
        .write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::L8)
        .map_err(|e| RecognitionError::EngineFailed(format!("failed to encode page as PNG: {}", e)))?;
    Ok(png)
}

#[async_trait]
impl Recognizer for TesseractCli {
    fn name(&self) -> &str {
        "tesseract-cli"
    }

    async fn recognize(&self, image: &GrayImage, params: &EngineParams) -> std::result::Result<OcrResult, RecognitionError> {
        let png = encode_png(image)?;

        let mut child = Command::new(&self.executable)
            .args(Self::arguments(params))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => RecognitionError::Unavailable(
                    format!("failed to execute {}: {}", self.executable.display(), e),
                ),
                _ => RecognitionError::EngineFailed(format!("failed to start tesseract: {}", e)),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognitionError::EngineFailed("tesseract stdin was not captured".to_string()))?;
        let feed = async move {
            let written = stdin.write_all(&png).await;
            drop(stdin);
            written
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| RecognitionError::EngineFailed(format!("failed to wait for tesseract: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::EngineFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        // A broken pipe after a successful exit only means tesseract stopped reading early
        if let Err(e) = fed
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(RecognitionError::EngineFailed(format!("failed to send page to tesseract: {}", e)));
        }

        let tsv = String::from_utf8(output.stdout)
            .map_err(|e| RecognitionError::UnreadableResult(format!("tesseract output is not UTF-8: {}", e)))?;
        parse_tsv(&tsv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_arguments_order() {
        let mut variables = BTreeMap::new();
        variables.insert("preserve_interword_spaces".to_string(), "1".to_string());
        let params = EngineParams {
            language: "eng+deu".to_string(),
            psm: 6,
            oem: 1,
            dpi: Some(300),
            variables,
        };
        assert_eq!(
            TesseractCli::arguments(&params),
            vec![
                "stdin",
                "stdout",
                "-l",
                "eng+deu",
                "--psm",
                "6",
                "--oem",
                "1",
                "--dpi",
                "300",
                "-c",
                "preserve_interword_spaces=1",
                "tsv"
            ]
        );
    }

    #[test]
    fn test_arguments_without_dpi() {
        let args = TesseractCli::arguments(&EngineParams::default());
        assert!(!args.iter().any(|a| a == "--dpi"));
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
    }

    #[test]
    fn test_encode_png_signature() {
        let png = encode_png(&GrayImage::from_pixel(8, 4, image::Luma([200]))).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_missing_executable_is_unavailable() {
        let cli = TesseractCli::new("/nonexistent/ocrfuse-test-tesseract");
        let image = GrayImage::from_pixel(8, 8, image::Luma([255]));
        let err = cli.recognize(&image, &EngineParams::default()).await.unwrap_err();
        assert!(matches!(err, RecognitionError::Unavailable(_)));
        assert!(cli.check_available().await.is_err());
    }
}
