use async_trait::async_trait;
use image::GrayImage;

use crate::ocr::error::RecognitionError;
use crate::ocr::types::{EngineParams, OcrResult};

/// An OCR engine that turns one preprocessed bitmap into words and lines.
///
/// Implementations are shared between concurrent passes and must not keep state
/// that depends on the order passes arrive in. A call may be dropped midway when
/// its pass times out or the page is cancelled, and its pass slot is released at that
/// point, so dropping the future must also stop the engine work behind it.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    async fn recognize(&self, image: &GrayImage, params: &EngineParams) -> Result<OcrResult, RecognitionError>;
}
