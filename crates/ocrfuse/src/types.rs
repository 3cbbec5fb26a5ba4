use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PageError;

/// Identifies one page of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub document_id: String,
    pub page_index: usize,
}

impl PageId {
    pub fn new(document_id: impl Into<String>, page_index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            page_index,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.page_index)
    }
}

/// Pixel layout of an incoming bitmap buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A decoded page bitmap as it arrives from acquisition.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub id: PageId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawPage {
    pub fn new(id: PageId, width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            id,
            width,
            height,
            format,
            data,
        }
    }

    /// Wrap an already decoded grayscale image.
    pub fn from_gray(id: PageId, image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            id,
            width,
            height,
            format: PixelFormat::Gray8,
            data: image.into_raw(),
        }
    }

    /// Size in bytes of the buffer this page claims to hold.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.channels())
    }

    /// Validate the buffer and convert it to 8-bit luma (ITU-R 601 weights).
    pub fn to_gray(&self) -> std::result::Result<GrayImage, PageError> {
        if self.width == 0 || self.height == 0 {
            return Err(PageError::InvalidImage(format!(
                "zero area bitmap ({}x{})",
                self.width, self.height
            )));
        }
        let expected = self
            .expected_len()
            .ok_or_else(|| PageError::InvalidImage("bitmap dimensions overflow".to_string()))?;
        if self.data.len() != expected {
            return Err(PageError::InvalidImage(format!(
                "pixel buffer holds {} bytes, {}x{} {:?} needs {}",
                self.data.len(),
                self.width,
                self.height,
                self.format,
                expected
            )));
        }

        let gray = match self.format {
            PixelFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.clone()),
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                let channels = self.format.channels();
                let mut out = GrayImage::new(self.width, self.height);
                for (dst, px) in out.pixels_mut().zip(self.data.chunks_exact(channels)) {
                    let luma = (299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32 + 500) / 1000;
                    *dst = Luma([luma.min(255) as u8]);
                }
                Some(out)
            }
        };
        gray.ok_or_else(|| PageError::InvalidImage("pixel buffer rejected by decoder".to_string()))
    }
}

/// Axis-aligned box in page pixel coordinates. `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: right.max(left),
            bottom: bottom.max(top),
        }
    }

    /// Build from the left/top/width/height quadruple OCR engines report.
    pub fn from_ltwh(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self::new(left, top, left.saturating_add(width), top.saturating_add(height))
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn center_y(&self) -> f64 {
        (self.top as f64 + self.bottom as f64) / 2.0
    }

    pub fn vertical_overlap(&self, other: &BBox) -> u32 {
        self.bottom.min(other.bottom).saturating_sub(self.top.max(other.top))
    }

    pub fn horizontal_overlap(&self, other: &BBox) -> u32 {
        self.right.min(other.right).saturating_sub(self.left.max(other.left))
    }

    /// Vertical overlap as a fraction of the smaller box height.
    pub fn vertical_overlap_ratio(&self, other: &BBox) -> f64 {
        let min_height = self.height().min(other.height());
        if min_height == 0 {
            return 0.0;
        }
        self.vertical_overlap(other) as f64 / min_height as f64
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}
