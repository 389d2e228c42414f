//! Raw image examples.

use serde::{Deserialize, Serialize};

use crate::MAX_ID_LEN;
use crate::error::{MlTypesError, Result};
use crate::label::Label;

/// Canonical image dimensions.
///
/// Pixels are stored interleaved (HWC), one byte per channel.
///
/// # Example
///
/// ```
/// use ml_types::ImageShape;
///
/// let shape = ImageShape::new(64, 48, 3);
/// assert_eq!(shape.pixel_len(), 64 * 48 * 3);
/// assert!(shape.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Channels per pixel (1 = gray, 3 = RGB, 4 = RGBA).
    pub channels: u8,
}

impl ImageShape {
    /// Creates a new image shape.
    #[must_use]
    pub const fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Returns `true` if every dimension is positive and the pixel count
    /// fits in `usize`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.channels > 0
            && self.checked_pixel_len().is_some()
    }

    /// Returns the number of bytes a pixel buffer of this shape holds, or
    /// `None` if that count overflows `usize`.
    #[must_use]
    pub const fn checked_pixel_len(&self) -> Option<usize> {
        match (self.width as usize).checked_mul(self.height as usize) {
            Some(area) => area.checked_mul(self.channels as usize),
            None => None,
        }
    }

    /// Returns the number of bytes a pixel buffer of this shape holds.
    ///
    /// Saturates at `usize::MAX` for shapes that fail [`is_valid`](Self::is_valid).
    #[must_use]
    pub const fn pixel_len(&self) -> usize {
        match self.checked_pixel_len() {
            Some(len) => len,
            None => usize::MAX,
        }
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// One raw image of the corpus.
///
/// Created once at ingestion and immutable afterwards; fields are only
/// reachable through accessors so the shape/pixel invariant always holds.
///
/// # Example
///
/// ```
/// use ml_types::{Example, ImageShape, Label};
///
/// let example = Example::new("dog.7", ImageShape::new(1, 2, 1), vec![10, 20], Label::Class(1))
///     .unwrap();
/// assert_eq!(example.id(), "dog.7");
/// assert_eq!(example.pixels(), &[10, 20]);
///
/// // Pixel count must match the shape
/// assert!(Example::new("bad", ImageShape::new(2, 2, 1), vec![0], Label::Class(0)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    id: String,
    shape: ImageShape,
    pixels: Vec<u8>,
    label: Label,
}

impl Example {
    /// Creates a validated example.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The identifier is empty or longer than [`MAX_ID_LEN`] bytes
    /// - The shape has a zero dimension or its pixel count overflows
    /// - The pixel buffer length differs from the shape
    /// - The label collides with the unlabeled sentinel
    pub fn new(
        id: impl Into<String>,
        shape: ImageShape,
        pixels: Vec<u8>,
        label: Label,
    ) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;

        if !shape.is_valid() {
            return Err(MlTypesError::invalid_dimensions(
                shape.width,
                shape.height,
                shape.channels,
            ));
        }

        if pixels.len() != shape.pixel_len() {
            return Err(MlTypesError::size_mismatch(shape.pixel_len(), pixels.len()));
        }

        if !label.is_valid() {
            return Err(MlTypesError::InvalidLabel(label.to_wire()));
        }

        Ok(Self {
            id,
            shape,
            pixels,
            label,
        })
    }

    /// Returns the stable identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the image shape.
    #[must_use]
    pub const fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Returns the interleaved pixel bytes.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the label.
    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Consumes the example, returning its pixel buffer.
    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Checks that an identifier is non-empty and fits the framing limit.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(MlTypesError::invalid_identifier(id, "identifier is empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(MlTypesError::invalid_identifier(
            id,
            format!("identifier exceeds {MAX_ID_LEN} bytes"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> ImageShape {
        ImageShape::new(4, 3, 3)
    }

    #[test]
    fn shape_pixel_len() {
        assert_eq!(shape().pixel_len(), 36);
        assert_eq!(ImageShape::new(4, 3, 1).pixel_len(), 12);
    }

    #[test]
    fn shape_invalid() {
        assert!(!ImageShape::new(0, 3, 3).is_valid());
        assert!(!ImageShape::new(4, 0, 3).is_valid());
        assert!(!ImageShape::new(4, 3, 0).is_valid());
    }

    #[test]
    fn shape_overflowing_pixel_count_is_invalid() {
        let huge = ImageShape::new(u32::MAX, u32::MAX, u8::MAX);
        assert_eq!(huge.checked_pixel_len(), None);
        assert_eq!(huge.pixel_len(), usize::MAX);
        assert!(!huge.is_valid());

        let err = Example::new("huge", huge, vec![0], Label::Class(0)).unwrap_err();
        assert!(matches!(err, MlTypesError::InvalidDimensions { .. }));
    }

    #[test]
    fn shape_display() {
        assert_eq!(shape().to_string(), "4x3x3");
    }

    #[test]
    fn example_new_valid() {
        let ex = Example::new("a", shape(), vec![1; 36], Label::Class(0)).unwrap();
        assert_eq!(ex.id(), "a");
        assert_eq!(ex.shape(), shape());
        assert_eq!(ex.label(), Label::Class(0));
        assert_eq!(ex.into_pixels().len(), 36);
    }

    #[test]
    fn example_rejects_empty_id() {
        let err = Example::new("", shape(), vec![1; 36], Label::Class(0)).unwrap_err();
        assert!(matches!(err, MlTypesError::InvalidIdentifier { .. }));
    }

    #[test]
    fn example_rejects_long_id() {
        let id = "i".repeat(MAX_ID_LEN + 1);
        assert!(Example::new(id, shape(), vec![1; 36], Label::Class(0)).is_err());
    }

    #[test]
    fn example_rejects_size_mismatch() {
        let err = Example::new("a", shape(), vec![1; 35], Label::Class(0)).unwrap_err();
        assert_eq!(err, MlTypesError::size_mismatch(36, 35));
    }

    #[test]
    fn example_rejects_zero_shape() {
        let err = Example::new("a", ImageShape::new(0, 0, 3), vec![], Label::Class(0)).unwrap_err();
        assert!(matches!(err, MlTypesError::InvalidDimensions { .. }));
    }

    #[test]
    fn example_rejects_sentinel_class() {
        let err = Example::new("a", shape(), vec![1; 36], Label::Class(u32::MAX)).unwrap_err();
        assert_eq!(err, MlTypesError::InvalidLabel(u32::MAX));
    }

    #[test]
    fn example_serialization() {
        let ex = Example::new("a", shape(), vec![7; 36], Label::Unlabeled).unwrap();
        let json = serde_json::to_string(&ex).unwrap();
        let parsed: Example = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ex);
    }
}
