//! Image preprocessing: encoded bytes in, `(1, H, W, 3)` f32 tensor out
//!
//! Everything here is a pure function and safe to call from any number of
//! threads at once.

use crate::error::{AgrivError, AgrivResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::{s, Array4};
use serde::{Deserialize, Serialize};

/// Default spatial size of the shipped classifiers
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

/// Default upload limit (10 MiB)
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Decode, convert to RGB, resize to `(height, width)` and lay out as a
/// channels-last batch of one.
///
/// With `normalize` every value is scaled from [0, 255] to [0, 1].
pub fn preprocess(bytes: &[u8], target_size: (u32, u32), normalize: bool) -> AgrivResult<Array4<f32>> {
    let decoded = image::load_from_memory(bytes)?;
    Ok(image_to_tensor(decoded, target_size, normalize))
}

/// [`preprocess`] for an image that is already decoded
pub fn image_to_tensor(image: DynamicImage, target_size: (u32, u32), normalize: bool) -> Array4<f32> {
    let rgb = into_rgb(image);

    let (height, width) = target_size;
    let resized = imageops::resize(&rgb, width, height, FilterType::Lanczos3);

    let scale = if normalize { 1.0 / 255.0 } else { 1.0 };
    let tensor = Array4::from_shape_fn(
        (1, height as usize, width as usize, 3),
        |(_, y, x, c)| f32::from(resized.get_pixel(x as u32, y as u32)[c]) * scale,
    );

    log::debug!("Preprocessed image shape: {:?}", tensor.shape());
    tensor
}

fn into_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Check an upload before preprocessing it.
///
/// Rejects payloads above `max_size` bytes, formats whose extension is not
/// in `allowed_formats` (case-insensitive, e.g. `["jpg", "png"]`), and data
/// that does not fully decode.
pub fn validate<S: AsRef<str>>(bytes: &[u8], max_size: usize, allowed_formats: &[S]) -> AgrivResult<()> {
    decode_validated(bytes, max_size, allowed_formats).map(|_| ())
}

/// [`validate`] an upload and keep the decoded image for [`image_to_tensor`]
pub fn decode_validated<S: AsRef<str>>(
    bytes: &[u8],
    max_size: usize,
    allowed_formats: &[S],
) -> AgrivResult<DynamicImage> {
    if bytes.len() > max_size {
        return Err(AgrivError::validation(format!(
            "Image too large. Maximum size is {:.1}MB",
            max_size as f64 / 1024.0 / 1024.0
        )));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| AgrivError::validation(format!("Unrecognized image data: {e}")))?;

    let allowed = format.extensions_str().iter().any(|ext| {
        allowed_formats
            .iter()
            .any(|fmt| fmt.as_ref().trim().eq_ignore_ascii_case(ext))
    });
    if !allowed {
        let names: Vec<&str> = allowed_formats.iter().map(AsRef::as_ref).collect();
        return Err(AgrivError::validation(format!(
            "Unsupported image format: {format:?}. Allowed: {names:?}"
        )));
    }

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| AgrivError::validation(format!("Corrupted image: {e}")))
}

/// Test-time augmentation applied to a preprocessed tensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Augmentation {
    #[default]
    None,
    /// Mirror left to right
    Flip,
    /// Rotate 90 degrees counter-clockwise (height and width swap)
    Rotate,
    /// Scale by 1.2 and clamp to [0, 1]
    Brighten,
}

impl Augmentation {
    /// Whether the augmented tensor still fits a `(height, width)` model input.
    /// Only `Rotate` changes the shape, and only for non-square inputs.
    pub fn preserves_size(self, (height, width): (u32, u32)) -> bool {
        self != Self::Rotate || height == width
    }
}

impl std::str::FromStr for Augmentation {
    type Err = AgrivError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "flip" => Ok(Self::Flip),
            "rotate" => Ok(Self::Rotate),
            "brighten" => Ok(Self::Brighten),
            other => Err(AgrivError::config(format!("Unknown augmentation: {other}"))),
        }
    }
}

/// Apply `augmentation` to a `(1, H, W, C)` tensor
pub fn augment(tensor: Array4<f32>, augmentation: Augmentation) -> Array4<f32> {
    match augmentation {
        Augmentation::None => tensor,
        Augmentation::Flip => tensor.slice(s![.., .., ..;-1, ..]).to_owned(),
        Augmentation::Rotate => {
            let transposed = tensor.permuted_axes([0, 2, 1, 3]);
            transposed.slice(s![.., ..;-1, .., ..]).to_owned()
        }
        Augmentation::Brighten => tensor.mapv(|v| (v * 1.2).clamp(0.0, 1.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb};
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn gray_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
    }

    #[test]
    fn test_uniform_gray_normalizes_to_128_over_255() {
        let bytes = gray_png(224, 224);
        let tensor = preprocess(&bytes, (224, 224), true).unwrap();

        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        let expected = 128.0 / 255.0;
        assert!(tensor.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_output_shape_ignores_source_dimensions() {
        let bytes = gray_png(640, 97);
        let tensor = preprocess(&bytes, (32, 48), true).unwrap();
        assert_eq!(tensor.shape(), &[1, 32, 48, 3]);
    }

    #[test]
    fn test_grayscale_is_upconverted_to_rgb() {
        let img = GrayImage::from_pixel(50, 80, Luma([200]));
        let bytes = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let tensor = preprocess(&bytes, (224, 224), false).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!(tensor.iter().all(|&v| (v - 200.0).abs() < 1e-3));
    }

    #[test]
    fn test_preprocessing_is_deterministic() {
        let mut img = RgbImage::new(31, 17);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x * 8) as u8, (y * 15) as u8, ((x + y) * 5) as u8]);
        }
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        let a = preprocess(&bytes, (64, 64), true).unwrap();
        let b = preprocess(&bytes, (64, 64), true).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_undecodable_bytes_fail() {
        let err = preprocess(b"definitely not an image", (224, 224), true).unwrap_err();
        assert!(matches!(err, AgrivError::Preprocessing(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_validate_accepts_allowed_format() {
        let bytes = gray_png(8, 8);
        assert!(validate(&bytes, DEFAULT_MAX_IMAGE_SIZE, &["jpg", "jpeg", "png"]).is_ok());
        assert!(validate(&bytes, DEFAULT_MAX_IMAGE_SIZE, &["PNG"]).is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let bytes = gray_png(8, 8);
        let err = validate(&bytes, 10, &["png"]).unwrap_err();
        assert!(matches!(err, AgrivError::Validation(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_validate_rejects_disallowed_format() {
        let img = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        let jpeg = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);
        let err = validate(&jpeg, DEFAULT_MAX_IMAGE_SIZE, &["png"]).unwrap_err();
        assert!(err.to_string().contains("Unsupported image format"));
    }

    #[test]
    fn test_validate_rejects_truncated_image() {
        let bytes = gray_png(64, 64);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            validate(truncated, DEFAULT_MAX_IMAGE_SIZE, &["png"]),
            Err(AgrivError::Validation(_))
        ));
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let mut t = Array4::<f32>::zeros((1, 2, 3, 3));
        t[[0, 0, 0, 1]] = 0.5;

        let flipped = augment(t, Augmentation::Flip);
        assert_eq!(flipped.shape(), &[1, 2, 3, 3]);
        assert_eq!(flipped[[0, 0, 2, 1]], 0.5);
        assert_eq!(flipped[[0, 0, 0, 1]], 0.0);
    }

    #[test]
    fn test_rotate_is_counter_clockwise() {
        // 2x3 image, mark the top-right pixel
        let mut t = Array4::<f32>::zeros((1, 2, 3, 3));
        t[[0, 0, 2, 0]] = 1.0;

        let rotated = augment(t, Augmentation::Rotate);
        assert_eq!(rotated.shape(), &[1, 3, 2, 3]);
        // top-right moves to top-left
        assert_eq!(rotated[[0, 0, 0, 0]], 1.0);
    }

    #[test]
    fn test_brighten_clamps() {
        let t = Array4::<f32>::from_elem((1, 1, 2, 3), 0.9);
        let bright = augment(t, Augmentation::Brighten);
        assert!(bright.iter().all(|&v| v == 1.0));

        let dim = augment(Array4::from_elem((1, 1, 1, 3), 0.5), Augmentation::Brighten);
        assert!(dim.iter().all(|&v| (v - 0.6).abs() < 1e-6));
    }

    #[test]
    fn test_decode_validated_matches_preprocess() {
        let mut img = RgbImage::new(40, 30);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x * 6) as u8, (y * 8) as u8, 90]);
        }
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let decoded = decode_validated(&bytes, DEFAULT_MAX_IMAGE_SIZE, &["png"]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));

        let direct = preprocess(&bytes, (16, 24), true).unwrap();
        assert_eq!(image_to_tensor(decoded, (16, 24), true), direct);
    }

    #[test]
    fn test_decode_validated_rejects_like_validate() {
        let bytes = gray_png(8, 8);
        assert!(matches!(
            decode_validated(&bytes, 10, &["png"]),
            Err(AgrivError::Validation(_))
        ));
        assert!(decode_validated(&bytes[..bytes.len() / 2], DEFAULT_MAX_IMAGE_SIZE, &["png"]).is_err());
    }

    #[test]
    fn test_rotate_only_preserves_square_sizes() {
        assert!(Augmentation::Rotate.preserves_size((224, 224)));
        assert!(!Augmentation::Rotate.preserves_size((224, 160)));
        assert!(Augmentation::Flip.preserves_size((224, 160)));
        assert!(Augmentation::None.preserves_size((224, 160)));

        let rotated = augment(Array4::zeros((1, 224, 160, 3)), Augmentation::Rotate);
        assert_eq!(rotated.shape(), &[1, 160, 224, 3]);
    }

    #[test]
    fn test_parse_augmentation() {
        assert_eq!("Flip".parse::<Augmentation>().unwrap(), Augmentation::Flip);
        assert_eq!("".parse::<Augmentation>().unwrap(), Augmentation::None);
        assert!("blur".parse::<Augmentation>().is_err());
    }
}
