//! Keypoint overlay for annotated video frames
//!
//! Pose tensors are `(K, 3)` float arrays of `(x, y, confidence)` in pixel
//! coordinates. Every keypoint above the confidence threshold becomes a filled
//! elliptical marker whose bounding box is clamped to the image.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{DType, NdArray};
use crate::{Result, StreamError};

/// Marker size and visibility threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    /// Half-width of the marker box, in pixels
    pub radius: f64,
    /// Keypoints at or below this confidence are not drawn
    pub confidence_threshold: f64,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self { radius: 3.0, confidence_threshold: 0.5 }
    }
}

/// Bounding box of one keypoint marker, clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    pub keypoint: usize,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Markers for every confident keypoint of `pose`.
///
/// `image_size` is `(width, height)`. Keypoints with non-finite coordinates
/// are skipped individually.
pub fn keypoint_markers(
    pose: &NdArray,
    image_size: (usize, usize),
    style: &MarkerStyle,
) -> Result<Vec<Marker>> {
    let values: Vec<f64> = match pose.dtype() {
        DType::Float32 => pose.to_vec::<f32>()?.into_iter().map(f64::from).collect(),
        DType::Float64 => pose.to_vec::<f64>()?,
        other => {
            return Err(StreamError::TypeMismatch {
                details: format!("pose tensor must be float32 or float64, got {other}"),
            });
        }
    };

    let columns = match pose.shape() {
        [_, columns] if *columns >= 3 => *columns,
        shape => {
            return Err(StreamError::TypeMismatch {
                details: format!("pose tensor must have shape (K, 3), got {shape:?}"),
            });
        }
    };

    let (width, height) = (image_size.0 as f64, image_size.1 as f64);
    let mut markers = Vec::new();

    for (keypoint, row) in values.chunks_exact(columns).enumerate() {
        let (x, y, confidence) = (row[0], row[1], row[2]);
        if confidence.is_nan() || confidence <= style.confidence_threshold {
            continue;
        }
        if !x.is_finite() || !y.is_finite() {
            debug!(keypoint, x, y, "Skipping keypoint with non-finite coordinates");
            continue;
        }

        let marker = Marker {
            keypoint,
            x0: (x - style.radius).max(0.0),
            y0: (y - style.radius).max(0.0),
            x1: (x + style.radius).min(width),
            y1: (y + style.radius).min(height),
        };
        if marker.x0 < marker.x1 && marker.y0 < marker.y1 {
            markers.push(marker);
        }
    }

    Ok(markers)
}

/// `k` evenly spaced, fully saturated RGB colours.
pub fn marker_palette(k: usize) -> Vec<[u8; 3]> {
    (0..k).map(|i| hue_to_rgb(i as f64 / k as f64)).collect()
}

fn hue_to_rgb(hue: f64) -> [u8; 3] {
    let h = (hue.rem_euclid(1.0)) * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let scale = |c: f64| (c * 255.0).round() as u8;
    [scale(r), scale(g), scale(b)]
}

/// Fill each marker's ellipse into a copy of an `(H, W, 3)` `uint8` frame.
///
/// Marker `i` is painted with `palette[keypoint % palette.len()]`.
pub fn draw_markers(frame: &NdArray, markers: &[Marker], palette: &[[u8; 3]]) -> Result<NdArray> {
    let (height, width) = rgb_dimensions(frame)?;
    if palette.is_empty() && !markers.is_empty() {
        return Err(StreamError::render("marker palette is empty"));
    }

    let mut pixels = frame.data().to_vec();
    for marker in markers {
        let colour = palette[marker.keypoint % palette.len()];
        let (cx, cy) = ((marker.x0 + marker.x1) / 2.0, (marker.y0 + marker.y1) / 2.0);
        let (rx, ry) = ((marker.x1 - marker.x0) / 2.0, (marker.y1 - marker.y0) / 2.0);

        let rows = (marker.y0.floor() as usize)..(marker.y1.ceil() as usize).min(height);
        let cols = (marker.x0.floor() as usize)..(marker.x1.ceil() as usize).min(width);
        for py in rows {
            let dy = (py as f64 + 0.5 - cy) / ry;
            for px in cols.clone() {
                let dx = (px as f64 + 0.5 - cx) / rx;
                if dx * dx + dy * dy <= 1.0 {
                    let offset = (py * width + px) * 3;
                    pixels[offset..offset + 3].copy_from_slice(&colour);
                }
            }
        }
    }

    NdArray::new(DType::UInt8, frame.shape().to_vec(), pixels)
}

/// Swap the first and last channel of an `(H, W, 3)` `uint8` frame.
///
/// Capture devices commonly deliver BGR; encoders and viewers expect RGB.
pub fn bgr_to_rgb(frame: &NdArray) -> Result<NdArray> {
    rgb_dimensions(frame)?;
    let mut pixels = frame.data().to_vec();
    for pixel in pixels.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    NdArray::new(DType::UInt8, frame.shape().to_vec(), pixels)
}

fn rgb_dimensions(frame: &NdArray) -> Result<(usize, usize)> {
    match (frame.dtype(), frame.shape()) {
        (DType::UInt8, &[height, width, 3]) => Ok((height, width)),
        (dtype, shape) => Err(StreamError::TypeMismatch {
            details: format!("expected an (H, W, 3) uint8 frame, got {dtype} {shape:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{pose_tensor, sample_frame};

    #[test]
    fn markers_are_clamped_to_the_image() {
        // Wide image: x is clamped to the width, y to the height.
        let pose = NdArray::from_elements(vec![2, 3], &[1.0f32, 1.0, 0.9, 99.0, 19.0, 0.9]).unwrap();
        let markers = keypoint_markers(&pose, (100, 20), &MarkerStyle::default()).unwrap();

        assert_eq!(markers[0], Marker { keypoint: 0, x0: 0.0, y0: 0.0, x1: 4.0, y1: 4.0 });
        assert_eq!(markers[1], Marker { keypoint: 1, x0: 96.0, y0: 16.0, x1: 100.0, y1: 20.0 });
    }

    #[test]
    fn low_confidence_and_non_finite_keypoints_are_skipped() {
        let pose = NdArray::from_elements(
            vec![3, 3],
            &[10.0f64, 10.0, 0.2, f64::NAN, 10.0, 0.99, 10.0, 10.0, 0.51],
        )
        .unwrap();

        let markers = keypoint_markers(&pose, (64, 64), &MarkerStyle::default()).unwrap();

        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].keypoint, 2);
    }

    #[test]
    fn non_pose_arrays_are_rejected() {
        let wrong_dtype = NdArray::from_elements(vec![1, 3], &[1u8, 2, 3]).unwrap();
        let wrong_shape = NdArray::from_elements(vec![3], &[1.0f32, 2.0, 3.0]).unwrap();

        assert!(keypoint_markers(&wrong_dtype, (8, 8), &MarkerStyle::default()).is_err());
        assert!(keypoint_markers(&wrong_shape, (8, 8), &MarkerStyle::default()).is_err());
    }

    #[test]
    fn palette_colours_are_distinct() {
        let palette = marker_palette(6);
        assert_eq!(palette[0], [255, 0, 0]);
        assert_eq!(palette[2], [0, 255, 0]);
        assert_eq!(palette[4], [0, 0, 255]);
        for (i, a) in palette.iter().enumerate() {
            assert!(palette[i + 1..].iter().all(|b| b != a));
        }
    }

    #[test]
    fn drawing_fills_the_marker_centre_only() {
        let frame = NdArray::zeros(DType::UInt8, vec![16, 16, 3]).unwrap();
        let pose = pose_tensor(&[(8.0, 8.0, 0.9)]);
        let markers = keypoint_markers(&pose, (16, 16), &MarkerStyle::default()).unwrap();

        let drawn = draw_markers(&frame, &markers, &[[255, 0, 0]]).unwrap();

        assert_eq!(drawn.get::<u8>(&[8, 8, 0]).unwrap(), 255);
        assert_eq!(drawn.get::<u8>(&[8, 8, 1]).unwrap(), 0);
        assert_eq!(drawn.get::<u8>(&[0, 0, 0]).unwrap(), 0);
        // Box corners lie outside the inscribed ellipse.
        assert_eq!(drawn.get::<u8>(&[5, 5, 0]).unwrap(), 0);
        assert_eq!(frame.get::<u8>(&[8, 8, 0]).unwrap(), 0);
    }

    #[test]
    fn channel_swap_reverses_bgr() {
        let frame = NdArray::from_elements(vec![1, 2, 3], &[1u8, 2, 3, 4, 5, 6]).unwrap();
        let swapped = bgr_to_rgb(&frame).unwrap();
        assert_eq!(swapped.to_vec::<u8>().unwrap(), vec![3, 2, 1, 6, 5, 4]);

        assert!(bgr_to_rgb(&sample_frame(4, 2)).is_ok());
        assert!(bgr_to_rgb(&pose_tensor(&[(1.0, 1.0, 1.0)])).is_err());
    }
}
