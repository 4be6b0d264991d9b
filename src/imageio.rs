//! Frame stacks on disk.
//!
//! Each input file holds one time step of a single-channel 2D image. Frames
//! are stacked into `txyzc` arrays with z and c of extent 1.

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageReader};
use ndarray::{ArrayD, Axis, IxDyn};
use tracing::debug;

use crate::error::{GraphError, LoadError};

/// Axis order of every loaded stack.
pub const FRAME_AXES: &str = "txyzc";

fn decode_error(path: &Path, err: impl std::fmt::Display) -> LoadError {
    LoadError::Decode {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn decode_frame(path: &Path) -> Result<GrayImage, LoadError> {
    let image = ImageReader::open(path)
        .map_err(|e| decode_error(path, e))?
        .with_guessed_format()
        .map_err(|e| decode_error(path, e))?
        .decode()
        .map_err(|e| decode_error(path, e))?;
    Ok(image.to_luma8())
}

/// Load grayscale frames into a `(t, x, y, 1, 1)` stack.
///
/// All frames must have the size of the first one.
pub fn load_frames<P: AsRef<Path>>(paths: &[P]) -> Result<ArrayD<u8>, LoadError> {
    let Some(first) = paths.first() else {
        return Err(LoadError::Empty);
    };
    let first = decode_frame(first.as_ref())?;
    let (width, height) = first.dimensions();

    let mut stack = ArrayD::<u8>::zeros(IxDyn(&[
        paths.len(),
        width as usize,
        height as usize,
        1,
        1,
    ]));

    for (t, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        let frame = if t == 0 {
            first.clone()
        } else {
            decode_frame(path)?
        };
        if frame.dimensions() != (width, height) {
            return Err(LoadError::FrameSize {
                path: path.display().to_string(),
                expected: (width, height),
                actual: frame.dimensions(),
            });
        }
        for (x, y, pixel) in frame.enumerate_pixels() {
            stack[[t, x as usize, y as usize, 0, 0]] = pixel.0[0];
        }
    }

    debug!(frames = paths.len(), width, height, "loaded frame stack");
    Ok(stack)
}

/// Load the raw and binary stacks of one dataset.
///
/// Raw intensities are widened to `f32`. Both stacks must have the same shape.
pub fn load_inputs<P: AsRef<Path>>(
    raw: &[P],
    binary: &[P],
) -> Result<(ArrayD<f32>, ArrayD<u8>), LoadError> {
    let raw = load_frames(raw)?;
    let binary = load_frames(binary)?;
    if raw.shape() != binary.shape() {
        return Err(LoadError::StackMismatch {
            raw: raw.shape().to_vec(),
            binary: binary.shape().to_vec(),
        });
    }
    Ok((raw.mapv(f32::from), binary))
}

/// Write the `z = 0`, `c = 0` plane of every time step as
/// `{prefix}_t{t:04}.png` under `dir`.
pub fn write_overlay_frames(
    overlay: &ArrayD<u8>,
    dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, LoadError> {
    if overlay.ndim() != FRAME_AXES.len() {
        return Err(LoadError::Graph(GraphError::Shape(format!(
            "overlay has {} dimensions, expected {}",
            overlay.ndim(),
            FRAME_AXES.len()
        ))));
    }
    let encode_error = |path: &Path, err: &dyn std::fmt::Display| LoadError::Encode {
        path: path.display().to_string(),
        message: err.to_string(),
    };

    std::fs::create_dir_all(dir).map_err(|e| encode_error(dir, &e))?;

    let x_extent = overlay.len_of(Axis(1));
    let y_extent = overlay.len_of(Axis(2));
    let mut written = Vec::with_capacity(overlay.len_of(Axis(0)));

    for (t, frame) in overlay.axis_iter(Axis(0)).enumerate() {
        let mut image = GrayImage::new(x_extent as u32, y_extent as u32);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            pixel.0[0] = frame[[x as usize, y as usize, 0, 0]];
        }
        let path = dir.join(format!("{}_t{:04}.png", prefix, t));
        image.save(&path).map_err(|e| encode_error(&path, &e))?;
        written.push(path);
    }

    debug!(frames = written.len(), dir = %dir.display(), "wrote overlay frames");
    Ok(written)
}
