//! Z-projection overview
//!
//! Maximum-intensity projection of one channel, contrast stretched, with
//! every final crop box outlined. Written as
//! `<out>/zprojection/<prefix>_Zprojection.png`.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use thiserror::Error;

use crate::autocrop::{BoxSet, CropBox};
use crate::volume::{max_projection, to_8bit, Volume};

/// Sub-directory of the output folder holding the overviews
pub const ZPROJECTION_DIR: &str = "zprojection";

/// Outline color of the crop boxes
const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Annotation error types
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Nothing to project: empty volume")]
    EmptyVolume,

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnnotateError>;

/// Path of the overview of `prefix`
pub fn projection_path(output_dir: &Path, prefix: &str) -> PathBuf {
    output_dir
        .join(ZPROJECTION_DIR)
        .join(format!("{}_Zprojection.png", prefix))
}

/// Render the annotated projection of `channel`
pub fn render_projection(channel: &Volume<u16>, boxes: &BoxSet) -> Result<RgbImage> {
    if channel.is_empty() {
        return Err(AnnotateError::EmptyVolume);
    }

    // stretch on the projection itself so faint stacks stay visible
    let projection = to_8bit(&max_projection(channel), u16::BITS as u8);
    let (w, h) = (projection.width() as u32, projection.height() as u32);

    let mut img = RgbImage::from_fn(w, h, |x, y| {
        let v = projection.get(x as usize, y as usize, 0);
        Rgb([v, v, v])
    });

    for (label, crop_box) in boxes.iter() {
        match outline(crop_box, w, h) {
            Some(rect) => draw_hollow_rect_mut(&mut img, rect, BOX_COLOR),
            None => tracing::debug!(label, crop_box = %crop_box, "box outside projection"),
        }
    }

    Ok(img)
}

/// Render and save the overview; returns the written path
pub fn write_projection(
    channel: &Volume<u16>,
    boxes: &BoxSet,
    output_dir: &Path,
    prefix: &str,
) -> Result<PathBuf> {
    let img = render_projection(channel, boxes)?;
    let path = projection_path(output_dir, prefix);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save(&path)?;
    Ok(path)
}

/// Rectangle of the box footprint clipped to the image
fn outline(crop_box: &CropBox, width: u32, height: u32) -> Option<Rect> {
    if crop_box.is_empty() {
        return None;
    }
    let x0 = crop_box.x_min.max(0);
    let y0 = crop_box.y_min.max(0);
    let x1 = crop_box.x_max.min(width as i32);
    let y1 = crop_box.y_max.min(height as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Extent;
    use tempfile::tempdir;

    fn channel() -> Volume<u16> {
        let mut vol = Volume::filled(Extent::new(20, 16, 3), 100u16);
        vol.set(10, 8, 2, 4000);
        vol
    }

    #[test]
    fn test_projection_is_stretched() {
        let img = render_projection(&channel(), &BoxSet::new()).unwrap();
        assert_eq!(img.dimensions(), (20, 16));
        assert_eq!(img.get_pixel(10, 8), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_boxes_are_outlined() {
        let mut boxes = BoxSet::new();
        boxes.insert(1, CropBox::new(2, 8, 3, 9, 0, 3));
        let img = render_projection(&channel(), &boxes).unwrap();
        assert_eq!(img.get_pixel(2, 3), &BOX_COLOR);
        assert_eq!(img.get_pixel(7, 8), &BOX_COLOR);
        assert_eq!(img.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_outline_clipping() {
        let partly = CropBox::new(15, 30, -2, 4, 0, 1);
        let rect = outline(&partly, 20, 16).unwrap();
        assert_eq!((rect.left(), rect.top(), rect.width(), rect.height()), (15, 0, 5, 4));
        assert!(outline(&CropBox::new(25, 30, 0, 4, 0, 1), 20, 16).is_none());
        assert!(outline(&CropBox::EMPTY, 20, 16).is_none());
    }

    #[test]
    fn test_write_projection() {
        let dir = tempdir().unwrap();
        let path = write_projection(&channel(), &BoxSet::new(), dir.path(), "img").unwrap();
        assert_eq!(path, dir.path().join("zprojection").join("img_Zprojection.png"));
        assert!(path.is_file());
    }

    #[test]
    fn test_empty_channel() {
        let empty = Volume::<u16>::new(0, 0, 0);
        assert!(matches!(
            render_projection(&empty, &BoxSet::new()),
            Err(AnnotateError::EmptyVolume)
        ));
    }
}
