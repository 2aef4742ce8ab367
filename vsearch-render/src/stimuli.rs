use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use tiny_skia::{Color, IntSize, LineCap, Paint, PathBuilder, Pixmap, Rect, Stroke, Transform};
use vsearch_core::Stimulus;

/// Decoded stimulus images, premultiplied and scaled to the item size,
/// keyed by interned path id. Each unique file is decoded once per session.
pub struct StimulusPixmapCache {
    item_size_px: u32,
    map: HashMap<usize, Arc<Pixmap>>,
}

impl StimulusPixmapCache {
    pub fn new(item_size_px: u32) -> Self {
        Self {
            item_size_px,
            map: HashMap::new(),
        }
    }

    pub fn get_or_load<S: Stimulus>(&mut self, stimulus: &S) -> Result<Arc<Pixmap>> {
        let id = stimulus.cache_id();
        if let Some(pixmap) = self.map.get(&id) {
            return Ok(Arc::clone(pixmap));
        }
        let path = vsearch_cache::resolve(id)
            .ok_or_else(|| anyhow::anyhow!("unknown stimulus cache id {id}"))?;
        let pixmap = Arc::new(
            load_stimulus_pixmap(Path::new(&path), self.item_size_px)
                .with_context(|| format!("loading stimulus image {path}"))?,
        );
        self.map.insert(id, Arc::clone(&pixmap));
        Ok(pixmap)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Decode an image file, scale it to fit a `size_px` square (aspect
/// preserved), and convert to a premultiplied pixmap.
pub fn load_stimulus_pixmap(path: &Path, size_px: u32) -> Result<Pixmap> {
    let rgba = image::open(path)?
        .resize(size_px, size_px, FilterType::Triangle)
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut data = rgba.into_raw();
    for pixel in data.chunks_exact_mut(4) {
        let alpha = pixel[3] as u16;
        pixel[0] = ((pixel[0] as u16 * alpha) / 255) as u8;
        pixel[1] = ((pixel[1] as u16 * alpha) / 255) as u8;
        pixel[2] = ((pixel[2] as u16 * alpha) / 255) as u8;
    }
    let size = IntSize::from_wh(width, height).context("empty stimulus image")?;
    Pixmap::from_vec(data, size).context("stimulus image does not fit a pixmap")
}

/// The fixation cross: two thin white bars crossing at the center.
pub fn fixation_cross_pixmap(extent: u32, thickness: f32) -> Pixmap {
    let mut pixmap = Pixmap::new(extent, extent).expect("fixation pixmap");
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::from_rgba8(255, 255, 255, 255));

    let side = extent as f32;
    let horizontal = Rect::from_xywh(0.0, (side - thickness) * 0.5, side, thickness)
        .expect("fixation bar rect");
    pixmap.fill_rect(horizontal, &paint, Transform::identity(), None);

    let vertical = Rect::from_xywh((side - thickness) * 0.5, 0.0, thickness, side)
        .expect("fixation bar rect");
    pixmap.fill_rect(vertical, &paint, Transform::identity(), None);

    pixmap
}

/// Green check mark for correct-response feedback.
pub fn tick_pixmap(extent: u32) -> Pixmap {
    let mut pixmap = Pixmap::new(extent, extent).expect("tick pixmap");
    let side = extent as f32;

    let mut pb = PathBuilder::new();
    pb.move_to(side * 0.18, side * 0.55);
    pb.line_to(side * 0.42, side * 0.78);
    pb.line_to(side * 0.84, side * 0.22);
    let path = pb.finish().expect("tick path");

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(Color::from_rgba8(40, 180, 70, 255));
    let stroke = Stroke {
        width: side * 0.12,
        line_cap: LineCap::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    pixmap
}

/// Red cross for incorrect-response feedback.
pub fn cross_pixmap(extent: u32) -> Pixmap {
    let mut pixmap = Pixmap::new(extent, extent).expect("cross pixmap");
    let side = extent as f32;

    let mut pb = PathBuilder::new();
    pb.move_to(side * 0.2, side * 0.2);
    pb.line_to(side * 0.8, side * 0.8);
    pb.move_to(side * 0.8, side * 0.2);
    pb.line_to(side * 0.2, side * 0.8);
    let path = pb.finish().expect("cross path");

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(Color::from_rgba8(200, 50, 50, 255));
    let stroke = Stroke {
        width: side * 0.12,
        line_cap: LineCap::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    pixmap
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use vsearch_core::{ImageStimulus, StimulusRole};

    fn temp_png(name: &str, width: u32, height: u32) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "vsearch_render_{}_{}.png",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 128]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn decoded_images_are_scaled_and_premultiplied() {
        let path = temp_png("decode", 8, 8);
        let pixmap = load_stimulus_pixmap(&path, 4).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (4, 4));
        // 50% alpha red premultiplies to ~127.
        let px = pixmap.pixels()[0];
        assert_eq!(px.alpha(), 128);
        assert!((px.red() as i32 - 127).abs() <= 1);
        assert_eq!(px.green(), 0);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn aspect_ratio_is_preserved() {
        let path = temp_png("aspect", 16, 8);
        let pixmap = load_stimulus_pixmap(&path, 8).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (8, 4));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cache_decodes_each_file_once() {
        let path = temp_png("cache", 8, 8);
        let stim = ImageStimulus::from_path(&path, StimulusRole::Distractor);
        let mut cache = StimulusPixmapCache::new(8);

        let a = cache.get_or_load(&stim).unwrap();
        let b = cache.get_or_load(&stim).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let stim = ImageStimulus::from_path(
            Path::new("/nonexistent/vsearch/none.png"),
            StimulusRole::Target,
        );
        let mut cache = StimulusPixmapCache::new(8);
        assert!(cache.get_or_load(&stim).is_err());
    }

    #[test]
    fn feedback_glyphs_have_ink() {
        for pixmap in [tick_pixmap(64), cross_pixmap(64), fixation_cross_pixmap(40, 2.0)] {
            assert!(pixmap.pixels().iter().any(|p| p.alpha() > 0));
        }
    }
}
