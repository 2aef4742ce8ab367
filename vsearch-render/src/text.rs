use std::collections::HashMap;
use std::sync::Arc;

use ab_glyph::{Font, FontVec, Glyph, PxScale, ScaleFont, point};
use tiny_skia::{Pixmap, PremultipliedColorU8};

/// Rasterize one line of text into a tightly-bounded premultiplied pixmap.
pub fn render_text_pixmap(text: &str, size_px: f32, font: &FontVec, color: [u8; 4]) -> Pixmap {
    let scale = PxScale::from(size_px);
    let scaled = font.as_scaled(scale);

    // Lay out glyphs with the baseline at the ascent.
    let mut glyphs: Vec<Glyph> = Vec::with_capacity(text.len());
    let mut pen_x = 0.0f32;
    let mut previous = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = previous {
            pen_x += scaled.kern(prev, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, scaled.ascent()),
        });
        pen_x += scaled.h_advance(id);
        previous = Some(id);
    }

    let outlines: Vec<_> = glyphs
        .iter()
        .filter_map(|g| font.outline_glyph(g.clone()))
        .collect();

    // Union of pixel bounds; whitespace-only text has no outlines.
    let Some(bounds) = outlines
        .iter()
        .map(|o| o.px_bounds())
        .reduce(|a, b| ab_glyph::Rect {
            min: point(a.min.x.min(b.min.x), a.min.y.min(b.min.y)),
            max: point(a.max.x.max(b.max.x), a.max.y.max(b.max.y)),
        })
    else {
        return Pixmap::new(1, 1).expect("1x1 pixmap");
    };

    let width = (bounds.max.x.ceil() - bounds.min.x.floor()).max(1.0) as u32;
    let height = (bounds.max.y.ceil() - bounds.min.y.floor()).max(1.0) as u32;
    let mut pixmap = Pixmap::new(width, height).expect("text pixmap");
    let stride = width as usize;
    let pixels = pixmap.pixels_mut();

    for outline in &outlines {
        let glyph_bounds = outline.px_bounds();
        outline.draw(|x, y, coverage| {
            let px = (x as f32 + glyph_bounds.min.x - bounds.min.x) as i32;
            let py = (y as f32 + glyph_bounds.min.y - bounds.min.y) as i32;
            if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                return;
            }
            let alpha = (coverage.clamp(0.0, 1.0) * color[3] as f32) as u16;
            let index = py as usize * stride + px as usize;
            // Where glyph boxes overlap, keep the denser coverage.
            if alpha as u8 <= pixels[index].alpha() {
                return;
            }
            let premultiply = |c: u8| ((c as u16 * alpha) / 255) as u8;
            if let Some(pixel) = PremultipliedColorU8::from_rgba(
                premultiply(color[0]),
                premultiply(color[1]),
                premultiply(color[2]),
                alpha as u8,
            ) {
                pixels[index] = pixel;
            }
        });
    }

    pixmap
}

/// Lazily rendered text pixmaps keyed by interned label id.
pub struct TextCache {
    size_px: f32,
    map: HashMap<usize, Arc<Pixmap>>,
}

impl TextCache {
    pub fn new(size_px: f32) -> Self {
        Self {
            size_px,
            map: HashMap::new(),
        }
    }

    /// Render-or-fetch the pixmap for an interned label. Returns `None` only
    /// for ids that were never interned.
    pub fn get_or_render(&mut self, label_id: usize, font: &FontVec) -> Option<Arc<Pixmap>> {
        if let Some(pixmap) = self.map.get(&label_id) {
            return Some(Arc::clone(pixmap));
        }
        let text = vsearch_cache::resolve(label_id)?;
        let pixmap = Arc::new(render_text_pixmap(
            &text,
            self.size_px,
            font,
            [255, 255, 255, 255],
        ));
        self.map.insert(label_id, Arc::clone(&pixmap));
        Some(pixmap)
    }
}
