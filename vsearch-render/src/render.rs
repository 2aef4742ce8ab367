use std::fs;
use std::sync::Arc;
use std::time::Duration;

use ab_glyph::FontVec;
use anyhow::{Context, Result, ensure};
use bytemuck::{cast_slice, cast_slice_mut};
use tiny_skia::{Color, FilterQuality, Pixmap, PixmapPaint, Rect, Transform};
use vsearch_core::{Phase, PlacedStimulus, Progress, SessionSummary, TrialState};
use vsearch_timing::Timer;

use crate::stimuli::{StimulusPixmapCache, cross_pixmap, fixation_cross_pixmap, tick_pixmap};
use crate::text::TextCache;

const OPAQUE_BLACK: u32 = u32::from_ne_bytes([0, 0, 0, 255]);

/// Everything the experiment wants on screen this frame.
pub struct Scene<'a, P: Phase> {
    pub phase: &'a P,
    pub trial_state: Option<TrialState>,
    pub items: &'a [PlacedStimulus],
    pub feedback_success: Option<bool>,
    pub progress: Option<Progress>,
    pub summary: Option<SessionSummary>,
}

/// Per-frame stage timings, fed back into the timer for calibration.
pub struct FrameStats {
    pub clear: Duration,
    pub phase: Duration,
    pub copy: Duration,
    pub total: Duration,
    pub dirty_count: usize,
}

pub trait PhaseRenderer<P: Phase> {
    fn render_phase(&mut self, scene: &Scene<'_, P>) -> Result<()>;
}

/// Locate a usable UI font. Checked relative to the working directory
/// first so a bundled font wins over system ones.
pub fn load_font() -> Result<FontVec> {
    const CANDIDATES: [&str; 6] = [
        "assets/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/Library/Fonts/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];
    for candidate in CANDIDATES {
        if let Ok(bytes) = fs::read(candidate) {
            return FontVec::try_from_vec(bytes)
                .map_err(|_| anyhow::anyhow!("font file {candidate} is not a valid font"));
        }
    }
    anyhow::bail!("no usable UI font found; place one at assets/DejaVuSans.ttf")
}

/// Interned ids for labels whose text never changes during a session.
struct StaticLabels {
    title: usize,
    instructions: usize,
    start_hint: usize,
    calibrating: usize,
    debrief: usize,
}

/// CPU rasterizer for the whole session. Draws into an offscreen
/// premultiplied canvas and copies only dirty regions into the visible
/// frame each redraw.
pub struct SearchRenderer {
    width: u32,
    height: u32,
    center: (f32, f32),
    font: FontVec,
    stimuli: StimulusPixmapCache,
    text: TextCache,
    fixation: Arc<Pixmap>,
    tick: Arc<Pixmap>,
    cross: Arc<Pixmap>,
    labels: StaticLabels,
    canvas: Pixmap,
    dirty: Vec<Rect>,
    first_frame: bool,
}

impl SearchRenderer {
    pub fn new(
        width: u32,
        height: u32,
        item_size_px: u32,
        present_key: char,
        absent_key: char,
        font: FontVec,
    ) -> Result<Self> {
        let mut canvas = Pixmap::new(width, height).context("renderer canvas")?;
        canvas.fill(Color::from_rgba8(0, 0, 0, 255));

        let labels = StaticLabels {
            title: vsearch_cache::intern("VISUAL SEARCH"),
            instructions: vsearch_cache::intern(&format!(
                "Press '{present_key}' if the target is present, '{absent_key}' if it is absent."
            )),
            start_hint: vsearch_cache::intern("Press SPACE to begin. ESC quits at any time."),
            calibrating: vsearch_cache::intern("CALIBRATING..."),
            debrief: vsearch_cache::intern("Experiment complete. Thank you!"),
        };

        Ok(Self {
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            font,
            stimuli: StimulusPixmapCache::new(item_size_px),
            text: TextCache::new(28.0),
            fixation: Arc::new(fixation_cross_pixmap(40, 2.0)),
            tick: Arc::new(tick_pixmap(96)),
            cross: Arc::new(cross_pixmap(96)),
            labels,
            canvas,
            dirty: Vec::with_capacity(32),
            first_frame: true,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.width = width;
        self.height = height;
        self.center = (width as f32 / 2.0, height as f32 / 2.0);
        self.canvas = Pixmap::new(width, height).context("renderer canvas")?;
        self.canvas.fill(Color::from_rgba8(0, 0, 0, 255));
        self.dirty.clear();
        self.first_frame = true;
        Ok(())
    }

    pub fn render_frame<P, T>(
        &mut self,
        scene: &Scene<'_, P>,
        frame: &mut [u8],
        timer: &mut T,
    ) -> Result<FrameStats>
    where
        P: Phase,
        T: Timer<Timestamp = u64>,
    {
        ensure!(
            frame.len() == self.canvas.data().len(),
            "frame buffer is {} bytes, canvas is {}",
            frame.len(),
            self.canvas.data().len()
        );

        let frame_start = timer.now();
        if self.first_frame {
            self.first_frame = false;
            self.canvas.fill(Color::from_rgba8(0, 0, 0, 255));
            frame.copy_from_slice(self.canvas.data());
            self.dirty.clear();
        }

        let old_dirty = std::mem::take(&mut self.dirty);

        let t = timer.now();
        self.clear_regions(&old_dirty);
        let clear = timer.elapsed(t);

        let t = timer.now();
        self.render_phase(scene)?;
        let phase = timer.elapsed(t);

        let t = timer.now();
        let mut present = old_dirty;
        present.extend_from_slice(&self.dirty);
        for rect in &present {
            self.copy_region(*rect, frame);
        }
        let copy = timer.elapsed(t);

        let total = timer.elapsed(frame_start);
        timer.record_frame(total);

        Ok(FrameStats {
            clear,
            phase,
            copy,
            total,
            dirty_count: self.dirty.len(),
        })
    }

    fn clear_regions(&mut self, regions: &[Rect]) {
        let width = self.width as usize;
        let words: &mut [u32] = cast_slice_mut(self.canvas.data_mut());
        for rect in regions {
            let (x0, y0, x1, y1) = clamp_rect(*rect, self.width, self.height);
            for y in y0..y1 {
                words[y * width + x0..y * width + x1].fill(OPAQUE_BLACK);
            }
        }
    }

    fn copy_region(&self, rect: Rect, frame: &mut [u8]) {
        let width = self.width as usize;
        let (x0, y0, x1, y1) = clamp_rect(rect, self.width, self.height);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let src: &[u32] = cast_slice(self.canvas.data());
        let dst: &mut [u32] = cast_slice_mut(frame);
        for y in y0..y1 {
            dst[y * width + x0..y * width + x1]
                .copy_from_slice(&src[y * width + x0..y * width + x1]);
        }
    }

    /// Blit a premultiplied pixmap centered at `center`, axis-aligned.
    /// Fully opaque rows take the memcpy path.
    fn blit(&mut self, pixmap: &Pixmap, center: (f32, f32)) {
        let w = pixmap.width() as i32;
        let h = pixmap.height() as i32;
        let x0 = (center.0 - w as f32 * 0.5).round() as i32;
        let y0 = (center.1 - h as f32 * 0.5).round() as i32;

        let dst_x0 = x0.max(0);
        let dst_y0 = y0.max(0);
        let dst_x1 = (x0 + w).min(self.width as i32);
        let dst_y1 = (y0 + h).min(self.height as i32);
        if dst_x1 <= dst_x0 || dst_y1 <= dst_y0 {
            return;
        }

        let src_x0 = (dst_x0 - x0) as usize;
        let src_y0 = (dst_y0 - y0) as usize;
        let copy_w = (dst_x1 - dst_x0) as usize;
        let rows = (dst_y1 - dst_y0) as usize;

        let canvas_w = self.width as usize;
        let src_stride = pixmap.width() as usize;
        let src_words: &[u32] = cast_slice(pixmap.data());
        let dst_words: &mut [u32] = cast_slice_mut(self.canvas.data_mut());

        for row in 0..rows {
            let src_start = (src_y0 + row) * src_stride + src_x0;
            let dst_start = (dst_y0 as usize + row) * canvas_w + dst_x0 as usize;
            let src_row = &src_words[src_start..src_start + copy_w];
            let dst_row = &mut dst_words[dst_start..dst_start + copy_w];
            if src_row.iter().all(|&px| px >> 24 == 0xFF) {
                dst_row.copy_from_slice(src_row);
            } else {
                for (dst, &src) in dst_row.iter_mut().zip(src_row) {
                    *dst = blend_premultiplied(src, *dst);
                }
            }
        }

        if let Some(rect) = Rect::from_xywh(
            dst_x0 as f32,
            dst_y0 as f32,
            copy_w as f32,
            rows as f32,
        ) {
            self.dirty.push(rect);
        }
    }

    /// Rotated items go through tiny-skia; the dirty rect is the rotated
    /// square's bounding box.
    fn draw_rotated(&mut self, pixmap: &Pixmap, center: (f32, f32), degrees: f32) {
        let w = pixmap.width() as f32;
        let h = pixmap.height() as f32;
        let x0 = center.0 - w * 0.5;
        let y0 = center.1 - h * 0.5;
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.canvas.draw_pixmap(
            x0.round() as i32,
            y0.round() as i32,
            pixmap.as_ref(),
            &paint,
            Transform::from_rotate_at(degrees, center.0, center.1),
            None,
        );

        let half = w.max(h) * std::f32::consts::SQRT_2 * 0.5 + 1.0;
        if let Some(rect) =
            Rect::from_xywh(center.0 - half, center.1 - half, half * 2.0, half * 2.0)
        {
            self.dirty.push(rect);
        }
    }

    fn blit_fixation(&mut self) {
        let pixmap = Arc::clone(&self.fixation);
        let center = self.center;
        self.blit(&pixmap, center);
    }

    fn blit_label(&mut self, label_id: usize, pos: (f32, f32)) -> Result<()> {
        let pixmap = self
            .text
            .get_or_render(label_id, &self.font)
            .ok_or_else(|| anyhow::anyhow!("label id {label_id} was never interned"))?;
        self.blit(&pixmap, pos);
        Ok(())
    }

    fn draw_items(&mut self, items: &[PlacedStimulus]) -> Result<()> {
        for item in items {
            let pixmap = self.stimuli.get_or_load(&item.stimulus)?;
            // Screen y grows downward; placement uses math convention.
            let pos = (
                self.center.0 + item.position.0,
                self.center.1 - item.position.1,
            );
            match item.rotation_deg {
                Some(degrees) => self.draw_rotated(&pixmap, pos, degrees),
                None => self.blit(&pixmap, pos),
            }
        }
        Ok(())
    }
}

impl<P: Phase> PhaseRenderer<P> for SearchRenderer {
    fn render_phase(&mut self, scene: &Scene<'_, P>) -> Result<()> {
        let center = self.center;
        match scene.phase {
            p if p.is_welcome() => {
                self.blit_label(self.labels.title, (center.0, center.1 - 90.0))?;
                self.blit_label(self.labels.instructions, center)?;
                self.blit_label(self.labels.start_hint, (center.0, center.1 + 70.0))?;
            }
            p if p.requires_calibration() => {
                self.blit_label(self.labels.calibrating, center)?;
            }
            p if p.is_experiment() => {
                if let Some(state) = scene.trial_state {
                    match state {
                        TrialState::Fixation => self.blit_fixation(),
                        TrialState::Response => {
                            self.draw_items(scene.items)?;
                            self.blit_fixation();
                        }
                        TrialState::Feedback => {
                            let pixmap = if scene.feedback_success.unwrap_or(false) {
                                Arc::clone(&self.tick)
                            } else {
                                Arc::clone(&self.cross)
                            };
                            self.blit(&pixmap, center);
                        }
                        TrialState::Complete => {
                            // Blank inter-trial interval.
                        }
                    }
                }
                if let Some(progress) = scene.progress {
                    let label = vsearch_cache::intern(&format!(
                        "Block {}/{}   Trial {}/{}",
                        progress.block, progress.blocks, progress.trial, progress.trials
                    ));
                    self.blit_label(label, (110.0, 30.0))?;
                }
            }
            p if p.is_debrief() => {
                self.blit_label(self.labels.debrief, (center.0, center.1 - 30.0))?;
                if let Some(summary) = scene.summary {
                    let rt = summary
                        .mean_rt_ms
                        .map(|ms| format!("{ms:.0} ms"))
                        .unwrap_or_else(|| "n/a".into());
                    let label = vsearch_cache::intern(&format!(
                        "{} trials   accuracy {:.0}%   mean RT {rt}",
                        summary.trials,
                        summary.accuracy() * 100.0
                    ));
                    self.blit_label(label, (center.0, center.1 + 30.0))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn clamp_rect(rect: Rect, width: u32, height: u32) -> (usize, usize, usize, usize) {
    let x0 = rect.x().floor().max(0.0).min(width as f32) as usize;
    let y0 = rect.y().floor().max(0.0).min(height as f32) as usize;
    let x1 = (rect.x() + rect.width()).ceil().max(0.0).min(width as f32) as usize;
    let y1 = (rect.y() + rect.height()).ceil().max(0.0).min(height as f32) as usize;
    (x0, y0, x1, y1)
}

fn blend_premultiplied(src: u32, dst: u32) -> u32 {
    let src_alpha = (src >> 24) & 0xFF;
    let inverse = 255 - src_alpha;
    let channel = |shift: u32| {
        let s = (src >> shift) & 0xFF;
        let d = (dst >> shift) & 0xFF;
        (s + (d * inverse + 127) / 255).min(255)
    };
    channel(0) | (channel(8) << 8) | (channel(16) << 16) | (channel(24) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_source_replaces_destination() {
        let src = u32::from_ne_bytes([10, 20, 30, 255]);
        let dst = u32::from_ne_bytes([200, 200, 200, 255]);
        assert_eq!(blend_premultiplied(src, dst), src);
    }

    #[test]
    fn transparent_source_keeps_destination() {
        let src = 0u32;
        let dst = u32::from_ne_bytes([200, 100, 50, 255]);
        assert_eq!(blend_premultiplied(src, dst), dst);
    }

    #[test]
    fn half_alpha_blends_toward_source() {
        let src = u32::from_ne_bytes([128, 0, 0, 128]);
        let dst = OPAQUE_BLACK;
        let out = blend_premultiplied(src, dst).to_ne_bytes();
        assert_eq!(out[0], 128);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn clamp_rect_limits_to_canvas() {
        let rect = Rect::from_xywh(-10.0, -10.0, 40.0, 15.0).unwrap();
        assert_eq!(clamp_rect(rect, 20, 20), (0, 0, 20, 5));

        let rect = Rect::from_xywh(15.0, 18.0, 40.0, 40.0).unwrap();
        assert_eq!(clamp_rect(rect, 20, 20), (15, 18, 20, 20));
    }
}
