use std::sync::Arc;

use anyhow::{Context, Result};
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::ThreadRng;
use tracing::{error, info, trace};
use vsearch_core::{Phase, ResponseKey, StandardPhase};
use vsearch_data::CsvSink;
use vsearch_experiment::{
    ExperimentConfig, ExperimentEvent, ExperimentStateMachine, StimulusCatalog,
};
use vsearch_render::{FontVec, Scene, SearchRenderer};
use vsearch_timing::HighPrecisionTimer;
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalSize},
    event::{KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

use crate::cli::Args;

type Experiment = ExperimentStateMachine<StandardPhase, HighPrecisionTimer, ThreadRng>;

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    renderer: Option<SearchRenderer>,
    font: Option<FontVec>,
    experiment: Experiment,
    sink: CsvSink,
    /// Results already appended to the sink.
    persisted: usize,
    present_key: String,
    absent_key: String,
    windowed: bool,
    should_exit: bool,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::default(),
        };
        config.subject = args.subject.clone();
        config.validate()?;

        let catalog = StimulusCatalog::load(&args.stimuli)?;
        let sink = CsvSink::open(&args.data, &config.subject)?;
        info!(
            subject = %config.subject,
            run = sink.run_number(),
            data = %args.data.display(),
            "session ready"
        );

        let font = vsearch_render::load_font()?;
        let present_key = config.target_present_key.to_string();
        let absent_key = config.target_absent_key.to_string();

        let run = sink.run_number();
        let timer = HighPrecisionTimer::new();
        let experiment = Experiment::new(config, catalog, run, timer, rand::rng());

        println!("=== VISUAL SEARCH ===");
        println!(
            "Respond '{present_key}' for target present, '{absent_key}' for absent. \
             SPACE starts, ESC aborts."
        );

        Ok(Self {
            window: None,
            pixels: None,
            renderer: None,
            font: Some(font),
            experiment,
            sink,
            persisted: 0,
            present_key,
            absent_key,
            windowed: args.windowed,
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;
        Ok(())
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut attributes = Window::default_attributes().with_title("Visual Search");
        if self.windowed {
            attributes = attributes.with_inner_size(LogicalSize::new(1280.0, 800.0));
        } else {
            let monitor = event_loop
                .primary_monitor()
                .or_else(|| event_loop.available_monitors().next())
                .context("no monitor available")?;
            if let Some(rate) = monitor.refresh_rate_millihertz() {
                info!(refresh_hz = rate as f64 / 1000.0, "primary monitor");
            }
            attributes = attributes
                .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
                .with_resizable(false);
        }

        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();
        info!(
            width = size.width,
            height = size.height,
            scale = window.scale_factor(),
            "window created"
        );

        let surface = SurfaceTexture::new(size.width, size.height, window.clone());
        self.pixels = Some(Pixels::new(size.width, size.height, surface)?);

        let font = self.font.take().context("font already consumed")?;
        let (item_size_px, present_key, absent_key) = {
            let config = self.experiment.config();
            (
                config.item_size_px,
                config.target_present_key,
                config.target_absent_key,
            )
        };
        self.renderer = Some(SearchRenderer::new(
            size.width,
            size.height,
            item_size_px,
            present_key,
            absent_key,
            font,
        )?);

        if !self.windowed {
            window.set_cursor_visible(false);
        }
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let phase = *self.experiment.current_phase();
        let trial_state = self.experiment.trial_state();
        let items = self.experiment.visible_items().to_vec();
        let feedback_success = self.experiment.feedback_success();
        let progress = self.experiment.progress();
        let summary = phase.is_debrief().then(|| self.experiment.summary());

        let pixels = self.pixels.as_mut().context("surface not ready")?;
        let renderer = self.renderer.as_mut().context("renderer not ready")?;

        let scene = Scene {
            phase: &phase,
            trial_state,
            items: &items,
            feedback_success,
            progress,
            summary,
        };
        let stats = renderer.render_frame(&scene, pixels.frame_mut(), &mut self.experiment.timer)?;
        pixels.render()?;

        trace!(
            clear_ms = stats.clear.as_secs_f64() * 1e3,
            draw_ms = stats.phase.as_secs_f64() * 1e3,
            copy_ms = stats.copy.as_secs_f64() * 1e3,
            total_ms = stats.total.as_secs_f64() * 1e3,
            dirty = stats.dirty_count,
            "frame"
        );
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        for event in self.experiment.update() {
            self.experiment.handle_event(event);
        }

        // Persist every newly completed trial before the next one starts.
        while self.persisted < self.experiment.results().len() {
            let result = self.experiment.results()[self.persisted].clone();
            self.sink.append(&result)?;
            self.persisted += 1;
            info!(
                trial = result.trial,
                block = result.block,
                correct = result.correct,
                timed_out = result.timed_out,
                "trial recorded"
            );
        }
        Ok(())
    }

    fn handle_key(&mut self, event: &KeyEvent, event_loop: &ActiveEventLoop) {
        if let PhysicalKey::Code(code) = event.physical_key {
            match code {
                KeyCode::Escape => {
                    self.cleanup_and_exit(event_loop);
                    return;
                }
                KeyCode::Space if self.experiment.current_phase().is_welcome() => {
                    self.experiment.handle_event(ExperimentEvent::SpacePressed);
                    return;
                }
                _ => {}
            }
        }

        // Response keys are matched on the logical key so they follow the
        // participant's keyboard layout.
        if let Key::Character(text) = &event.logical_key {
            if text.eq_ignore_ascii_case(&self.present_key) {
                self.experiment
                    .handle_event(ExperimentEvent::ResponseReceived(ResponseKey::TargetPresent));
            } else if text.eq_ignore_ascii_case(&self.absent_key) {
                self.experiment
                    .handle_event(ExperimentEvent::ResponseReceived(ResponseKey::TargetAbsent));
            }
        }
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        if let Some(pixels) = &mut self.pixels {
            if let Err(error) = pixels.resize_surface(size.width, size.height) {
                error!(%error, "failed to resize surface");
            }
            if let Err(error) = pixels.resize_buffer(size.width, size.height) {
                error!(%error, "failed to resize buffer");
            }
        }
        if let Some(renderer) = &mut self.renderer {
            if let Err(error) = renderer.resize(size.width, size.height) {
                error!(%error, "failed to resize renderer");
            }
        }
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }

        let summary = self.experiment.summary();
        println!("\nSession over: {} trials recorded.", summary.trials);
        if summary.trials > 0 {
            println!("Accuracy: {:.1}%", summary.accuracy() * 100.0);
            if let Some(rt) = summary.mean_rt_ms {
                println!("Mean RT over correct trials: {rt:.0} ms");
            }
        }
        println!("Data file: {}", self.sink.path().display());

        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(error) = self.create_window_and_surface(event_loop) {
                error!(%error, "failed to create window and surface");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.cleanup_and_exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(error) = self.redraw().and_then(|()| self.update()) {
                    error!(%error, "frame failed");
                    self.cleanup_and_exit(event_loop);
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                self.handle_key(&event, event_loop);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
        }
    }
}
