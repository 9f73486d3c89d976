//! Affine filter viewer
//!
//! Shows a texture through the runner's affine filter in a GLFW window. The
//! texture is either a PNG given on the command line or the configured test fill.
//!
//! Usage: `affine_viewer [config.toml|config.ron] [image.png]`
//!
//! Controls: arrow keys pan, `=`/`-` zoom, `R` rotates a quarter turn, `[`/`]`
//! rotate in small steps, `H`/`V` flip, `0` resets, `Escape` quits.

mod window;

use std::sync::Arc;

use glfw::{Action, Key, WindowEvent};
use thiserror::Error;
use vulkan_runner::config::ConfigError;
use vulkan_runner::foundation::logging;
use vulkan_runner::foundation::math::TransformError;
use vulkan_runner::prelude::*;
use vulkan_runner::vulkan::resources::{PixelSource, Texture};

use window::{Window, WindowError};

const PAN_STEP: f64 = 0.05;
const ZOOM_STEP: f64 = 1.1;
const ROTATE_STEP_DEGREES: f64 = 15.0;

/// Viewer failures
#[derive(Error, Debug)]
enum ViewerError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Image load failed: {0}")]
    Image(#[from] image::ImageError),
}

type ViewerResult<T> = Result<T, ViewerError>;

/// Command line inputs
#[derive(Debug, Default)]
struct Args {
    config_path: Option<String>,
    image_path: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = Self::default();
        for arg in std::env::args().skip(1) {
            if arg.ends_with(".toml") || arg.ends_with(".ron") {
                args.config_path = Some(arg);
            } else {
                args.image_path = Some(arg);
            }
        }
        args
    }
}

fn load_config(path: Option<&str>) -> ViewerResult<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::load_from_file(path)?,
        None => RunnerConfig::new("affine_viewer"),
    };
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

/// Interactive transform state, kept around the frame center
#[derive(Debug, Clone, Copy)]
struct ViewTransform {
    transform: AffineMatrix,
}

impl ViewTransform {
    fn new() -> Self {
        Self {
            transform: AffineMatrix::identity(),
        }
    }

    fn apply(&mut self, step: &AffineMatrix) {
        self.transform = step.multiply(&self.transform);
    }

    /// Update for a pressed key; `false` when the key is not bound
    fn handle_key(&mut self, key: Key) -> ViewerResult<bool> {
        match key {
            Key::Left => self.apply(&AffineMatrix::translate(PAN_STEP, 0.0)),
            Key::Right => self.apply(&AffineMatrix::translate(-PAN_STEP, 0.0)),
            Key::Up => self.apply(&AffineMatrix::translate(0.0, PAN_STEP)),
            Key::Down => self.apply(&AffineMatrix::translate(0.0, -PAN_STEP)),
            // Sampling transform: shrinking coordinates zooms in
            Key::Equal => self.apply(&AffineMatrix::scale(1.0 / ZOOM_STEP, 1.0 / ZOOM_STEP).from_center()),
            Key::Minus => self.apply(&AffineMatrix::scale(ZOOM_STEP, ZOOM_STEP).from_center()),
            Key::R => self.apply(&AffineMatrix::rotate_ortho(1)?),
            Key::LeftBracket => self.apply(&AffineMatrix::rotate(ROTATE_STEP_DEGREES).from_center()),
            Key::RightBracket => self.apply(&AffineMatrix::rotate(-ROTATE_STEP_DEGREES).from_center()),
            Key::H => self.apply(&AffineMatrix::hflip()),
            Key::V => self.apply(&AffineMatrix::vflip()),
            Key::Num0 => *self = Self::new(),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Everything the frame loop needs
///
/// Field order is teardown order: the sync engine waits for the device before the
/// objects the GPU may still be using are released.
struct Viewer {
    sync: FrameSyncEngine,
    filter: AffineFilter,
    texture: Texture,
    recorders: Vec<CommandRecorder>,
    command_pool: CommandPool,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    view: ViewTransform,
    clear_color: [f32; 4],
    needs_resize: bool,
    window: Window,
}

impl Viewer {
    fn new(config: &RunnerConfig, image_path: Option<&str>) -> ViewerResult<Self> {
        let fallback = config.swapchain.fallback_extent();
        let mut window = Window::new(&config.application_name, fallback.width, fallback.height)?;

        let extensions = window.required_instance_extensions()?;
        let instance = Arc::new(VulkanInstance::new(config, &extensions)?);
        let surface = window.create_surface(instance.instance().handle())?;
        let driver: Arc<dyn GpuDriver> = Arc::new(DeviceContext::new(instance, surface)?);

        let mut swapchain = SwapchainManager::new(Arc::clone(&driver), &config.swapchain)?;
        let render_pass = RenderPass::new(Arc::clone(&driver), swapchain.format().format)?;
        swapchain.create_framebuffers(render_pass.handle())?;

        let frames = config.frames_in_flight;
        let command_pool = CommandPool::for_frames(Arc::clone(&driver))?;
        let recorders = command_pool
            .allocate(u32::try_from(frames).unwrap_or(1))?
            .into_iter()
            .map(|buffer| CommandRecorder::new(Arc::clone(&driver), buffer))
            .collect();
        let sync = FrameSyncEngine::new(Arc::clone(&driver), frames)?;

        let uploader = TextureUploader::new(Arc::clone(&driver));
        let texture = match image_path {
            Some(path) => load_image(&uploader, &driver, path)?,
            None => uploader.create_test_texture(&config.texture)?,
        };

        let view = ViewTransform::new();
        let filter = AffineFilter::from_config(driver, &render_pass, &config.shaders, view.transform)?;

        log::info!(
            "Viewer ready: {} frames in flight, {}x{} texture",
            frames,
            texture.width(),
            texture.height()
        );
        Ok(Self {
            sync,
            filter,
            texture,
            recorders,
            command_pool,
            swapchain,
            render_pass,
            view,
            clear_color: config.swapchain.clear_color,
            needs_resize: false,
            window,
        })
    }

    fn run(&mut self) -> ViewerResult<()> {
        while !self.window.should_close() {
            self.handle_events()?;
            if self.needs_resize {
                self.recreate_swapchain()?;
                continue;
            }
            self.draw_frame()?;
        }
        self.sync.wait_all()?;
        Ok(())
    }

    fn handle_events(&mut self) -> ViewerResult<()> {
        for event in self.window.poll_events() {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    self.window.set_should_close(true);
                }
                WindowEvent::Key(key, _, Action::Press | Action::Repeat, _) => {
                    if self.view.handle_key(key)? {
                        self.filter.set_user_transform(self.view.transform);
                        log::debug!("User transform {}", self.view.transform);
                    }
                }
                WindowEvent::FramebufferSize(_, _) => self.needs_resize = true,
                _ => {}
            }
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> ViewerResult<()> {
        let (mut width, mut height) = self.window.framebuffer_size();
        // Minimized windows report a zero extent
        while (width == 0 || height == 0) && !self.window.should_close() {
            self.window.wait_events();
            (width, height) = self.window.framebuffer_size();
        }
        if self.window.should_close() {
            return Ok(());
        }

        let outcome = self.swapchain.resize(self.render_pass.handle(), width, height)?;
        if outcome.image_count_changed {
            log::info!("Swapchain now has {} images", outcome.image_count);
        }
        self.needs_resize = false;
        Ok(())
    }

    fn draw_frame(&mut self) -> ViewerResult<()> {
        let slot = self.sync.begin_frame()?;
        let image_index = match self.sync.acquire(&self.swapchain)? {
            AcquireOutcome::Success(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                self.needs_resize = true;
                index
            }
            AcquireOutcome::OutOfDate => {
                self.needs_resize = true;
                return Ok(());
            }
            AcquireOutcome::Failed(e) => return Err(VulkanError::Api(e).into()),
        };

        let recorder = &mut self.recorders[slot];
        self.command_pool.reset_buffer(recorder.handle())?;
        recorder.reset_state();
        recorder.begin()?;
        {
            let mut pass = recorder.begin_render_pass(&self.render_pass, &self.swapchain, image_index, self.clear_color)?;
            self.filter.draw(&mut pass, self.texture.view(), None)?;
        }
        let command_buffer = recorder.end()?;
        self.sync.submit(command_buffer)?;

        match self.sync.present(&self.swapchain, image_index) {
            Ok(suboptimal) => self.needs_resize |= suboptimal,
            Err(VulkanError::SwapchainOutOfDate) => self.needs_resize = true,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Decode a PNG into a sampleable texture
fn load_image(uploader: &TextureUploader, driver: &Arc<dyn GpuDriver>, path: &str) -> ViewerResult<Texture> {
    let pixels = image::open(path)?.to_rgba8();
    let (width, height) = pixels.dimensions();
    log::info!("Loaded {} ({}x{})", path, width, height);

    let texture = Texture::new(Arc::clone(driver), width, height)?;
    uploader.upload(&texture, PixelSource::Bytes(pixels.as_raw()))?;
    Ok(texture)
}

fn main() {
    let args = Args::parse();
    let config = match load_config(args.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init_with_level(&config.log_level);

    let result = Viewer::new(&config, args.image_path.as_deref()).and_then(|mut viewer| viewer.run());
    if let Err(e) = result {
        log::error!("Viewer failed: {}", e);
        std::process::exit(1);
    }
    log::info!("Viewer exited cleanly");
}
