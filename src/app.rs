//! Windowed runner: a winit event loop that sets up the cube and ticks it on every redraw.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::AppConfig;
use crate::frame::FrameError;
use crate::gpu::{GpuContext, GpuInitError};
use crate::pipeline::{CubePipeline, PipelineBuilder, SetupError};
use crate::wgpu_backend::WgpuBackend;

/// Why the windowed app stopped.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Gpu(#[from] GpuInitError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Opens a window and spins the cube until the window is closed.
///
/// # Example
/// ```no_run
/// spincube::run().unwrap();
/// ```
pub fn run() -> Result<(), AppError> {
    run_with_config(AppConfig::default())
}

/// Like [`run`], with a custom window and scene.
///
/// # Example
/// ```no_run
/// use spincube::{AppConfig, SceneConfig};
///
/// spincube::run_with_config(
///     AppConfig::new()
///         .title("Faster Cube")
///         .size(1280, 720)
///         .scene(SceneConfig::new().velocity(0.003)),
/// )
/// .unwrap();
/// ```
pub fn run_with_config(config: AppConfig) -> Result<(), AppError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = CubeApp::Pending { config };
    event_loop.run_app(&mut app)?;

    match app {
        CubeApp::Failed(err) => Err(err),
        _ => Ok(()),
    }
}

enum CubeApp {
    Pending {
        config: AppConfig,
    },
    Running {
        window: Arc<Window>,
        ctx: WgpuBackend,
        cube: CubePipeline<WgpuBackend>,
        start_time: Instant,
    },
    Failed(AppError),
}

impl CubeApp {
    fn start(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self, AppError> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let gpu = GpuContext::new(window.clone())?;
        let mut ctx = WgpuBackend::new(gpu);
        let cube = PipelineBuilder::new().scene(config.scene).build(&mut ctx)?;

        window.request_redraw();
        Ok(CubeApp::Running {
            window,
            ctx,
            cube,
            start_time: Instant::now(),
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: AppError) {
        log::error!("{err}");
        *self = CubeApp::Failed(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for CubeApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let CubeApp::Pending { config } = self else {
            return;
        };

        match CubeApp::start(event_loop, config) {
            Ok(running) => *self = running,
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let CubeApp::Running {
            window,
            ctx,
            cube,
            start_time,
        } = self
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("window closed after {:.1} s", start_time.elapsed().as_secs_f32());
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                ctx.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                let timestamp = start_time.elapsed().as_secs_f64() * 1000.0;

                match cube.tick(ctx, timestamp) {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => log::trace!("{err}"),
                    Err(err) => {
                        self.fail(event_loop, err.into());
                        return;
                    }
                }

                window.request_redraw();
            }
            _ => {}
        }
    }
}
