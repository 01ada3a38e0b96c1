use std::process::ExitCode;

use spincube::{AppConfig, Command, HeadlessBackend, LoggingConfig, init_logging, initialize};

const FRAME_MS: f64 = 1000.0 / 60.0;

fn usage() -> ExitCode {
    eprintln!("usage: spincube [--headless <frames>]");
    ExitCode::from(2)
}

/// Drives the cube through the recording backend and logs what it would have drawn.
fn run_headless(frames: u32) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::default();
    let mut ctx = HeadlessBackend::new(config.width, config.height);
    let mut cube = initialize(&mut ctx)?;
    let setup_calls = ctx.take_commands().len();

    for frame in 1..=frames {
        cube.tick(&mut ctx, frame as f64 * FRAME_MS)?;
    }

    let uniform_uploads = ctx
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::UniformMatrix4 { .. }))
        .count();

    log::info!(
        "{frames} frames, {} draws, {} setup calls, {} frame calls ({} uniform uploads)",
        ctx.draw_count(),
        setup_calls,
        ctx.commands().len(),
        uniform_uploads
    );
    log::info!(
        "final angle {:.4} rad after {:.1} ms",
        cube.rotation_angle(),
        cube.animation().last_timestamp()
    );
    if let Some(model_view) = ctx.last_uniform("uModelViewMatrix") {
        log::debug!("final model-view {model_view:?}");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging(LoggingConfig::default());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result: Result<(), Box<dyn std::error::Error>> = match args.as_slice() {
        [] => spincube::run_with_config(AppConfig::default()).map_err(Into::into),
        [flag, frames] if flag == "--headless" => match frames.parse() {
            Ok(frames) => run_headless(frames),
            Err(_) => return usage(),
        },
        _ => return usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
