//! Per-frame animation and rendering of the cube.

use thiserror::Error;

use crate::backend::{
    AttribPointer, BufferTarget, Capability, ClearMask, ContextError, DepthFunc, GpuBackend,
    IndexType, Primitive,
};
use crate::pipeline::CubePipeline;

/// Rotation state carried between frames.
///
/// `last_timestamp` starts at zero, so the first frame's delta is the full
/// timestamp since the clock's origin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Animation {
    rotation_angle: f32,
    last_timestamp: f64,
}

impl Animation {
    /// Absolute rotation in radians.
    pub fn rotation_angle(&self) -> f32 {
        self.rotation_angle
    }

    /// Timestamp of the most recent frame in milliseconds.
    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    /// Moves the clock to `timestamp_ms` and returns the elapsed milliseconds.
    ///
    /// A timestamp older than the previous one produces a negative delta and
    /// spins the cube backwards; no clamping is applied.
    pub fn advance(&mut self, timestamp_ms: f64, velocity: f32) -> f64 {
        let delta = timestamp_ms - self.last_timestamp;
        self.last_timestamp = timestamp_ms;
        self.rotation_angle += velocity * delta as f32;
        delta
    }
}

/// Failures while producing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The render target has no area; nothing was drawn.
    #[error("drawable is {width}x{height}, skipping frame")]
    EmptyDrawable { width: u32, height: u32 },
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl FrameError {
    /// Whether the driver can keep ticking after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::EmptyDrawable { .. } | FrameError::Context(ContextError::SurfaceTimeout)
        )
    }
}

impl<B: GpuBackend> CubePipeline<B> {
    /// Advances the animation to `timestamp_ms` and draws one frame.
    ///
    /// The animation clock always moves, even when the drawable is empty and
    /// [`FrameError::EmptyDrawable`] is returned without touching the context.
    pub fn tick(&mut self, ctx: &mut B, timestamp_ms: f64) -> Result<(), FrameError> {
        let (width, height) = ctx.drawable_size();
        self.update(timestamp_ms, width, height)?;
        self.draw(ctx, width, height)?;
        Ok(())
    }

    fn update(&mut self, timestamp_ms: f64, width: u32, height: u32) -> Result<(), FrameError> {
        let delta = self.animation.advance(timestamp_ms, self.scene.velocity);
        log::trace!(
            "frame at {timestamp_ms:.1} ms (delta {delta:.1}), angle {:.4}",
            self.animation.rotation_angle
        );

        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDrawable { width, height });
        }

        let aspect = width as f32 / height as f32;
        self.projection
            .perspective(self.scene.fov_y, aspect, self.scene.near, self.scene.far);
        self.model_view
            .rotation(self.animation.rotation_angle, self.axis);
        Ok(())
    }

    fn draw(&self, ctx: &mut B, width: u32, height: u32) -> Result<(), ContextError> {
        ctx.begin_frame()?;
        match self.record(ctx, width, height) {
            Ok(()) => ctx.end_frame(),
            Err(err) => {
                ctx.discard_frame();
                Err(err)
            }
        }
    }

    fn record(&self, ctx: &mut B, width: u32, height: u32) -> Result<(), ContextError> {
        ctx.use_program(&self.program)?;
        ctx.uniform_matrix4(&self.bindings.projection, &self.projection.to_array())?;
        ctx.uniform_matrix4(&self.bindings.model_view, &self.model_view.to_array())?;

        ctx.bind_buffer(BufferTarget::Array, Some(&self.buffers.vertex))?;
        ctx.enable_vertex_attrib_array(self.bindings.position)?;
        ctx.vertex_attrib_pointer(self.bindings.position, AttribPointer::packed(3))?;

        ctx.bind_buffer(BufferTarget::Array, Some(&self.buffers.color))?;
        ctx.enable_vertex_attrib_array(self.bindings.color)?;
        ctx.vertex_attrib_pointer(self.bindings.color, AttribPointer::packed(4))?;

        ctx.bind_buffer(BufferTarget::ElementArray, Some(&self.buffers.index))?;

        ctx.clear_color(self.scene.clear_color)?;
        ctx.clear_depth(1.0)?;
        ctx.depth_func(DepthFunc::LessEqual)?;
        ctx.enable(Capability::DepthTest)?;
        ctx.clear(ClearMask::ALL)?;

        ctx.viewport(0, 0, width, height)?;
        ctx.draw_elements(
            Primitive::Triangles,
            self.buffers.index_count,
            IndexType::U16,
            0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{Command, HeadlessBackend};
    use crate::pipeline::initialize;

    #[test]
    fn first_delta_is_the_raw_timestamp() {
        let mut animation = Animation::default();
        assert_eq!(animation.advance(250.0, 0.001), 250.0);
        assert!((animation.rotation_angle() - 0.25).abs() < 1e-6);
        assert_eq!(animation.last_timestamp(), 250.0);
    }

    #[test]
    fn angle_accumulates_elapsed_time() {
        let mut animation = Animation::default();
        animation.advance(16.0, 0.001);
        animation.advance(32.0, 0.001);
        animation.advance(48.0, 0.001);
        assert!((animation.rotation_angle() - 0.048).abs() < 1e-6);
    }

    #[test]
    fn backwards_timestamp_rotates_backwards() {
        let mut animation = Animation::default();
        animation.advance(100.0, 0.001);
        assert_eq!(animation.advance(60.0, 0.001), -40.0);
        assert!((animation.rotation_angle() - 0.06).abs() < 1e-6);
    }

    #[test]
    fn same_timestamp_leaves_angle_unchanged() {
        let mut animation = Animation::default();
        animation.advance(16.0, 0.001);
        let before = animation.rotation_angle();
        assert_eq!(animation.advance(16.0, 0.001), 0.0);
        assert_eq!(animation.rotation_angle(), before);
    }

    #[test]
    fn empty_drawable_advances_clock_without_gpu_calls() {
        let mut ctx = HeadlessBackend::new(0, 600);
        let mut cube = initialize(&mut ctx).unwrap();
        ctx.take_commands();

        let err = cube.tick(&mut ctx, 16.0).unwrap_err();
        assert!(matches!(err, FrameError::EmptyDrawable { width: 0, height: 600 }));
        assert!(err.is_recoverable());
        assert!(ctx.commands().is_empty());
        assert_eq!(cube.animation().last_timestamp(), 16.0);

        ctx.set_drawable_size(800, 600);
        cube.tick(&mut ctx, 32.0).unwrap();
        assert!((cube.rotation_angle() - 0.032).abs() < 1e-6);
        assert_eq!(ctx.draw_count(), 1);
    }

    #[test]
    fn only_empty_drawables_and_surface_timeouts_are_recoverable() {
        assert!(FrameError::Context(ContextError::SurfaceTimeout).is_recoverable());
        assert!(!FrameError::Context(ContextError::NoProgram).is_recoverable());
        assert!(!FrameError::Context(ContextError::Surface("lost".into())).is_recoverable());
    }

    #[test]
    fn frame_is_bracketed_and_draws_last() {
        let mut ctx = HeadlessBackend::default();
        let mut cube = initialize(&mut ctx).unwrap();
        ctx.take_commands();

        cube.tick(&mut ctx, 16.0).unwrap();
        let commands = ctx.commands();
        assert_eq!(commands.first(), Some(&Command::BeginFrame));
        assert_eq!(commands.last(), Some(&Command::EndFrame));
        assert!(matches!(
            commands[commands.len() - 2],
            Command::DrawElements { mode: Primitive::Triangles, count: 36, index_type: IndexType::U16, offset: 0 }
        ));
    }
}
