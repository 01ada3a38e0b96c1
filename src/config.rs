//! Window and scene configuration.

use crate::math::Vector3;

/// Camera, animation and clear parameters of the cube scene.
///
/// The defaults are the fixed values the demo was tuned with:
/// 45° vertical field of view, clip planes at 0.1 and 100, the cube three
/// units in front of the eye, spinning at 0.001 rad/ms about `(0, 1, 1)`
/// over a blue background.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneConfig {
    /// Angular velocity in radians per millisecond.
    pub velocity: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Model-view translation applied once at setup.
    pub translation: Vector3,
    /// Rotation axis; normalized by [`SceneConfig::rotation_axis`].
    pub axis: Vector3,
    pub clear_color: [f32; 4],
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            velocity: 0.001,
            fov_y: 45f32.to_radians(),
            near: 0.1,
            far: 100.0,
            translation: Vector3::new(0.0, 0.0, -3.0),
            axis: Vector3::new(0.0, 1.0, 1.0),
            clear_color: [0.0, 0.0, 1.0, 1.0],
        }
    }
}

impl SceneConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn velocity(mut self, radians_per_ms: f32) -> Self {
        self.velocity = radians_per_ms;
        self
    }

    pub fn fov_degrees(mut self, degrees: f32) -> Self {
        self.fov_y = degrees.to_radians();
        self
    }

    pub fn clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn translation(mut self, translation: Vector3) -> Self {
        self.translation = translation;
        self
    }

    pub fn axis(mut self, axis: Vector3) -> Self {
        self.axis = axis;
        self
    }

    pub fn clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    /// The rotation axis at unit length.
    pub fn rotation_axis(&self) -> Vector3 {
        self.axis.normalize()
    }
}

/// Configuration for the app window.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub scene: SceneConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Spinning Cube".to_string(),
            width: 800,
            height: 600,
            scene: SceneConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn scene(mut self, scene: SceneConfig) -> Self {
        self.scene = scene;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_constants() {
        let scene = SceneConfig::default();
        assert_eq!(scene.velocity, 0.001);
        assert!((scene.fov_y - std::f32::consts::PI / 4.0).abs() < 1e-6);
        assert_eq!((scene.near, scene.far), (0.1, 100.0));
        assert_eq!(scene.clear_color, [0.0, 0.0, 1.0, 1.0]);

        let axis = scene.rotation_axis();
        assert!((axis.length() - 1.0).abs() < 1e-6);
        assert_eq!(axis.x, 0.0);
        assert!((axis.y - axis.z).abs() < 1e-7);
    }

    #[test]
    fn builders_chain() {
        let config = AppConfig::new()
            .title("Cube")
            .size(1280, 720)
            .scene(SceneConfig::new().velocity(0.002).fov_degrees(60.0));

        assert_eq!(config.title, "Cube");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.scene.velocity, 0.002);
        assert!((config.scene.fov_y - 60f32.to_radians()).abs() < 1e-7);
    }
}
