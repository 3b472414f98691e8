use glam::Vec3;
use serde::Serialize;

use crate::error::{Result, ShadingError};

/// Number of light slots a lighting-capable surface can bind.
pub const MAX_LIGHTS: usize = 8;

const FALLBACK_DIRECTION: Vec3 = Vec3::Z;

/// Rotates the point `(a, b)` about the origin by `degrees`.
fn rotate(a: f32, b: f32, degrees: f32) -> (f32, f32) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    (a * cos - b * sin, a * sin + b * cos)
}

/// Unit vector for a `(yaw, pitch, roll)` orientation in degrees.
///
/// Starts from +Z and applies roll in the XY plane, pitch in YZ, then yaw in
/// XZ. A degenerate result falls back to +Z.
pub fn direction_from_angles(toward: [f32; 3]) -> Vec3 {
    rotated_forward(toward).unwrap_or(FALLBACK_DIRECTION)
}

/// Applies roll (XY), pitch (YZ) and yaw (XZ), in that order, to `v`.
pub(crate) fn orient(v: Vec3, [yaw, pitch, roll]: [f32; 3]) -> Vec3 {
    let (x, y) = rotate(v.x, v.y, roll);
    let (y, z) = rotate(y, v.z, pitch);
    let (x, z) = rotate(x, z, yaw);
    Vec3::new(x, y, z)
}

fn rotated_forward(toward: [f32; 3]) -> Option<Vec3> {
    let direction = orient(Vec3::Z, toward);
    let length = direction.length();
    (length > 0.0 && length.is_finite()).then(|| direction / length)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LightKind {
    /// Positioned light with a spot cone; 180 degrees lights every direction.
    Point {
        place: [f32; 3],
        attenuation: f32,
        angle: f32,
    },
    /// Parallel light, like sunlight.
    Directional,
}

/// A scene light as consumed by lighting-capable surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Light {
    kind: LightKind,
    toward: [f32; 3],
    color: [f32; 3],
}

impl Light {
    pub fn point(
        place: [f32; 3],
        toward: [f32; 3],
        color: [f32; 3],
        attenuation: f32,
        angle: f32,
    ) -> Result<Self> {
        if !attenuation.is_finite() || attenuation < 0.0 {
            return Err(ShadingError::invalid(format!(
                "light attenuation must be a non-negative number, got {attenuation}"
            )));
        }
        if !(angle > 0.0 && angle <= 360.0) {
            return Err(ShadingError::invalid(format!(
                "light cone angle must be in (0, 360], got {angle}"
            )));
        }
        validate_color(color)?;
        Ok(Self {
            kind: LightKind::Point {
                place,
                attenuation,
                angle,
            },
            toward,
            color,
        })
    }

    /// Point light that shines in every direction.
    pub fn omni(place: [f32; 3], color: [f32; 3], attenuation: f32) -> Result<Self> {
        Self::point(place, [0.0; 3], color, attenuation, 180.0)
    }

    pub fn directional(toward: [f32; 3], color: [f32; 3]) -> Result<Self> {
        validate_color(color)?;
        Ok(Self {
            kind: LightKind::Directional,
            toward,
            color,
        })
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn is_directional(&self) -> bool {
        matches!(self.kind, LightKind::Directional)
    }

    pub fn color(&self) -> [f32; 3] {
        self.color
    }

    pub fn toward(&self) -> [f32; 3] {
        self.toward
    }

    /// Position of a point light; the origin for directional lights.
    pub fn position(&self) -> Vec3 {
        match self.kind {
            LightKind::Point { place, .. } => Vec3::from(place),
            LightKind::Directional => Vec3::ZERO,
        }
    }

    /// Direction the light travels in. Directional lights report the vector
    /// pointing back toward the light, as the fixed pipeline expects.
    pub fn direction(&self) -> Vec3 {
        match (self.kind, rotated_forward(self.toward)) {
            (_, None) => FALLBACK_DIRECTION,
            (LightKind::Point { .. }, Some(direction)) => direction,
            (LightKind::Directional, Some(direction)) => -direction,
        }
    }

    pub fn attenuation(&self) -> f32 {
        match self.kind {
            LightKind::Point { attenuation, .. } => attenuation,
            LightKind::Directional => 0.0,
        }
    }

    /// Half-angle of the spot cone in degrees.
    pub fn cutoff(&self) -> f32 {
        match self.kind {
            LightKind::Point { angle, .. } => angle / 2.0,
            LightKind::Directional => 180.0,
        }
    }

    pub fn goto(&mut self, place: [f32; 3]) {
        if let LightKind::Point { place: current, .. } = &mut self.kind {
            *current = place;
        }
    }

    pub fn turn(&mut self, toward: [f32; 3]) {
        self.toward = toward;
    }

    pub fn set_color(&mut self, color: [f32; 3]) -> Result<()> {
        validate_color(color)?;
        self.color = color;
        Ok(())
    }
}

fn validate_color(color: [f32; 3]) -> Result<()> {
    if color.iter().any(|c| !c.is_finite() || *c < 0.0) {
        return Err(ShadingError::invalid(format!(
            "light color components must be non-negative, got {color:?}"
        )));
    }
    Ok(())
}

/// Registry handle for a light in a [`LightSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LightId(u32);

/// Ordered light registry plus the ambient term.
///
/// Registration order is binding order: surfaces with a limited number of
/// slots bind the first lights registered.
#[derive(Debug, Clone, Default)]
pub struct LightSet {
    next_id: u32,
    lights: Vec<(LightId, Light)>,
    ambient: [f32; 3],
}

impl LightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, light: Light) -> LightId {
        let id = LightId(self.next_id);
        self.next_id += 1;
        self.lights.push((id, light));
        id
    }

    pub fn remove(&mut self, id: LightId) -> Option<Light> {
        let index = self.lights.iter().position(|(light_id, _)| *light_id == id)?;
        Some(self.lights.remove(index).1)
    }

    pub fn get(&self, id: LightId) -> Option<&Light> {
        self.lights
            .iter()
            .find(|(light_id, _)| *light_id == id)
            .map(|(_, light)| light)
    }

    pub fn get_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights
            .iter_mut()
            .find(|(light_id, _)| *light_id == id)
            .map(|(_, light)| light)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter().map(|(_, light)| light)
    }

    /// Lights in registration order.
    pub fn to_vec(&self) -> Vec<Light> {
        self.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn ambient(&self) -> [f32; 3] {
        self.ambient
    }

    pub fn set_ambient(&mut self, ambient: [f32; 3]) -> Result<()> {
        validate_color(ambient)?;
        self.ambient = ambient;
        Ok(())
    }
}
