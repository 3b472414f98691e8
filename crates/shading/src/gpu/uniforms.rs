use serde::Serialize;

use crate::error::{Result, ShadingError};
use crate::types::ScalarType;

/// A typed uniform value as written to a program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    UVec2([u32; 2]),
    UVec3([u32; 3]),
    UVec4([u32; 4]),
    Mat4([f32; 16]),
}

/// Shape of a uniform as declared in shader source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    UVec2,
    UVec3,
    UVec4,
    Mat4,
    Bool,
    Sampler2d,
}

impl UniformKind {
    /// Maps a GLSL type keyword; unsupported types yield `None`.
    pub fn from_glsl(keyword: &str) -> Option<Self> {
        let kind = match keyword {
            "float" => UniformKind::Float,
            "vec2" => UniformKind::Vec2,
            "vec3" => UniformKind::Vec3,
            "vec4" => UniformKind::Vec4,
            "int" => UniformKind::Int,
            "ivec2" => UniformKind::IVec2,
            "ivec3" => UniformKind::IVec3,
            "ivec4" => UniformKind::IVec4,
            "uint" => UniformKind::UInt,
            "uvec2" => UniformKind::UVec2,
            "uvec3" => UniformKind::UVec3,
            "uvec4" => UniformKind::UVec4,
            "mat4" => UniformKind::Mat4,
            "bool" => UniformKind::Bool,
            "sampler2D" => UniformKind::Sampler2d,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether `value` may be written to a uniform of this kind.
    /// Booleans and samplers take integer writes.
    pub fn accepts(self, value: &UniformValue) -> bool {
        matches!(
            (self, value),
            (UniformKind::Float, UniformValue::Float(_))
                | (UniformKind::Vec2, UniformValue::Vec2(_))
                | (UniformKind::Vec3, UniformValue::Vec3(_))
                | (UniformKind::Vec4, UniformValue::Vec4(_))
                | (UniformKind::Int, UniformValue::Int(_))
                | (UniformKind::IVec2, UniformValue::IVec2(_))
                | (UniformKind::IVec3, UniformValue::IVec3(_))
                | (UniformKind::IVec4, UniformValue::IVec4(_))
                | (UniformKind::UInt, UniformValue::UInt(_))
                | (UniformKind::UVec2, UniformValue::UVec2(_))
                | (UniformKind::UVec3, UniformValue::UVec3(_))
                | (UniformKind::UVec4, UniformValue::UVec4(_))
                | (UniformKind::Mat4, UniformValue::Mat4(_))
                | (UniformKind::Bool, UniformValue::Int(_))
                | (UniformKind::Sampler2d, UniformValue::Int(_))
        )
    }
}

impl UniformValue {
    /// Builds a value from a scalar type and 1-4 components, the way
    /// `glUniform{1..4}{f,i,ui}` takes them.
    pub fn from_parts(scalar: ScalarType, values: &[f64]) -> Result<Self> {
        let floats = || values.iter().map(|v| *v as f32).collect::<Vec<_>>();
        let ints = || values.iter().map(|v| *v as i32).collect::<Vec<_>>();
        let uints = || -> Result<Vec<u32>> {
            values
                .iter()
                .map(|v| {
                    if *v < 0.0 {
                        Err(ShadingError::invalid(format!(
                            "unsigned uniform component must be non-negative, got {v}"
                        )))
                    } else {
                        Ok(*v as u32)
                    }
                })
                .collect()
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ShadingError::invalid("uniform components must be finite"));
        }
        let value = match (scalar, values.len()) {
            (ScalarType::Float, 1) => UniformValue::Float(floats()[0]),
            (ScalarType::Float, 2) => UniformValue::Vec2(to_array(floats())),
            (ScalarType::Float, 3) => UniformValue::Vec3(to_array(floats())),
            (ScalarType::Float, 4) => UniformValue::Vec4(to_array(floats())),
            (ScalarType::Int, 1) => UniformValue::Int(ints()[0]),
            (ScalarType::Int, 2) => UniformValue::IVec2(to_array(ints())),
            (ScalarType::Int, 3) => UniformValue::IVec3(to_array(ints())),
            (ScalarType::Int, 4) => UniformValue::IVec4(to_array(ints())),
            (ScalarType::UInt, 1) => UniformValue::UInt(uints()?[0]),
            (ScalarType::UInt, 2) => UniformValue::UVec2(to_array(uints()?)),
            (ScalarType::UInt, 3) => UniformValue::UVec3(to_array(uints()?)),
            (ScalarType::UInt, 4) => UniformValue::UVec4(to_array(uints()?)),
            (_, n) => {
                return Err(ShadingError::invalid(format!(
                    "uniforms take 1-4 components, got {n}"
                )))
            }
        };
        Ok(value)
    }
}

fn to_array<T: Copy + Default, const N: usize>(values: Vec<T>) -> [T; N] {
    let mut array = [T::default(); N];
    array.copy_from_slice(&values[..N]);
    array
}

impl From<glam::Mat4> for UniformValue {
    fn from(matrix: glam::Mat4) -> Self {
        UniformValue::Mat4(matrix.to_cols_array())
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(vector: glam::Vec3) -> Self {
        UniformValue::Vec3(vector.to_array())
    }
}
