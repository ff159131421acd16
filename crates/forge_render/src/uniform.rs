//! Typed uniform values and per-material uniform storage
//!
//! A [`UniformContext`] is laid out once from a reflected
//! [`ShaderInterface`]: one [`UniformValue`] slot per user-facing uniform.
//! Engine-supplied uniforms (camera matrices, lights, shadow maps) are left to
//! the [`RendererContext`] and never get a slot.
//!
//! ## Example
//!
//! ```ignore
//! let mut uniforms = UniformContext::from_interface(shader.interface());
//! uniforms.set("Color", Vec3::new(1.0, 0.5, 0.2));
//! let shininess: f32 = uniforms.get("Shininess");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use forge_shader::{ShaderDataType, ShaderInterface};
use glam::{IVec2, IVec3, IVec4, Mat2, Mat3, Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{is_automatic_uniform, RendererContext};
use crate::device::GraphicsDevice;
use crate::resource::{Texture, TextureKind};
use crate::shader::Shader;

/// Prefix reserved for engine-internal inputs such as post-process textures
pub const INTERNAL_UNIFORM_PREFIX: &str = "frg_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UniformError {
    #[error("Uniform '{0}' is not declared")]
    Undeclared(String),

    #[error("Uniform '{name}' is {expected}, not {found}")]
    TypeMismatch {
        name: String,
        expected: ShaderDataType,
        found: &'static str,
    },
}

/// One uniform value, tagged with its type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Int2(IVec2),
    Int3(IVec3),
    Int4(IVec4),
    Float(f32),
    Float2(Vec2),
    Float3(Vec3),
    Float4(Vec4),
    Mat2(Mat2),
    Mat3(Mat3),
    Mat4(Mat4),
    #[serde(skip)]
    Texture(Option<Arc<Texture>>),
}

impl UniformValue {
    /// Zero value for a declared type; samplers start unbound
    pub fn zero(ty: ShaderDataType) -> Option<Self> {
        Some(match ty {
            ShaderDataType::Bool => Self::Bool(false),
            ShaderDataType::Int => Self::Int(0),
            ShaderDataType::Int2 => Self::Int2(IVec2::ZERO),
            ShaderDataType::Int3 => Self::Int3(IVec3::ZERO),
            ShaderDataType::Int4 => Self::Int4(IVec4::ZERO),
            ShaderDataType::Float => Self::Float(0.0),
            ShaderDataType::Float2 => Self::Float2(Vec2::ZERO),
            ShaderDataType::Float3 => Self::Float3(Vec3::ZERO),
            ShaderDataType::Float4 => Self::Float4(Vec4::ZERO),
            ShaderDataType::Mat2 => Self::Mat2(Mat2::IDENTITY),
            ShaderDataType::Mat3 => Self::Mat3(Mat3::IDENTITY),
            ShaderDataType::Mat4 => Self::Mat4(Mat4::IDENTITY),
            ShaderDataType::Sampler2D | ShaderDataType::SamplerCube => Self::Texture(None),
            ShaderDataType::Struct => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Int2(_) => "Int2",
            Self::Int3(_) => "Int3",
            Self::Int4(_) => "Int4",
            Self::Float(_) => "Float",
            Self::Float2(_) => "Float2",
            Self::Float3(_) => "Float3",
            Self::Float4(_) => "Float4",
            Self::Mat2(_) => "Mat2",
            Self::Mat3(_) => "Mat3",
            Self::Mat4(_) => "Mat4",
            Self::Texture(_) => "Texture",
        }
    }

    /// Whether this value may be written to a uniform declared as `ty`.
    /// Integers are accepted for samplers since they carry texture units.
    pub fn matches(&self, ty: ShaderDataType) -> bool {
        match (self, ty) {
            (Self::Texture(Some(texture)), ShaderDataType::Sampler2D) => {
                texture.kind() == TextureKind::Texture2D
            }
            (Self::Texture(Some(texture)), ShaderDataType::SamplerCube) => {
                texture.kind() == TextureKind::Cubemap
            }
            (Self::Texture(None), t) => t.is_sampler(),
            (Self::Int(_), t) if t.is_sampler() => true,
            (Self::Bool(_), ShaderDataType::Bool)
            | (Self::Int(_), ShaderDataType::Int)
            | (Self::Int2(_), ShaderDataType::Int2)
            | (Self::Int3(_), ShaderDataType::Int3)
            | (Self::Int4(_), ShaderDataType::Int4)
            | (Self::Float(_), ShaderDataType::Float)
            | (Self::Float2(_), ShaderDataType::Float2)
            | (Self::Float3(_), ShaderDataType::Float3)
            | (Self::Float4(_), ShaderDataType::Float4)
            | (Self::Mat2(_), ShaderDataType::Mat2)
            | (Self::Mat3(_), ShaderDataType::Mat3)
            | (Self::Mat4(_), ShaderDataType::Mat4) => true,
            _ => false,
        }
    }
}

/// Rust types that map onto a [`UniformValue`] variant
pub trait UniformType: Sized {
    const NAME: &'static str;

    fn accepts(ty: ShaderDataType) -> bool;
    fn into_value(self) -> UniformValue;
    fn from_value(value: &UniformValue) -> Option<Self>;
}

macro_rules! impl_uniform_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl UniformType for $ty {
                const NAME: &'static str = stringify!($variant);

                fn accepts(ty: ShaderDataType) -> bool {
                    ty == ShaderDataType::$variant
                }

                fn into_value(self) -> UniformValue {
                    UniformValue::$variant(self)
                }

                fn from_value(value: &UniformValue) -> Option<Self> {
                    match value {
                        UniformValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for UniformValue {
                fn from(value: $ty) -> Self {
                    UniformValue::$variant(value)
                }
            }
        )*
    };
}

impl_uniform_type! {
    bool => Bool,
    i32 => Int,
    IVec2 => Int2,
    IVec3 => Int3,
    IVec4 => Int4,
    f32 => Float,
    Vec2 => Float2,
    Vec3 => Float3,
    Vec4 => Float4,
    Mat2 => Mat2,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

impl UniformType for Option<Arc<Texture>> {
    const NAME: &'static str = "Texture";

    fn accepts(ty: ShaderDataType) -> bool {
        ty.is_sampler()
    }

    fn into_value(self) -> UniformValue {
        UniformValue::Texture(self)
    }

    fn from_value(value: &UniformValue) -> Option<Self> {
        match value {
            UniformValue::Texture(texture) => Some(texture.clone()),
            _ => None,
        }
    }
}

/// Layout entry for one uniform slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformSpecification {
    /// Full GLSL location, `u_Palette[2]` for array elements
    pub name: String,
    /// Semantic name used by [`UniformContext::get`]/[`UniformContext::set`]
    pub variable_name: String,
    pub ty: ShaderDataType,
}

/// Serializable uniform value keyed by semantic name
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniformRecord {
    pub name: String,
    pub value: UniformValue,
}

#[derive(Clone, Default)]
pub struct UniformContext {
    specs: Vec<UniformSpecification>,
    values: Vec<UniformValue>,
    lookup: HashMap<String, usize>,
}

impl UniformContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_interface(interface: &ShaderInterface) -> Self {
        let mut context = Self::new();
        context.add_from_interface(interface);
        context
    }

    /// Add slots for uniforms not already present. Array uniforms get one
    /// slot per element, named `Name[i]`.
    pub fn add_from_interface(&mut self, interface: &ShaderInterface) {
        for descriptor in interface.uniforms() {
            if is_automatic_uniform(&descriptor.name)
                || descriptor.name.starts_with(INTERNAL_UNIFORM_PREFIX)
            {
                continue;
            }
            let Some(zero) = UniformValue::zero(descriptor.ty) else {
                continue;
            };

            match descriptor.array_len {
                Some(len) => {
                    for i in 0..len {
                        self.push(
                            format!("{}[{}]", descriptor.name, i),
                            format!("{}[{}]", descriptor.variable_name, i),
                            descriptor.ty,
                            zero.clone(),
                        );
                    }
                }
                None => self.push(
                    descriptor.name.clone(),
                    descriptor.variable_name.clone(),
                    descriptor.ty,
                    zero,
                ),
            }
        }
    }

    fn push(&mut self, name: String, variable_name: String, ty: ShaderDataType, value: UniformValue) {
        if self.lookup.contains_key(&variable_name) {
            return;
        }
        self.lookup.insert(variable_name.clone(), self.specs.len());
        self.specs.push(UniformSpecification {
            name,
            variable_name,
            ty,
        });
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn has(&self, variable_name: &str) -> bool {
        self.lookup.contains_key(variable_name)
    }

    pub fn specifications(&self) -> &[UniformSpecification] {
        &self.specs
    }

    pub fn specification(&self, variable_name: &str) -> Option<&UniformSpecification> {
        self.lookup.get(variable_name).map(|&i| &self.specs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UniformSpecification, &UniformValue)> {
        self.specs.iter().zip(self.values.iter())
    }

    pub fn value(&self, variable_name: &str) -> Option<&UniformValue> {
        self.lookup.get(variable_name).map(|&i| &self.values[i])
    }

    pub fn try_get<T: UniformType>(&self, variable_name: &str) -> Result<T, UniformError> {
        let index = self.index_of::<T>(variable_name)?;
        T::from_value(&self.values[index]).ok_or_else(|| UniformError::TypeMismatch {
            name: variable_name.to_string(),
            expected: self.specs[index].ty,
            found: T::NAME,
        })
    }

    pub fn try_set<T: UniformType>(&mut self, variable_name: &str, value: T) -> Result<(), UniformError> {
        let index = self.index_of::<T>(variable_name)?;
        self.values[index] = value.into_value();
        Ok(())
    }

    /// Set from an already tagged value, checking the tag against the layout
    pub fn try_set_value(&mut self, variable_name: &str, value: UniformValue) -> Result<(), UniformError> {
        let index = self.slot_for(variable_name, &value)?;
        self.values[index] = value;
        Ok(())
    }

    fn slot_for(&self, variable_name: &str, value: &UniformValue) -> Result<usize, UniformError> {
        let index = *self
            .lookup
            .get(variable_name)
            .ok_or_else(|| UniformError::Undeclared(variable_name.to_string()))?;
        let spec = &self.specs[index];
        if !value.matches(spec.ty) || (matches!(value, UniformValue::Int(_)) && spec.ty.is_sampler()) {
            return Err(UniformError::TypeMismatch {
                name: variable_name.to_string(),
                expected: spec.ty,
                found: value.type_name(),
            });
        }
        Ok(index)
    }

    /// # Panics
    ///
    /// If the uniform is not declared or `T` does not match its type.
    pub fn get<T: UniformType>(&self, variable_name: &str) -> T {
        match self.try_get(variable_name) {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Panics
    ///
    /// If the uniform is not declared or `T` does not match its type.
    pub fn set<T: UniformType>(&mut self, variable_name: &str, value: T) {
        if let Err(e) = self.try_set(variable_name, value) {
            panic!("{}", e);
        }
    }

    fn index_of<T: UniformType>(&self, variable_name: &str) -> Result<usize, UniformError> {
        let index = *self
            .lookup
            .get(variable_name)
            .ok_or_else(|| UniformError::Undeclared(variable_name.to_string()))?;
        let ty = self.specs[index].ty;
        if !T::accepts(ty) {
            return Err(UniformError::TypeMismatch {
                name: variable_name.to_string(),
                expected: ty,
                found: T::NAME,
            });
        }
        Ok(index)
    }

    /// Upload every slot `shader` declares. Textures are bound through the
    /// context and their unit written as an integer.
    pub fn apply(&self, device: &mut dyn GraphicsDevice, shader: &Shader, context: &mut RendererContext) {
        let interface = shader.interface();
        for (spec, value) in self.iter() {
            if !interface.contains(&spec.name) {
                continue;
            }
            match value {
                UniformValue::Texture(Some(texture)) => {
                    let slot = context.bind_texture(device, texture);
                    shader.set_uniform(device, &spec.name, &UniformValue::Int(slot as i32));
                }
                UniformValue::Texture(None) => {}
                other => shader.set_uniform(device, &spec.name, other),
            }
        }
    }

    /// Non-texture values for persistence
    pub fn snapshot(&self) -> Vec<UniformRecord> {
        self.iter()
            .filter(|(_, value)| !matches!(value, UniformValue::Texture(_)))
            .map(|(spec, value)| UniformRecord {
                name: spec.variable_name.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Apply records produced by [`snapshot`](Self::snapshot). Either every
    /// record is applied or, when one no longer fits the layout, none is.
    pub fn restore(&mut self, records: &[UniformRecord]) -> Result<(), UniformError> {
        let slots = records
            .iter()
            .map(|record| self.slot_for(&record.name, &record.value))
            .collect::<Result<Vec<_>, _>>()?;
        for (index, record) in slots.into_iter().zip(records) {
            self.values[index] = record.value.clone();
        }
        Ok(())
    }
}

impl fmt::Debug for UniformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.specs.iter().zip(self.values.iter()).map(|(s, v)| (&s.variable_name, v)))
            .finish()
    }
}
