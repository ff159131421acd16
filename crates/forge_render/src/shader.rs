//! Linked shader programs

use std::fmt;
use std::sync::Arc;

use forge_shader::{CompiledShader, ShaderInterface};

use crate::device::{GraphicsDevice, ProgramId};
use crate::error::Result;
use crate::uniform::UniformValue;

/// A device program together with the interface it was reflected from
pub struct Shader {
    program: ProgramId,
    compiled: CompiledShader,
}

impl Shader {
    pub fn create(device: &mut dyn GraphicsDevice, compiled: CompiledShader) -> Result<Arc<Shader>> {
        let program = match device.create_program(&compiled) {
            Ok(program) => program,
            Err(e) => {
                log::error!("Failed to create program for shader '{}': {}", compiled.key(), e);
                return Err(e);
            }
        };
        Ok(Arc::new(Self { program, compiled }))
    }

    pub fn id(&self) -> ProgramId {
        self.program
    }

    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    pub fn key(&self) -> String {
        self.compiled.key()
    }

    pub fn compiled(&self) -> &CompiledShader {
        &self.compiled
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.compiled.interface
    }

    pub fn has_uniform(&self, location: &str) -> bool {
        self.compiled.interface.contains(location)
    }

    pub fn set_uniform(&self, device: &mut dyn GraphicsDevice, location: &str, value: &UniformValue) {
        device.set_uniform(self.program, location, value);
    }

    pub fn destroy(&self, device: &mut dyn GraphicsDevice) {
        device.destroy_program(self.program);
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("program", &self.program)
            .field("name", &self.compiled.name)
            .field("variant", &self.compiled.variant.key())
            .finish()
    }
}
