//! # forge_core
//!
//! Foundational primitives shared by every Forge crate:
//! - [`Handle`] / [`HandleMap`]: generational slot storage used by the
//!   transform arena and the entity store
//! - [`LayerMask`]: visibility partitioning for cameras, lights and models
//! - [`logging`]: `env_logger` bootstrap for binaries and tests

pub mod handle;
pub mod layer;
pub mod logging;

pub use handle::{Handle, HandleMap};
pub use layer::LayerMask;

pub mod prelude {
    pub use crate::handle::{Handle, HandleMap};
    pub use crate::layer::LayerMask;
}
