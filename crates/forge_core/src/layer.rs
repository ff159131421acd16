//! Layer masks partitioning entities, cameras and lights into visibility groups

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};
use serde::{Deserialize, Serialize};

/// A 32-bit visibility mask. Two masks interact when they share any bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u32::MAX);
    pub const DEFAULT: Self = Self(1);

    /// Mask containing a single layer
    ///
    /// # Panics
    ///
    /// Panics if `layer >= 32`.
    pub const fn layer(layer: u32) -> Self {
        assert!(layer < 32, "layer index out of range");
        Self(1 << layer)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn contains_layer(self, layer: u32) -> bool {
        layer < 32 && self.0 & (1 << layer) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn with_layer(self, layer: u32) -> Self {
        self | Self::layer(layer)
    }
}

impl Default for LayerMask {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for LayerMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LayerMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for LayerMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for LayerMask {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for LayerMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerMask({:#034b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let world = LayerMask::layer(0);
        let ui = LayerMask::layer(5);
        assert!(!world.intersects(ui));
        assert!((world | ui).intersects(ui));
        assert!(LayerMask::ALL.intersects(ui));
        assert!(!LayerMask::NONE.intersects(LayerMask::ALL));
    }

    #[test]
    fn test_contains_layer() {
        let mask = LayerMask::DEFAULT.with_layer(3);
        assert!(mask.contains_layer(0));
        assert!(mask.contains_layer(3));
        assert!(!mask.contains_layer(4));
        assert!(!mask.contains_layer(40));
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&LayerMask(6)).unwrap();
        assert_eq!(json, "6");
        let back: LayerMask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LayerMask(6));
    }
}
