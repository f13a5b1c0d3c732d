//! Model coordinates are integers in `0..=999` regardless of viewport size.

use crate::action::ScrollDirection;

pub const NORMALIZED_MAX: u32 = 999;

/// `floor(value / 1000 * extent)`, exact in integer arithmetic.
pub fn denormalize(value: u32, extent: u32) -> u32 {
    (u64::from(value) * u64::from(extent) / 1000) as u32
}

/// A viewport pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn x(&self, value: u32) -> u32 {
        denormalize(value, self.width)
    }

    pub fn y(&self, value: u32) -> u32 {
        denormalize(value, self.height)
    }

    pub fn point(&self, x: u32, y: u32) -> Pixel {
        Pixel {
            x: self.x(x),
            y: self.y(y),
        }
    }

    /// Scroll magnitude mapped along the axis the scroll travels.
    pub fn scroll_magnitude(&self, direction: ScrollDirection, magnitude: u32) -> u32 {
        if direction.is_vertical() {
            self.y(magnitude)
        } else {
            self.x(magnitude)
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(crate::types::SCREEN_WIDTH, crate::types::SCREEN_HEIGHT)
    }
}
