//! Input Capture
//!
//! One frame of local input: an optional movement direction plus packed
//! action flags.

use serde::{Serialize, Deserialize};

use crate::game::grid::Direction;

/// Raw input state for a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Held movement direction, if any
    pub direction: Option<Direction>,

    /// Action flags (packed bits):
    /// - Bit 0: Place bomb this frame
    /// - Bit 1-7: Reserved
    pub flags: u8,
}

impl InputFrame {
    /// Place-bomb flag bit
    pub const FLAG_PLACE_BOMB: u8 = 0x01;

    /// Create a new empty input frame.
    pub const fn new() -> Self {
        Self {
            direction: None,
            flags: 0,
        }
    }

    /// Create input with movement direction.
    pub const fn with_movement(direction: Direction) -> Self {
        Self {
            direction: Some(direction),
            flags: 0,
        }
    }

    /// Create input that only places a bomb.
    pub const fn place_bomb() -> Self {
        Self {
            direction: None,
            flags: Self::FLAG_PLACE_BOMB,
        }
    }

    /// Check if a bomb should be placed this frame.
    #[inline]
    pub fn bomb_pressed(&self) -> bool {
        self.flags & Self::FLAG_PLACE_BOMB != 0
    }

    /// Check if this is an idle frame (no input).
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.direction.is_none() && self.flags == 0
    }

    /// Set place-bomb flag.
    #[inline]
    pub fn set_place_bomb(&mut self, pressed: bool) {
        if pressed {
            self.flags |= Self::FLAG_PLACE_BOMB;
        } else {
            self.flags &= !Self::FLAG_PLACE_BOMB;
        }
    }
}
