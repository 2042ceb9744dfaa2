use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::memory::{CramMode, SpriteFramebuffer, VideoMemory};
use crate::registers::Registers;

/// Output raster geometry decoded from TVMD.
#[derive(Serialize, Deserialize, Default, Copy, Clone, PartialEq, Eq, Debug)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    /// Set for the 640/704-dot modes. Window x coordinates are always
    /// given in hi-res dot units, so normal modes halve them.
    pub hires: bool,
    /// Double-density interlace doubles the line count.
    pub interlace_double: bool,
}

impl Resolution {
    #[must_use]
    pub fn from_tvmd(tvmd: u16) -> Self {
        let width = match tvmd.get_bits(0..=1) {
            0 => 320,
            1 => 352,
            2 => 640,
            _ => 704,
        };
        let mut height = match tvmd.get_bits(4..=5) {
            0 => 224,
            1 => 240,
            _ => 256,
        };
        let interlace_double = tvmd.get_bits(6..=7) == 0b11;
        if interlace_double {
            height *= 2;
        }
        Self {
            width,
            height,
            hires: tvmd.get_bit(1),
            interlace_double,
        }
    }

    /// Sprite framebuffer pixels cover two output dots in hi-res modes.
    #[must_use]
    pub const fn sprite_x_shift(self) -> u32 {
        if self.hires { 1 } else { 0 }
    }
}

/// VDP1 state the compositor needs: the framebuffer being scanned out
/// and the mode register that describes its layout.
#[derive(Serialize, Deserialize, Default, Clone)]
pub struct Vdp1State {
    pub framebuffer: SpriteFramebuffer,
    /// TVMR: bit 0 selects an 8-bit framebuffer, bit 1 rotated read-out.
    pub tvmr: u16,
}

impl Vdp1State {
    #[must_use]
    pub fn eight_bit(&self) -> bool {
        self.tvmr.get_bit(0)
    }

    #[must_use]
    pub fn rotated_readout(&self) -> bool {
        self.tvmr.get_bit(1)
    }
}

/// Everything one frame render reads: an immutable capture of the
/// register file, both memories and the VDP1 side. The embedding
/// emulator builds one of these at its frame boundary; nothing in the
/// render path reaches for shared state.
#[derive(Serialize, Deserialize, Default, Clone)]
pub struct RegisterSnapshot {
    pub registers: Registers,
    pub memory: VideoMemory,
    pub vdp1: Vdp1State,
}

impl RegisterSnapshot {
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        Resolution::from_tvmd(self.registers.tvmd)
    }

    #[must_use]
    pub fn cram_mode(&self) -> CramMode {
        CramMode::from_ramctl(self.registers.ramctl)
    }

    /// Display enable; a blanked display composes only the back screen,
    /// or black when BDCLMD is clear too.
    #[must_use]
    pub fn display_enabled(&self) -> bool {
        self.registers.tvmd.get_bit(15)
    }
}
