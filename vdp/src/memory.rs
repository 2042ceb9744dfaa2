use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::color::Color;

/// CRAM color data layout, from RAMCTL bits 12-13.
#[derive(Serialize, Deserialize, Default, Copy, Clone, PartialEq, Eq, Debug)]
pub enum CramMode {
    /// 1024 colors, RGB555 words, data mirrored in the upper half.
    #[default]
    Rgb555Mirrored = 0,
    /// 2048 colors, RGB555 words.
    Rgb555 = 1,
    /// 1024 colors, RGB888 longs.
    Rgb888 = 2,
}

impl CramMode {
    #[must_use]
    pub fn from_ramctl(ramctl: u16) -> Self {
        match (ramctl >> 12) & 0x3 {
            0 => Self::Rgb555Mirrored,
            1 => Self::Rgb555,
            // 3 is reserved; hardware behaves like mode 2.
            _ => Self::Rgb888,
        }
    }
}

/// VDP2 video memory: 512 KiB VRAM + 4 KiB color RAM.
///
/// All multi-byte accessors are big-endian, the byte order the bus
/// presents, and wrap at the address-space size rather than erroring.
#[serde_as]
#[derive(Serialize, Deserialize, Clone)]
pub struct VideoMemory {
    #[serde_as(as = "Box<[_; 0x80000]>")]
    pub vram: Box<[u8; 0x80000]>,
    #[serde_as(as = "Box<[_; 0x1000]>")]
    pub cram: Box<[u8; 0x1000]>,
}

impl Default for VideoMemory {
    fn default() -> Self {
        Self {
            vram: vec![0; 0x80000].into_boxed_slice().try_into().unwrap(),
            cram: vec![0; 0x1000].into_boxed_slice().try_into().unwrap(),
        }
    }
}

impl VideoMemory {
    #[must_use]
    pub fn vram_byte(&self, address: u32) -> u8 {
        self.vram[(address & 0x7_FFFF) as usize]
    }

    #[must_use]
    pub fn vram_word(&self, address: u32) -> u16 {
        u16::from(self.vram_byte(address)) << 8 | u16::from(self.vram_byte(address + 1))
    }

    #[must_use]
    pub fn vram_long(&self, address: u32) -> u32 {
        u32::from(self.vram_word(address)) << 16 | u32::from(self.vram_word(address + 2))
    }

    fn cram_word(&self, address: u32) -> u16 {
        let address = (address & 0xFFF) as usize;
        u16::from(self.cram[address]) << 8 | u16::from(self.cram[address | 1])
    }

    /// Looks up a CRAM entry. Returns the expanded color and the entry's
    /// MSB, which feeds special color calculation mode 3.
    #[must_use]
    pub fn cram_color(&self, mode: CramMode, index: u32) -> (Color, bool) {
        match mode {
            CramMode::Rgb555Mirrored => {
                let word = self.cram_word((index << 1) & 0x7FF);
                (Color::from_rgb555(word), word & 0x8000 != 0)
            }
            CramMode::Rgb555 => {
                let word = self.cram_word(index << 1);
                (Color::from_rgb555(word), word & 0x8000 != 0)
            }
            CramMode::Rgb888 => {
                let address = index << 2;
                let upper = self.cram_word(address);
                let lower = self.cram_word(address + 2);
                let value = u32::from(upper & 0xFF) << 16 | u32::from(lower);
                (Color::from_rgb888(value), upper & 0x8000 != 0)
            }
        }
    }
}

/// The VDP1 framebuffer currently scanned out, owned by the caller and
/// handed over per frame. 256 KiB, the size of one draw buffer.
#[serde_as]
#[derive(Serialize, Deserialize, Clone)]
pub struct SpriteFramebuffer {
    #[serde_as(as = "Box<[_; 0x40000]>")]
    pub data: Box<[u8; 0x40000]>,
}

impl Default for SpriteFramebuffer {
    fn default() -> Self {
        Self {
            data: vec![0; 0x40000].into_boxed_slice().try_into().unwrap(),
        }
    }
}

impl SpriteFramebuffer {
    /// 16-bit pixel at framebuffer coordinates; rows are 512 words.
    #[must_use]
    pub fn word_pixel(&self, x: u32, y: u32) -> u16 {
        let address = ((y * 512 + x) * 2 & 0x3_FFFF) as usize;
        u16::from(self.data[address]) << 8 | u16::from(self.data[address | 1])
    }

    /// 8-bit pixel at framebuffer coordinates. The byte-deep layouts
    /// are 1024x256, or 512x512 under rotated read-out.
    #[must_use]
    pub fn byte_pixel(&self, x: u32, y: u32, rotated: bool) -> u8 {
        let offset = if rotated {
            (y & 511) * 512 + (x & 511)
        } else {
            (y & 255) * 1024 + (x & 1023)
        };
        self.data[offset as usize]
    }
}
