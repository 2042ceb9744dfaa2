//! The priority compositor, last stage of the frame pipeline.
//!
//! Every layer submits pixel candidates into an 8-deep priority buffer
//! through `put_pixel`; the resolve pass then walks each pixel's slots
//! from priority 7 down, applies the frame's blend mode and shadow
//! marks, and emits RGBA. Submissions at the same slot overwrite, so
//! the accumulate order (NBG3 first, up through RBG0, sprite last)
//! decides equal-priority ties in the sprite layer's favor.

use crate::bitwise::Bits;
use crate::color::Color;
use crate::error::RenderError;

/// Frame-wide color calculation mode, CCCTL bits 8-9.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BlendMode {
    /// Ratio blend between the topmost pixel and what is beneath it.
    Top,
    /// Saturating add of the topmost pixel onto what is beneath it.
    Add,
    /// The topmost pixel blends by the ratio the pixel beneath advertises.
    Bottom,
}

impl BlendMode {
    #[must_use]
    pub fn from_ccctl(ccctl: u16) -> Self {
        if ccctl.get_bit(8) {
            Self::Add
        } else if ccctl.get_bit(9) {
            Self::Bottom
        } else {
            Self::Top
        }
    }
}

/// One layer-submitted pixel candidate.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Pixel {
    pub color: Color,
    /// Blend ratio, 0..=0x3F; 0x3F means opaque (no color calculation).
    pub alpha: u8,
    /// The pixel offers its ratio to the layer above it (bottom-mode
    /// color calculation reads it from here).
    pub advertises_ratio: bool,
    /// Line color screen slot used as this pixel's blend partner,
    /// 0 = the pixel beneath.
    pub line_screen: u8,
}

impl Pixel {
    #[must_use]
    pub const fn opaque(color: Color) -> Self {
        Self {
            color,
            alpha: 0x3F,
            advertises_ratio: false,
            line_screen: 0,
        }
    }
}

const PRESENT: u8 = 0x1;
const ADVERTISES: u8 = 0x2;
const SHADOW: u8 = 0x4;

#[derive(Copy, Clone, Default)]
struct Slot {
    color: Color,
    alpha: u8,
    flags: u8,
    line_screen: u8,
}

/// Number of line color screen slots: slot 1 is the plain line screen,
/// 2 and 3 the per-rotation-parameter line colors.
pub const LINE_SCREEN_SLOTS: usize = 4;

pub struct PriorityCompositor {
    width: u32,
    height: u32,
    blend: BlendMode,
    slots: Vec<[Slot; 8]>,
    back: Vec<Color>,
    line_screens: Vec<[Color; LINE_SCREEN_SLOTS]>,
}

/// Fallible counterpart of `vec![value; len]` for the frame buffers.
fn filled<T: Copy>(len: usize, value: T) -> Result<Vec<T>, RenderError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| RenderError::BufferAllocation {
            bytes: len * std::mem::size_of::<T>(),
        })?;
    buffer.resize(len, value);
    Ok(buffer)
}

impl PriorityCompositor {
    /// Allocates the priority buffer for one frame. Allocation failure
    /// is the one fatal error in the pipeline.
    pub fn new(width: u32, height: u32, blend: BlendMode) -> Result<Self, RenderError> {
        let pixels = (width * height) as usize;
        let lines = height as usize;

        Ok(Self {
            width,
            height,
            blend,
            slots: filled(pixels, [Slot::default(); 8])?,
            back: filled(lines, Color::default())?,
            line_screens: filled(lines, [Color::default(); LINE_SCREEN_SLOTS])?,
        })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Back screen color for one scanline, the priority-0 base.
    pub fn set_back_line(&mut self, y: u32, color: Color) {
        self.back[y as usize] = color;
    }

    pub fn set_line_screen(&mut self, slot: usize, y: u32, color: Color) {
        self.line_screens[y as usize][slot] = color;
    }

    /// Submits a candidate. Priority 0 is transparent by definition and
    /// never drawn; a later submission at the same slot overwrites.
    pub fn put_pixel(&mut self, priority: u8, x: u32, y: u32, pixel: Pixel) {
        debug_assert!(priority < 8 && x < self.width && y < self.height);
        if priority == 0 {
            return;
        }
        let slot = &mut self.slots[(y * self.width + x) as usize][priority as usize];
        let shadow = slot.flags & SHADOW;
        *slot = Slot {
            color: pixel.color,
            alpha: pixel.alpha,
            flags: PRESENT | shadow | if pixel.advertises_ratio { ADVERTISES } else { 0 },
            line_screen: pixel.line_screen,
        };
    }

    /// Marks a shadow at a priority slot: whatever resolves beneath it
    /// comes out at half intensity.
    pub fn put_shadow(&mut self, priority: u8, x: u32, y: u32) {
        debug_assert!(priority < 8 && x < self.width && y < self.height);
        if priority == 0 {
            return;
        }
        self.slots[(y * self.width + x) as usize][priority as usize].flags |= SHADOW;
    }

    /// Resolves every pixel top-down and writes RGBA8888 into `frame`,
    /// which must hold `width * height` entries.
    pub fn resolve_into(&self, frame: &mut [u32]) {
        debug_assert_eq!(frame.len(), self.slots.len());
        for y in 0..self.height {
            let row = (y * self.width) as usize;
            let back = self.back[y as usize];
            let line_screens = &self.line_screens[y as usize];
            for x in 0..self.width {
                frame[row + x as usize] =
                    self.resolve_pixel(&self.slots[row + x as usize], back, line_screens);
            }
        }
    }

    fn resolve_pixel(&self, slots: &[Slot; 8], back: Color, line_screens: &[Color; 4]) -> u32 {
        let mut shadow = false;
        let mut top: Option<&Slot> = None;
        let mut below = back;
        let mut below_slot: Option<&Slot> = None;

        for slot in slots.iter().rev() {
            if slot.flags & PRESENT == 0 {
                if slot.flags & SHADOW != 0 && top.is_none() {
                    shadow = true;
                }
                continue;
            }
            if top.is_none() {
                shadow |= slot.flags & SHADOW != 0;
                top = Some(slot);
            } else {
                below = slot.color;
                below_slot = Some(slot);
                break;
            }
        }

        let Some(top) = top else {
            let color = if shadow { back.halve() } else { back };
            return color.to_rgba8888();
        };

        let partner = if top.line_screen != 0 {
            line_screens[usize::from(top.line_screen) & 0x3]
        } else {
            below
        };

        let mut out = match self.blend {
            BlendMode::Top => {
                if top.alpha < 0x3F {
                    top.color.blend(partner, top.alpha)
                } else {
                    top.color
                }
            }
            BlendMode::Add => {
                if top.alpha < 0x3F {
                    top.color.saturating_add(partner)
                } else {
                    top.color
                }
            }
            BlendMode::Bottom => {
                if top.alpha < 0x3F {
                    let ratio = below_slot
                        .filter(|slot| slot.flags & ADVERTISES != 0)
                        .map_or(0x3F, |slot| slot.alpha);
                    if ratio < 0x3F {
                        top.color.blend(partner, ratio)
                    } else {
                        top.color
                    }
                } else {
                    top.color
                }
            }
        };

        if shadow {
            out = out.halve();
        }
        out.to_rgba8888()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compositor(blend: BlendMode) -> PriorityCompositor {
        PriorityCompositor::new(8, 4, blend).unwrap()
    }

    fn rgba(color: Color) -> u32 {
        color.to_rgba8888()
    }

    #[test]
    fn back_screen_shows_through() {
        let mut c = compositor(BlendMode::Top);
        c.set_back_line(2, Color::rgb(10, 20, 30));
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[2 * 8 + 5], rgba(Color::rgb(10, 20, 30)));
        assert_eq!(frame[0], rgba(Color::rgb(0, 0, 0)));
    }

    #[test]
    fn priority_zero_is_never_drawn() {
        let mut c = compositor(BlendMode::Top);
        c.set_back_line(0, Color::rgb(1, 2, 3));
        c.put_pixel(0, 1, 0, Pixel::opaque(Color::rgb(255, 0, 0)));
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[1], rgba(Color::rgb(1, 2, 3)));
    }

    #[test]
    fn higher_priority_wins_regardless_of_order() {
        let mut c = compositor(BlendMode::Top);
        c.put_pixel(5, 3, 1, Pixel::opaque(Color::rgb(0, 255, 0)));
        c.put_pixel(2, 3, 1, Pixel::opaque(Color::rgb(255, 0, 0)));
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[8 + 3], rgba(Color::rgb(0, 255, 0)));

        let mut c = compositor(BlendMode::Top);
        c.put_pixel(2, 3, 1, Pixel::opaque(Color::rgb(255, 0, 0)));
        c.put_pixel(5, 3, 1, Pixel::opaque(Color::rgb(0, 255, 0)));
        let mut frame2 = vec![0; 32];
        c.resolve_into(&mut frame2);
        assert_eq!(frame, frame2);
    }

    #[test]
    fn equal_priority_later_put_overwrites() {
        let mut c = compositor(BlendMode::Top);
        c.put_pixel(3, 0, 0, Pixel::opaque(Color::rgb(255, 0, 0)));
        c.put_pixel(3, 0, 0, Pixel::opaque(Color::rgb(0, 0, 255)));
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[0], rgba(Color::rgb(0, 0, 255)));
    }

    #[test]
    fn top_blend_mixes_with_pixel_beneath() {
        let mut c = compositor(BlendMode::Top);
        c.put_pixel(2, 0, 0, Pixel::opaque(Color::rgb(0, 0, 0)));
        c.put_pixel(
            5,
            0,
            0,
            Pixel {
                color: Color::rgb(255, 255, 255),
                alpha: 0x1F,
                advertises_ratio: false,
                line_screen: 0,
            },
        );
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[0], rgba(Color::rgb(127, 127, 127)));
    }

    #[test]
    fn opaque_top_blend_is_unchanged() {
        let mut c = compositor(BlendMode::Top);
        c.set_back_line(0, Color::rgb(40, 40, 40));
        c.put_pixel(4, 2, 0, Pixel::opaque(Color::rgb(9, 8, 7)));
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[2], rgba(Color::rgb(9, 8, 7)));
    }

    #[test]
    fn additive_mode_adds_partner() {
        let mut c = compositor(BlendMode::Add);
        c.put_pixel(2, 0, 0, Pixel::opaque(Color::rgb(100, 100, 100)));
        c.put_pixel(
            5,
            0,
            0,
            Pixel {
                color: Color::rgb(200, 10, 0),
                alpha: 0x20,
                advertises_ratio: false,
                line_screen: 0,
            },
        );
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[0], rgba(Color::rgb(255, 110, 100)));
    }

    #[test]
    fn bottom_mode_uses_advertised_ratio() {
        let mut c = compositor(BlendMode::Bottom);
        c.put_pixel(
            2,
            0,
            0,
            Pixel {
                color: Color::rgb(0, 0, 0),
                alpha: 0x1F,
                advertises_ratio: true,
                line_screen: 0,
            },
        );
        c.put_pixel(
            5,
            0,
            0,
            Pixel {
                color: Color::rgb(255, 255, 255),
                alpha: 0,
                advertises_ratio: false,
                line_screen: 0,
            },
        );
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[0], rgba(Color::rgb(127, 127, 127)));
    }

    #[test]
    fn shadow_halves_what_is_beneath() {
        let mut c = compositor(BlendMode::Top);
        c.put_pixel(2, 1, 0, Pixel::opaque(Color::rgb(200, 100, 50)));
        c.put_shadow(6, 1, 0);
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[1], rgba(Color::rgb(100, 50, 25)));
    }

    #[test]
    fn shadow_on_back_screen() {
        let mut c = compositor(BlendMode::Top);
        c.set_back_line(0, Color::rgb(80, 80, 80));
        c.put_shadow(3, 4, 0);
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        assert_eq!(frame[4], rgba(Color::rgb(40, 40, 40)));
    }

    #[test]
    fn line_screen_replaces_blend_partner() {
        let mut c = compositor(BlendMode::Top);
        c.set_line_screen(1, 0, Color::rgb(0, 200, 0));
        c.put_pixel(2, 0, 0, Pixel::opaque(Color::rgb(200, 0, 0)));
        c.put_pixel(
            5,
            0,
            0,
            Pixel {
                color: Color::rgb(0, 0, 0),
                alpha: 0x1F,
                advertises_ratio: false,
                line_screen: 1,
            },
        );
        let mut frame = vec![0; 32];
        c.resolve_into(&mut frame);
        // Blends with the line screen, not the red pixel beneath.
        assert_eq!(frame[0], rgba(Color::rgb(0, 100, 0)));
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut c = compositor(BlendMode::Top);
        c.put_pixel(3, 2, 2, Pixel::opaque(Color::rgb(12, 34, 56)));
        let mut a = vec![0; 32];
        let mut b = vec![0; 32];
        c.resolve_into(&mut a);
        c.resolve_into(&mut b);
        assert_eq!(a, b);
    }
}
