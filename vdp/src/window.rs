//! Window visibility tests.
//!
//! Two rectangular windows (W0/W1, optionally line-table driven) and the
//! sprite-derived window gate every layer per pixel. Each layer carries a
//! window-control byte:
//!
//! | bit  | meaning                          |
//! |------|----------------------------------|
//! | 0x01 | W0 polarity (set = show inside)  |
//! | 0x02 | W0 participates                  |
//! | 0x04 | W1 polarity                      |
//! | 0x08 | W1 participates                  |
//! | 0x10 | sprite window polarity           |
//! | 0x20 | sprite window participates       |
//! | 0x80 | combine with AND (else OR)       |

use crate::bitwise::Bits;
use crate::snapshot::{RegisterSnapshot, Resolution};

/// Per-pixel sprite window membership, produced while scanning the
/// sprite framebuffer and consumed by every layer's window test.
#[derive(Clone, Debug)]
pub struct SpriteWindowMask {
    width: u32,
    bits: Vec<bool>,
}

impl SpriteWindowMask {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            bits: vec![false; (width * height) as usize],
        }
    }

    pub fn set(&mut self, x: u32, y: u32) {
        self.bits[(y * self.width + x) as usize] = true;
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.width + x) as usize]
    }
}

/// One rectangular window with its per-scanline x ranges resolved
/// (constant or from the line table).
#[derive(Clone, Debug)]
struct RectWindow {
    /// Inclusive [start, end] x per scanline.
    lines: Vec<(i32, i32)>,
    y_start: i32,
    y_end: i32,
    /// The hardware quirk: an out-of-range vertical end keeps excluding
    /// the in-range columns of an outside-polarity window.
    y_overflow: bool,
}

impl RectWindow {
    /// Is (x, y) inside the window region?
    fn contains(&self, x: i32, y: i32) -> bool {
        if y < self.y_start || y > self.y_end {
            return false;
        }
        let (start, end) = self.lines[y as usize];
        x >= start && x <= end
    }

    fn in_columns(&self, x: i32, y: i32) -> bool {
        let (start, end) = self.lines[y as usize];
        x >= start && x <= end
    }

    /// Visibility of (x, y) under the given polarity.
    fn visible(&self, x: i32, y: i32, show_inside: bool) -> bool {
        if show_inside {
            self.contains(x, y)
        } else {
            if self.y_overflow && self.in_columns(x, y) {
                return false;
            }
            !self.contains(x, y)
        }
    }
}

/// Frame-wide window state: W0 and W1 geometry plus the sprite window
/// mask when any layer asked for it.
pub struct WindowSet {
    w0: RectWindow,
    w1: RectWindow,
    pub sprite_mask: Option<SpriteWindowMask>,
}

impl WindowSet {
    #[must_use]
    pub fn build(snapshot: &RegisterSnapshot, resolution: Resolution) -> Self {
        let regs = &snapshot.registers;
        let w0 = build_rect(
            snapshot,
            resolution,
            (regs.wpsx0, regs.wpsy0, regs.wpex0, regs.wpey0),
            regs.line_window_table(0),
        );
        let w1 = build_rect(
            snapshot,
            resolution,
            (regs.wpsx1, regs.wpsy1, regs.wpex1, regs.wpey1),
            regs.line_window_table(1),
        );
        Self {
            w0,
            w1,
            sprite_mask: None,
        }
    }

    /// Does any of the window-control bytes in use request sprite
    /// window participation?
    #[must_use]
    pub fn sprite_window_requested(snapshot: &RegisterSnapshot) -> bool {
        let regs = &snapshot.registers;
        [
            regs.wctla,
            regs.wctlb,
            regs.wctlc,
            regs.wctld,
        ]
        .iter()
        .any(|wctl| wctl & 0x2020 != 0)
    }

    /// The per-layer visibility test. Zero participating windows means
    /// visible; one window is authoritative; with several, bit 0x80
    /// demands all of them visible, otherwise any one suffices.
    #[must_use]
    pub fn visible(&self, wctl: u8, x: u32, y: u32) -> bool {
        let (x, y) = (x as i32, y as i32);
        let mut results: [Option<bool>; 3] = [None; 3];

        if wctl.get_bit(1) {
            results[0] = Some(self.w0.visible(x, y, wctl.get_bit(0)));
        }
        if wctl.get_bit(3) {
            results[1] = Some(self.w1.visible(x, y, wctl.get_bit(2)));
        }
        if wctl.get_bit(5) {
            if let Some(mask) = &self.sprite_mask {
                let inside = mask.get(x as u32, y as u32);
                results[2] = Some(if wctl.get_bit(4) { inside } else { !inside });
            }
        }

        if wctl.get_bit(7) {
            results.iter().flatten().all(|&v| v)
        } else {
            let mut any_participant = false;
            for &v in results.iter().flatten() {
                if v {
                    return true;
                }
                any_participant = true;
            }
            !any_participant
        }
    }
}

fn build_rect(
    snapshot: &RegisterSnapshot,
    resolution: Resolution,
    (sx, sy, ex, ey): (u16, u16, u16, u16),
    line_table: Option<u32>,
) -> RectWindow {
    // x coordinates are in hi-res dot units.
    let shift = if resolution.hires { 0 } else { 1 };
    let x_start = i32::from(sx & 0x3FF) >> shift;
    let x_end = i32::from(ex & 0x3FF) >> shift;
    let y_start = i32::from(sy & 0x1FF);
    let y_end = i32::from(ey & 0x1FF);

    let lines = (0..resolution.height)
        .map(|line| {
            line_table.map_or((x_start, x_end), |base| {
                let address = base + line * 4;
                let start = i32::from(snapshot.memory.vram_word(address) & 0x3FF) >> shift;
                let end = i32::from(snapshot.memory.vram_word(address + 2) & 0x3FF) >> shift;
                (start, end)
            })
        })
        .collect();

    RectWindow {
        lines,
        y_start,
        y_end,
        y_overflow: y_end >= resolution.height as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RegisterSnapshot;

    fn snapshot_with_windows() -> RegisterSnapshot {
        let mut snapshot = RegisterSnapshot::default();
        snapshot.registers.tvmd = 0x8000; // 320x224
        // W0 covers x 10..=19 (normal-res units are half the register value).
        snapshot.registers.wpsx0 = 20;
        snapshot.registers.wpex0 = 39;
        snapshot.registers.wpsy0 = 0;
        snapshot.registers.wpey0 = 223;
        // W1 covers x 15..=29.
        snapshot.registers.wpsx1 = 30;
        snapshot.registers.wpex1 = 59;
        snapshot.registers.wpsy1 = 0;
        snapshot.registers.wpey1 = 223;
        snapshot
    }

    fn windows() -> WindowSet {
        let snapshot = snapshot_with_windows();
        WindowSet::build(&snapshot, snapshot.resolution())
    }

    #[test]
    fn no_participation_is_visible() {
        let set = windows();
        assert!(set.visible(0x00, 0, 0));
        assert!(set.visible(0x01, 500, 100));
    }

    #[test]
    fn single_window_polarity() {
        let set = windows();
        // Show inside of W0.
        assert!(set.visible(0x03, 15, 5));
        assert!(!set.visible(0x03, 9, 5));
        // Show outside of W0.
        assert!(!set.visible(0x02, 15, 5));
        assert!(set.visible(0x02, 9, 5));
    }

    #[test]
    fn or_combines_any_visible() {
        let set = windows();
        // Inside-W0 or inside-W1: x=12 only W0, x=25 only W1, x=17 both.
        let wctl = 0x02 | 0x01 | 0x08 | 0x04;
        assert!(set.visible(wctl, 12, 5));
        assert!(set.visible(wctl, 25, 5));
        assert!(set.visible(wctl, 17, 5));
        assert!(!set.visible(wctl, 5, 5));
        assert!(!set.visible(wctl, 100, 5));
    }

    #[test]
    fn and_requires_all_visible() {
        let set = windows();
        let wctl = 0x80 | 0x02 | 0x01 | 0x08 | 0x04;
        // Only the overlap 15..=19 passes both inside tests.
        assert!(set.visible(wctl, 17, 5));
        assert!(!set.visible(wctl, 12, 5));
        assert!(!set.visible(wctl, 25, 5));
    }

    #[test]
    fn sprite_window_participates_via_mask() {
        let mut set = windows();
        let mut mask = SpriteWindowMask::new(320, 224);
        mask.set(100, 50);
        set.sprite_mask = Some(mask);

        // Show inside sprite window.
        assert!(set.visible(0x30, 100, 50));
        assert!(!set.visible(0x30, 101, 50));
        // Show outside.
        assert!(!set.visible(0x20, 100, 50));
        assert!(set.visible(0x20, 101, 50));
    }

    #[test]
    fn vertical_overflow_still_excludes_columns() {
        let mut snapshot = snapshot_with_windows();
        // yend beyond the 224-line screen.
        snapshot.registers.wpey0 = 400;
        let set = WindowSet::build(&snapshot, snapshot.resolution());

        // Outside-polarity W0: the x range stays excluded everywhere.
        assert!(!set.visible(0x02, 15, 5));
        assert!(set.visible(0x02, 9, 5));
    }

    #[test]
    fn line_table_overrides_rectangle() {
        let mut snapshot = snapshot_with_windows();
        snapshot.registers.lwta0u = 0x8000;
        snapshot.registers.lwta0l = 0x0100;
        // Table at VRAM 0x200; line 3 gets x 50..=59 (hi-res units 100..119).
        let base = 0x200 + 3 * 4;
        snapshot.memory.vram[base] = 0;
        snapshot.memory.vram[base + 1] = 100;
        snapshot.memory.vram[base + 2] = 0;
        snapshot.memory.vram[base + 3] = 119;
        let set = WindowSet::build(&snapshot, snapshot.resolution());

        assert!(set.visible(0x03, 55, 3));
        assert!(!set.visible(0x03, 15, 3));
        // Other lines read zeroed VRAM: range collapses to x = 0.
        assert!(set.visible(0x03, 0, 4));
        assert!(!set.visible(0x03, 55, 4));
    }
}
