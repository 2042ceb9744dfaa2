use serde::{Deserialize, Serialize};

/// The VDP2 external register file.
///
/// One `u16` field per register, named after the hardware mnemonic.
/// Offsets below are relative to the register base (`0x25F8_0000` on
/// the bus); `load_word`/`read_word` speak that offset space so a CPU
/// core can deposit words byte-exactly.
///
/// | offset      | register        | purpose                               |
/// |-------------|-----------------|---------------------------------------|
/// | 0x000       | TVMD            | screen mode, resolution, display on   |
/// | 0x006       | VRSIZE          | VRAM size (bit 15 widens tile addrs)  |
/// | 0x00E       | RAMCTL          | CRAM mode (bits 12-13)                |
/// | 0x010-0x01E | CYCA0L..CYCB1U  | VRAM access cycle patterns            |
/// | 0x020       | BGON            | layer enables + transparency disable  |
/// | 0x022       | MZCTL           | mosaic enable + cell size             |
/// | 0x024-0x026 | SFSEL, SFCODE   | special function select / color codes |
/// | 0x028-0x02E | CHCTLA..BMPNB   | character size, color depth, bitmaps  |
/// | 0x030-0x038 | PNCN0..PNCR     | pattern name control                  |
/// | 0x03A-0x03E | PLSZ, MPOFN/R   | plane sizes, map offsets              |
/// | 0x040-0x06E | MPABN0..MPOPRB  | map plane registers                   |
/// | 0x070-0x096 | SCXIN0..SCYN3   | scroll positions                      |
/// | 0x078-0x08E | ZMXIN0..ZMYDN1  | zoom (coordinate increments)          |
/// | 0x098-0x09A | ZMCTL, SCRCTL   | zoom reduction, line/cell scroll      |
/// | 0x09C-0x0AE | VCSTA..BKTAL    | scroll/line/back table addresses      |
/// | 0x0B0-0x0BE | RPMD..RPTAL     | rotation parameter control            |
/// | 0x0C0-0x0DE | WPSX0..LWTA1L   | windows                               |
/// | 0x0E0-0x0E2 | SPCTL, SDCTL    | sprite data decode, shadow control    |
/// | 0x0E4-0x0E6 | CRAOFA, CRAOFB  | color RAM address offsets             |
/// | 0x0E8-0x0EE | LNCLEN..SFCCMD  | line screen, special priority/cc      |
/// | 0x0F0-0x10E | PRISA..CCRLB    | priorities and color-calc ratios      |
/// | 0x110-0x11E | CLOFEN..COBB    | color offset                          |
#[allow(clippy::struct_field_names)]
#[derive(Serialize, Deserialize, Default, Clone, PartialEq, Eq, Debug)]
pub struct Registers {
    /// TV screen mode: display enable, border color mode, interlace, resolution.
    pub tvmd: u16,
    /// External signal enable.
    pub exten: u16,
    /// Screen status (read-only on hardware).
    pub tvstat: u16,
    /// VRAM size; bit 15 extends character address decoding.
    pub vrsize: u16,
    /// H counter.
    pub hcnt: u16,
    /// V counter.
    pub vcnt: u16,
    /// RAM control: CRAM mode in bits 12-13, VRAM partitioning below.
    pub ramctl: u16,
    /// VRAM cycle pattern, bank A0 timing slots T0-T3.
    pub cyca0l: u16,
    /// VRAM cycle pattern, bank A0 timing slots T4-T7.
    pub cyca0u: u16,
    pub cyca1l: u16,
    pub cyca1u: u16,
    pub cycb0l: u16,
    pub cycb0u: u16,
    pub cycb1l: u16,
    pub cycb1u: u16,
    /// Screen enables: bits 0-5 NBG0-3/RBG0/RBG1, bits 8-12 transparency disable.
    pub bgon: u16,
    /// Mosaic: bits 0-4 per-layer enable, bits 8-11 x size, 12-15 y size.
    pub mzctl: u16,
    /// Special function code select.
    pub sfsel: u16,
    /// Special function color codes (per-dot priority/color-calc matching).
    pub sfcode: u16,
    /// Character control NBG0/NBG1: color depth, character size, bitmap enable.
    pub chctla: u16,
    /// Character control NBG2/NBG3/RBG0.
    pub chctlb: u16,
    /// Bitmap palette number NBG0/NBG1.
    pub bmpna: u16,
    /// Bitmap palette number RBG0.
    pub bmpnb: u16,
    /// Pattern name control NBG0: data size, supplement bits, aux mode.
    pub pncn0: u16,
    pub pncn1: u16,
    pub pncn2: u16,
    pub pncn3: u16,
    /// Pattern name control RBG0.
    pub pncr: u16,
    /// Plane size for every layer (2 bits each) + rotation screen-over.
    pub plsz: u16,
    /// Map offset (bits 6-8 of plane addresses) for the normal layers.
    pub mpofn: u16,
    /// Map offset for the rotation layers.
    pub mpofr: u16,
    pub mpabn0: u16,
    pub mpcdn0: u16,
    pub mpabn1: u16,
    pub mpcdn1: u16,
    pub mpabn2: u16,
    pub mpcdn2: u16,
    pub mpabn3: u16,
    pub mpcdn3: u16,
    /// Rotation parameter A map planes, 16 planes across 8 registers.
    pub mpabra: u16,
    pub mpcdra: u16,
    pub mpefra: u16,
    pub mpghra: u16,
    pub mpijra: u16,
    pub mpklra: u16,
    pub mpmnra: u16,
    pub mpopra: u16,
    pub mpabrb: u16,
    pub mpcdrb: u16,
    pub mpefrb: u16,
    pub mpghrb: u16,
    pub mpijrb: u16,
    pub mpklrb: u16,
    pub mpmnrb: u16,
    pub mpoprb: u16,
    /// NBG0 horizontal scroll, integer part (11 bits).
    pub scxin0: u16,
    /// NBG0 horizontal scroll, fractional part (upper byte).
    pub scxdn0: u16,
    pub scyin0: u16,
    pub scydn0: u16,
    /// NBG0 horizontal coordinate increment, integer part (3 bits).
    pub zmxin0: u16,
    /// NBG0 horizontal coordinate increment, fraction (upper byte).
    pub zmxdn0: u16,
    pub zmyin0: u16,
    pub zmydn0: u16,
    pub scxin1: u16,
    pub scxdn1: u16,
    pub scyin1: u16,
    pub scydn1: u16,
    pub zmxin1: u16,
    pub zmxdn1: u16,
    pub zmyin1: u16,
    pub zmydn1: u16,
    /// NBG2 horizontal scroll (integer only).
    pub scxn2: u16,
    pub scyn2: u16,
    pub scxn3: u16,
    pub scyn3: u16,
    /// Zoom reduction enable.
    pub zmctl: u16,
    /// Line/vertical-cell scroll control for NBG0 (low byte) and NBG1 (high byte).
    pub scrctl: u16,
    /// Vertical cell scroll table address, upper word.
    pub vcstau: u16,
    pub vcstal: u16,
    /// NBG0 line scroll table address, upper word.
    pub lsta0u: u16,
    pub lsta0l: u16,
    pub lsta1u: u16,
    pub lsta1l: u16,
    /// Line color screen table address.
    pub lctau: u16,
    pub lctal: u16,
    /// Back screen table address; bit 15 of the upper word selects per-line mode.
    pub bktau: u16,
    pub bktal: u16,
    /// Rotation parameter mode (0-3).
    pub rpmd: u16,
    /// Rotation parameter read control.
    pub rprctl: u16,
    /// Coefficient table control, parameter A low byte / B high byte.
    pub ktctl: u16,
    /// Coefficient table address offset, parameter A low byte / B high byte.
    pub ktaof: u16,
    /// Screen-over pattern name, parameter A.
    pub ovpnra: u16,
    /// Screen-over pattern name, parameter B.
    pub ovpnrb: u16,
    /// Rotation parameter table address, upper word.
    pub rptau: u16,
    pub rptal: u16,
    /// Window 0 start x (hi-res dot units).
    pub wpsx0: u16,
    pub wpsy0: u16,
    pub wpex0: u16,
    pub wpey0: u16,
    pub wpsx1: u16,
    pub wpsy1: u16,
    pub wpex1: u16,
    pub wpey1: u16,
    /// Window control NBG0 (low byte) / NBG1 (high byte).
    pub wctla: u16,
    /// Window control NBG2 / NBG3.
    pub wctlb: u16,
    /// Window control RBG0 / sprite.
    pub wctlc: u16,
    /// Window control rotation-parameter select / color calculation.
    pub wctld: u16,
    /// Window 0 line table address, upper word (bit 15 enables the table).
    pub lwta0u: u16,
    pub lwta0l: u16,
    pub lwta1u: u16,
    pub lwta1l: u16,
    /// Sprite control: type 0-15, color mode, sprite window, color-calc condition.
    pub spctl: u16,
    /// Shadow control: bit 8 enables transparent (normal) shadows.
    pub sdctl: u16,
    /// Color RAM address offset NBG0-3 (3 bits per layer).
    pub craofa: u16,
    /// Color RAM address offset RBG0 (bits 0-2) / sprite (bits 4-6).
    pub craofb: u16,
    /// Line color screen enable per layer.
    pub lnclen: u16,
    /// Special priority mode per layer (2 bits each).
    pub sfprmd: u16,
    /// Color calculation control: per-layer enable + mode bits 8-9.
    pub ccctl: u16,
    /// Special color calculation mode per layer (2 bits each).
    pub sfccmd: u16,
    /// Sprite priority 0-1.
    pub prisa: u16,
    pub prisb: u16,
    pub prisc: u16,
    pub prisd: u16,
    /// NBG0 (low byte) / NBG1 (high byte) priority.
    pub prina: u16,
    /// NBG2 / NBG3 priority.
    pub prinb: u16,
    /// RBG0 priority.
    pub prir: u16,
    /// Sprite color-calc ratios 0-1.
    pub ccrsa: u16,
    pub ccrsb: u16,
    pub ccrsc: u16,
    pub ccrsd: u16,
    /// NBG0 / NBG1 color-calc ratio.
    pub ccrna: u16,
    /// NBG2 / NBG3 color-calc ratio.
    pub ccrnb: u16,
    /// RBG0 color-calc ratio.
    pub ccrr: u16,
    /// Line/back screen color-calc ratio.
    pub ccrlb: u16,
    /// Color offset enable per layer.
    pub clofen: u16,
    /// Color offset bank select per layer (0 = A, 1 = B).
    pub clofsl: u16,
    /// Color offset A, red (9-bit signed).
    pub coar: u16,
    pub coag: u16,
    pub coab: u16,
    pub cobr: u16,
    pub cobg: u16,
    pub cobb: u16,
}

/// Generates the external-offset accessors from one offset/field list.
macro_rules! register_offsets {
    ($($offset:literal => $field:ident,)+) => {
        impl Registers {
            fn field(&self, offset: u32) -> Option<u16> {
                match offset {
                    $($offset => Some(self.$field),)+
                    _ => None,
                }
            }

            fn field_mut(&mut self, offset: u32) -> Option<&mut u16> {
                match offset {
                    $($offset => Some(&mut self.$field),)+
                    _ => None,
                }
            }
        }
    };
}

register_offsets! {
    0x000 => tvmd,
    0x002 => exten,
    0x004 => tvstat,
    0x006 => vrsize,
    0x008 => hcnt,
    0x00A => vcnt,
    0x00E => ramctl,
    0x010 => cyca0l,
    0x012 => cyca0u,
    0x014 => cyca1l,
    0x016 => cyca1u,
    0x018 => cycb0l,
    0x01A => cycb0u,
    0x01C => cycb1l,
    0x01E => cycb1u,
    0x020 => bgon,
    0x022 => mzctl,
    0x024 => sfsel,
    0x026 => sfcode,
    0x028 => chctla,
    0x02A => chctlb,
    0x02C => bmpna,
    0x02E => bmpnb,
    0x030 => pncn0,
    0x032 => pncn1,
    0x034 => pncn2,
    0x036 => pncn3,
    0x038 => pncr,
    0x03A => plsz,
    0x03C => mpofn,
    0x03E => mpofr,
    0x040 => mpabn0,
    0x042 => mpcdn0,
    0x044 => mpabn1,
    0x046 => mpcdn1,
    0x048 => mpabn2,
    0x04A => mpcdn2,
    0x04C => mpabn3,
    0x04E => mpcdn3,
    0x050 => mpabra,
    0x052 => mpcdra,
    0x054 => mpefra,
    0x056 => mpghra,
    0x058 => mpijra,
    0x05A => mpklra,
    0x05C => mpmnra,
    0x05E => mpopra,
    0x060 => mpabrb,
    0x062 => mpcdrb,
    0x064 => mpefrb,
    0x066 => mpghrb,
    0x068 => mpijrb,
    0x06A => mpklrb,
    0x06C => mpmnrb,
    0x06E => mpoprb,
    0x070 => scxin0,
    0x072 => scxdn0,
    0x074 => scyin0,
    0x076 => scydn0,
    0x078 => zmxin0,
    0x07A => zmxdn0,
    0x07C => zmyin0,
    0x07E => zmydn0,
    0x080 => scxin1,
    0x082 => scxdn1,
    0x084 => scyin1,
    0x086 => scydn1,
    0x088 => zmxin1,
    0x08A => zmxdn1,
    0x08C => zmyin1,
    0x08E => zmydn1,
    0x090 => scxn2,
    0x092 => scyn2,
    0x094 => scxn3,
    0x096 => scyn3,
    0x098 => zmctl,
    0x09A => scrctl,
    0x09C => vcstau,
    0x09E => vcstal,
    0x0A0 => lsta0u,
    0x0A2 => lsta0l,
    0x0A4 => lsta1u,
    0x0A6 => lsta1l,
    0x0A8 => lctau,
    0x0AA => lctal,
    0x0AC => bktau,
    0x0AE => bktal,
    0x0B0 => rpmd,
    0x0B2 => rprctl,
    0x0B4 => ktctl,
    0x0B6 => ktaof,
    0x0B8 => ovpnra,
    0x0BA => ovpnrb,
    0x0BC => rptau,
    0x0BE => rptal,
    0x0C0 => wpsx0,
    0x0C2 => wpsy0,
    0x0C4 => wpex0,
    0x0C6 => wpey0,
    0x0C8 => wpsx1,
    0x0CA => wpsy1,
    0x0CC => wpex1,
    0x0CE => wpey1,
    0x0D0 => wctla,
    0x0D2 => wctlb,
    0x0D4 => wctlc,
    0x0D6 => wctld,
    0x0D8 => lwta0u,
    0x0DA => lwta0l,
    0x0DC => lwta1u,
    0x0DE => lwta1l,
    0x0E0 => spctl,
    0x0E2 => sdctl,
    0x0E4 => craofa,
    0x0E6 => craofb,
    0x0E8 => lnclen,
    0x0EA => sfprmd,
    0x0EC => ccctl,
    0x0EE => sfccmd,
    0x0F0 => prisa,
    0x0F2 => prisb,
    0x0F4 => prisc,
    0x0F6 => prisd,
    0x0F8 => prina,
    0x0FA => prinb,
    0x0FC => prir,
    0x100 => ccrsa,
    0x102 => ccrsb,
    0x104 => ccrsc,
    0x106 => ccrsd,
    0x108 => ccrna,
    0x10A => ccrnb,
    0x10C => ccrr,
    0x10E => ccrlb,
    0x110 => clofen,
    0x112 => clofsl,
    0x114 => coar,
    0x116 => coag,
    0x118 => coab,
    0x11A => cobr,
    0x11C => cobg,
    0x11E => cobb,
}

impl Registers {
    /// Stores a register word at its external offset. Writes to
    /// unmapped offsets are dropped with a warning.
    pub fn load_word(&mut self, offset: u32, value: u16) {
        match self.field_mut(offset) {
            Some(field) => *field = value,
            None => tracing::warn!("word write to unmapped register offset {offset:#05X}"),
        }
    }

    /// Reads back a register word; unmapped offsets return 0.
    #[must_use]
    pub fn read_word(&self, offset: u32) -> u16 {
        self.field(offset).unwrap_or(0)
    }

    /// 19-bit VRAM address of the vertical cell scroll table.
    #[must_use]
    pub fn vertical_cell_scroll_table(&self) -> u32 {
        table_address(self.vcstau, self.vcstal)
    }

    /// Line scroll table address for NBG0 (`which = 0`) or NBG1.
    #[must_use]
    pub fn line_scroll_table(&self, which: usize) -> u32 {
        if which == 0 {
            table_address(self.lsta0u, self.lsta0l)
        } else {
            table_address(self.lsta1u, self.lsta1l)
        }
    }

    /// Line color screen table address.
    #[must_use]
    pub fn line_color_table(&self) -> u32 {
        table_address(self.lctau, self.lctal)
    }

    /// Back screen table address.
    #[must_use]
    pub fn back_screen_table(&self) -> u32 {
        table_address(self.bktau, self.bktal)
    }

    /// Rotation parameter table base (set A; set B lives 0x80 past it).
    #[must_use]
    pub fn rotation_table_address(&self) -> u32 {
        table_address(self.rptau, self.rptal)
    }

    /// Line window table address for window 0 or 1, if the table is enabled.
    #[must_use]
    pub fn line_window_table(&self, which: usize) -> Option<u32> {
        let (upper, lower) = if which == 0 {
            (self.lwta0u, self.lwta0l)
        } else {
            (self.lwta1u, self.lwta1l)
        };
        (upper & 0x8000 != 0).then(|| table_address(upper, lower))
    }
}

/// VRAM table addresses are stored as a long with the low bit dropped;
/// the hardware shifts the 18 significant bits up into byte space.
fn table_address(upper: u16, lower: u16) -> u32 {
    let all = u32::from(upper) << 16 | u32::from(lower);
    (all & 0x7_FFFE) << 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_word_round_trips() {
        let mut regs = Registers::default();
        for offset in (0x000..=0x11E).step_by(2) {
            if offset == 0x00C || offset == 0x0FE {
                continue;
            }
            regs.load_word(offset, 0xA5A5);
            assert_eq!(regs.read_word(offset), 0xA5A5, "offset {offset:#05X}");
        }
    }

    #[test]
    fn unmapped_offsets_read_zero() {
        let mut regs = Registers::default();
        regs.load_word(0x200, 0xFFFF);
        assert_eq!(regs.read_word(0x200), 0);
        assert_eq!(regs.read_word(0x00C), 0);
        assert_eq!(regs.read_word(0x0FE), 0);
    }

    #[test]
    fn table_addresses_drop_low_bit_and_scale() {
        let mut regs = Registers::default();
        regs.bktau = 0x0003;
        regs.bktal = 0x8001;
        // all = 0x38001, & 0x7FFFE = 0x38000, << 1 = 0x70000
        assert_eq!(regs.back_screen_table(), 0x70000);
    }

    #[test]
    fn line_window_needs_enable_bit() {
        let mut regs = Registers::default();
        regs.lwta0l = 0x0100;
        assert_eq!(regs.line_window_table(0), None);
        regs.lwta0u = 0x8000;
        assert_eq!(regs.line_window_table(0), Some(0x200));
    }
}
