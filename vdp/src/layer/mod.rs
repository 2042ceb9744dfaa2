//! Background layer plans and the per-scanline renderers.
//!
//! A [`LayerPlan`] is everything one background needs for a frame,
//! decoded out of the register snapshot up front: pixel format, tile
//! map or bitmap source, scroll state, window assignment, color
//! calculation ratio and the special function modes. Rendering a plan
//! produces a [`LayerOutput`] of pixel submissions that the compositor
//! accumulates in priority order.

pub mod pattern;

use crate::bitwise::Bits;
use crate::color::{Color, ColorOffset};
use crate::compositor::Pixel;
use crate::memory::{CramMode, VideoMemory};
use crate::mosaic::Mosaic;
use crate::registers::Registers;
use crate::rotation::{
    Fixed, FIXED_SHIFT, ParameterSelect, RotationParameter, ScreenOver, from_int,
};
use crate::snapshot::{RegisterSnapshot, Resolution};
use crate::window::WindowSet;
use pattern::{
    CellFormat, Dot, PatternNameControl, ScreenGeometry, TileAttributes, fetch_dot,
};

/// The six background screens.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum LayerId {
    Nbg0,
    Nbg1,
    Nbg2,
    Nbg3,
    Rbg0,
    /// NBG0's tile set driven through rotation parameter B.
    Rbg1,
}

impl LayerId {
    pub const ALL: [Self; 6] = [
        Self::Nbg0,
        Self::Nbg1,
        Self::Nbg2,
        Self::Nbg3,
        Self::Rbg0,
        Self::Rbg1,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nbg0 => "NBG0",
            Self::Nbg1 => "NBG1",
            Self::Nbg2 => "NBG2",
            Self::Nbg3 => "NBG3",
            Self::Rbg0 => "RBG0",
            Self::Rbg1 => "RBG1",
        }
    }

    /// Bit index this screen occupies in CCCTL, CLOFEN, LNCLEN, SFSEL
    /// and MZCTL. RBG1 borrows NBG0's slot throughout.
    const fn control_bit(self) -> u32 {
        match self {
            Self::Nbg0 | Self::Rbg1 => 0,
            Self::Nbg1 => 1,
            Self::Nbg2 => 2,
            Self::Nbg3 => 3,
            Self::Rbg0 => 4,
        }
    }
}

/// One pixel submission: screen position, priority and payload.
#[derive(Copy, Clone, Debug)]
pub struct PixelOp {
    pub priority: u8,
    pub x: u32,
    pub y: u32,
    pub pixel: Pixel,
}

/// A per-line color for one of the rotation line screen slots.
#[derive(Copy, Clone, Debug)]
pub struct LineColor {
    pub slot: u8,
    pub y: u32,
    pub color: Color,
}

/// A shadow submission: halves whatever resolves below it.
#[derive(Copy, Clone, Debug)]
pub struct ShadowOp {
    pub priority: u8,
    pub x: u32,
    pub y: u32,
}

/// Everything a rendered layer hands to the compositor.
#[derive(Default, Debug)]
pub struct LayerOutput {
    pub ops: Vec<PixelOp>,
    pub shadows: Vec<ShadowOp>,
    pub line_colors: Vec<LineColor>,
}

/// Where a layer's dots come from.
#[derive(Clone, Debug)]
enum LayerSource {
    Tiles {
        geometry: ScreenGeometry,
        /// Character data is scheduled before the pattern name in the
        /// VRAM access cycles, so each tile renders with the previous
        /// tile's attributes.
        delayed: bool,
    },
    Bitmap {
        base: u32,
        width: u32,
        height: u32,
        palette: u16,
        special_function: bool,
        special_color: bool,
    },
}

impl LayerSource {
    fn mask_x(&self) -> u32 {
        match self {
            Self::Tiles { geometry, .. } => geometry.width_dots() - 1,
            Self::Bitmap { width, .. } => *width - 1,
        }
    }

    fn mask_y(&self) -> u32 {
        match self {
            Self::Tiles { geometry, .. } => geometry.height_dots() - 1,
            Self::Bitmap { height, .. } => *height - 1,
        }
    }
}

/// Bitmap dimensions from a two-bit CHCTL size code.
const fn bitmap_size(code: u16) -> (u32, u32) {
    match code & 0x3 {
        0 => (512, 256),
        1 => (512, 512),
        2 => (1024, 256),
        _ => (1024, 512),
    }
}

/// Which per-line values the line scroll table carries.
#[derive(Copy, Clone, Debug)]
struct LineScroll {
    table: u32,
    horizontal: bool,
    vertical: bool,
    zoom: bool,
}

impl LineScroll {
    fn from_scrctl(bits: u16, table: u32) -> Option<Self> {
        (bits & 0xE != 0).then_some(Self {
            table,
            horizontal: bits.get_bit(1),
            vertical: bits.get_bit(2),
            zoom: bits.get_bit(3),
        })
    }
}

/// Fixed-point scroll state for the normal backgrounds.
#[derive(Copy, Clone, Debug)]
struct ScrollState {
    x: Fixed,
    y: Fixed,
    inc_x: Fixed,
    inc_y: Fixed,
    line_scroll: Option<LineScroll>,
    /// Vertical cell scroll table address; sampled once per line.
    vertical_cell: Option<u32>,
}

impl ScrollState {
    fn fixed(x: u16, y: u16) -> Self {
        Self {
            x: from_int(i32::from(x & 0x7FF)),
            y: from_int(i32::from(y & 0x7FF)),
            inc_x: from_int(1),
            inc_y: from_int(1),
            line_scroll: None,
            vertical_cell: None,
        }
    }
}

/// 11.8 scroll registers widened to the shared .16 fixed point.
fn scroll_fixed(integer: u16, fraction: u16) -> Fixed {
    i64::from(integer & 0x7FF) << FIXED_SHIFT | i64::from(fraction & 0xFF00)
}

/// Zoom registers are 3.8; a zero increment counts as 1.0.
fn zoom_fixed(integer: u16, fraction: u16) -> Fixed {
    let raw = (u32::from(integer) << 16 | u32::from(fraction)) & 0x7_FF00;
    if raw == 0 { from_int(1) } else { i64::from(raw) }
}

/// Rotation drawing state for RBG0/RBG1: both parameter sets, their
/// plane maps, and how the per-dot set is chosen.
#[derive(Clone, Debug)]
struct RotationPath {
    select: ParameterSelect,
    params: [RotationParameter; 2],
    sources: [LayerSource; 2],
    /// Window control byte consulted in window select mode.
    window_wctl: u8,
    /// Parameter set whose coefficients feed the line color screen.
    primary: usize,
}

/// One decoded source dot plus its pattern-level attributes.
struct SampledDot {
    dot: Dot,
    palette: u16,
    special_function: bool,
    special_color: bool,
}

/// Resolved screen color with the data the special modes consume.
struct ResolvedDot {
    color: Color,
    raw: u32,
    msb: bool,
}

/// One-entry pattern name pipeline, reset at each line start. With
/// `delayed` fetch timing the attributes lag one tile behind.
#[derive(Default)]
struct TilePipeline {
    cell: Option<(u32, u32)>,
    latched: TileAttributes,
    decoded: TileAttributes,
}

impl TilePipeline {
    fn attributes(
        &mut self,
        memory: &VideoMemory,
        geometry: &ScreenGeometry,
        format: CellFormat,
        large_vram: bool,
        delayed: bool,
        x: u32,
        y: u32,
    ) -> TileAttributes {
        let shift = if geometry.control.double_cells { 4 } else { 3 };
        let key = (x >> shift, y >> shift);
        if self.cell != Some(key) {
            let address = geometry.pattern_name_address(x, y);
            let fresh =
                TileAttributes::decode(memory, &geometry.control, format, large_vram, address);
            self.latched = if delayed && self.cell.is_some() {
                self.decoded
            } else {
                fresh
            };
            self.decoded = fresh;
            self.cell = Some(key);
        }
        self.latched
    }
}

/// A fully decoded background, ready to render.
#[derive(Clone, Debug)]
pub struct LayerPlan {
    pub id: LayerId,
    priority: u8,
    alpha: u8,
    advertises: bool,
    transparency: bool,
    format: CellFormat,
    source: LayerSource,
    scroll: ScrollState,
    rotation: Option<RotationPath>,
    mosaic: Mosaic,
    wctl: u8,
    cc_wctl: u8,
    color_offset: Option<ColorOffset>,
    cram_offset: u32,
    special_priority_mode: u8,
    special_color_mode: u8,
    special_code: u8,
    line_screen: u8,
    large_vram: bool,
    cram_mode: CramMode,
}

impl LayerPlan {
    /// Decodes the plan for one screen, or `None` when it is disabled
    /// or suppressed by another screen's pixel format.
    #[must_use]
    pub fn build(snapshot: &RegisterSnapshot, id: LayerId) -> Option<Self> {
        let r = &snapshot.registers;
        let nbg0_format = r.chctla.get_bits(4..=6);
        let nbg1_format = r.chctla.get_bits(12..=13);

        match id {
            // RBG1 replaces NBG0 outright when enabled.
            LayerId::Nbg0 if r.bgon.get_bit(0) && !r.bgon.get_bit(5) => {}
            LayerId::Nbg1 if r.bgon.get_bit(1) && nbg0_format != 4 => {}
            LayerId::Nbg2 if r.bgon.get_bit(2) && nbg0_format < 2 => {}
            LayerId::Nbg3 if r.bgon.get_bit(3) && nbg1_format < 2 => {}
            LayerId::Rbg0 if r.bgon.get_bit(4) => {}
            LayerId::Rbg1 if r.bgon.get_bit(5) => {}
            _ => return None,
        }

        let plan = match id {
            LayerId::Nbg0 => Self::build_nbg0(snapshot),
            LayerId::Nbg1 => Self::build_nbg1(snapshot),
            LayerId::Nbg2 => Self::build_nbg2(snapshot),
            LayerId::Nbg3 => Self::build_nbg3(snapshot),
            LayerId::Rbg0 => Self::build_rbg0(snapshot),
            LayerId::Rbg1 => Self::build_rbg1(snapshot),
        };
        tracing::debug!(layer = id.name(), "layer plan built");
        Some(plan)
    }

    fn build_nbg0(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        let format = CellFormat::from_code(r.chctla.get_bits(4..=6));
        let source = if r.chctla.get_bit(1) {
            let (width, height) = bitmap_size(r.chctla.get_bits(2..=3));
            LayerSource::Bitmap {
                base: u32::from(r.mpofn & 0x7) << 17,
                width,
                height,
                palette: (r.bmpna & 0x7) << 4,
                special_function: r.bmpna.get_bit(5),
                special_color: r.bmpna.get_bit(4),
            }
        } else {
            LayerSource::Tiles {
                geometry: ScreenGeometry::new(
                    PatternNameControl::new(r.pncn0, r.chctla.get_bit(0)),
                    r.plsz,
                    r.mpofn,
                    &map_planes(&[r.mpabn0, r.mpcdn0]),
                ),
                delayed: delayed_pattern_fetch(r, 0),
            }
        };

        let scroll = ScrollState {
            x: scroll_fixed(r.scxin0, r.scxdn0),
            y: scroll_fixed(r.scyin0, r.scydn0),
            inc_x: zoom_fixed(r.zmxin0, r.zmxdn0),
            inc_y: zoom_fixed(r.zmyin0, r.zmydn0),
            line_scroll: LineScroll::from_scrctl(r.scrctl, r.line_scroll_table(0)),
            vertical_cell: r
                .scrctl
                .get_bit(0)
                .then(|| r.vertical_cell_scroll_table()),
        };

        Self::assemble(
            snapshot,
            LayerId::Nbg0,
            format,
            source,
            scroll,
            None,
            (r.prina & 0x7) as u8,
            (r.ccrna & 0x1F) as u8,
            (r.wctla & 0xFF) as u8,
            u32::from(r.craofa & 0x7) << 8,
            0,
        )
    }

    fn build_nbg1(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        let format = CellFormat::from_code(r.chctla.get_bits(12..=13));
        let source = if r.chctla.get_bit(9) {
            let (width, height) = bitmap_size(r.chctla.get_bits(10..=11));
            LayerSource::Bitmap {
                base: u32::from(r.mpofn >> 4 & 0x7) << 17,
                width,
                height,
                palette: (r.bmpna >> 8 & 0x7) << 4,
                special_function: r.bmpna.get_bit(13),
                special_color: r.bmpna.get_bit(12),
            }
        } else {
            LayerSource::Tiles {
                geometry: ScreenGeometry::new(
                    PatternNameControl::new(r.pncn1, r.chctla.get_bit(8)),
                    r.plsz >> 2,
                    r.mpofn >> 4,
                    &map_planes(&[r.mpabn1, r.mpcdn1]),
                ),
                delayed: delayed_pattern_fetch(r, 1),
            }
        };

        // NBG1's vertical cell scroll entries interleave after NBG0's
        // when both screens use the table.
        let vertical_cell = r.scrctl.get_bit(8).then(|| {
            r.vertical_cell_scroll_table() + if r.scrctl.get_bit(0) { 4 } else { 0 }
        });
        let scroll = ScrollState {
            x: scroll_fixed(r.scxin1, r.scxdn1),
            y: scroll_fixed(r.scyin1, r.scydn1),
            inc_x: zoom_fixed(r.zmxin1, r.zmxdn1),
            inc_y: zoom_fixed(r.zmyin1, r.zmydn1),
            line_scroll: LineScroll::from_scrctl(r.scrctl >> 8, r.line_scroll_table(1)),
            vertical_cell,
        };

        Self::assemble(
            snapshot,
            LayerId::Nbg1,
            format,
            source,
            scroll,
            None,
            (r.prina >> 8 & 0x7) as u8,
            (r.ccrna >> 8 & 0x1F) as u8,
            (r.wctla >> 8) as u8,
            u32::from(r.craofa >> 4 & 0x7) << 8,
            2,
        )
    }

    fn build_nbg2(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        Self::assemble(
            snapshot,
            LayerId::Nbg2,
            CellFormat::from_code(r.chctlb.get_bits(1..=1)),
            LayerSource::Tiles {
                geometry: ScreenGeometry::new(
                    PatternNameControl::new(r.pncn2, r.chctlb.get_bit(0)),
                    r.plsz >> 4,
                    r.mpofn >> 8,
                    &map_planes(&[r.mpabn2, r.mpcdn2]),
                ),
                delayed: delayed_pattern_fetch(r, 2),
            },
            ScrollState::fixed(r.scxn2, r.scyn2),
            None,
            (r.prinb & 0x7) as u8,
            (r.ccrnb & 0x1F) as u8,
            (r.wctlb & 0xFF) as u8,
            u32::from(r.craofa >> 8 & 0x7) << 8,
            4,
        )
    }

    fn build_nbg3(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        Self::assemble(
            snapshot,
            LayerId::Nbg3,
            CellFormat::from_code(r.chctlb.get_bits(5..=5)),
            LayerSource::Tiles {
                geometry: ScreenGeometry::new(
                    PatternNameControl::new(r.pncn3, r.chctlb.get_bit(4)),
                    r.plsz >> 6,
                    r.mpofn >> 12,
                    &map_planes(&[r.mpabn3, r.mpcdn3]),
                ),
                delayed: delayed_pattern_fetch(r, 3),
            },
            ScrollState::fixed(r.scxn3, r.scyn3),
            None,
            (r.prinb >> 8 & 0x7) as u8,
            (r.ccrnb >> 8 & 0x1F) as u8,
            (r.wctlb >> 8) as u8,
            u32::from(r.craofa >> 12 & 0x7) << 8,
            6,
        )
    }

    fn build_rbg0(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        let format = CellFormat::from_code(r.chctlb.get_bits(12..=14));
        let double_cells = r.chctlb.get_bit(8);
        let bitmap = r.chctlb.get_bit(9);

        let source_for = |which: usize| -> LayerSource {
            let offset = r.mpofr >> (which * 4);
            if bitmap {
                let (width, height) = bitmap_size(r.chctlb.get_bits(10..=10));
                LayerSource::Bitmap {
                    base: u32::from(offset & 0x7) << 17,
                    width,
                    height,
                    palette: (r.bmpnb & 0x7) << 4,
                    special_function: r.bmpnb.get_bit(5),
                    special_color: r.bmpnb.get_bit(4),
                }
            } else {
                let maps = if which == 0 {
                    map_planes(&[
                        r.mpabra, r.mpcdra, r.mpefra, r.mpghra, r.mpijra, r.mpklra, r.mpmnra,
                        r.mpopra,
                    ])
                } else {
                    map_planes(&[
                        r.mpabrb, r.mpcdrb, r.mpefrb, r.mpghrb, r.mpijrb, r.mpklrb, r.mpmnrb,
                        r.mpoprb,
                    ])
                };
                LayerSource::Tiles {
                    geometry: ScreenGeometry::new(
                        PatternNameControl::new(r.pncr, double_cells),
                        r.plsz >> (8 + which * 4),
                        offset,
                        &maps,
                    ),
                    delayed: false,
                }
            }
        };

        let rotation = RotationPath {
            select: ParameterSelect::from_registers(r),
            params: [
                RotationParameter::build(snapshot, 0),
                RotationParameter::build(snapshot, 1),
            ],
            sources: [source_for(0), source_for(1)],
            window_wctl: (r.wctld & 0xFF) as u8,
            primary: 0,
        };

        Self::assemble(
            snapshot,
            LayerId::Rbg0,
            format,
            source_for(0),
            ScrollState::fixed(0, 0),
            Some(rotation),
            (r.prir & 0x7) as u8,
            (r.ccrr & 0x1F) as u8,
            (r.wctlc & 0xFF) as u8,
            u32::from(r.craofb & 0x7) << 8,
            8,
        )
    }

    fn build_rbg1(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        let format = CellFormat::from_code(r.chctla.get_bits(4..=6));
        let source = if r.chctla.get_bit(1) {
            let (width, height) = bitmap_size(r.chctla.get_bits(2..=3));
            LayerSource::Bitmap {
                base: u32::from(r.mpofr >> 4 & 0x7) << 17,
                width,
                height,
                palette: (r.bmpna & 0x7) << 4,
                special_function: r.bmpna.get_bit(5),
                special_color: r.bmpna.get_bit(4),
            }
        } else {
            // NBG0's tile set through rotation parameter B's plane map.
            LayerSource::Tiles {
                geometry: ScreenGeometry::new(
                    PatternNameControl::new(r.pncn0, r.chctla.get_bit(0)),
                    r.plsz >> 12,
                    r.mpofr >> 4,
                    &map_planes(&[
                        r.mpabrb, r.mpcdrb, r.mpefrb, r.mpghrb, r.mpijrb, r.mpklrb, r.mpmnrb,
                        r.mpoprb,
                    ]),
                ),
                delayed: false,
            }
        };

        let rotation = RotationPath {
            select: ParameterSelect::FixedB,
            params: [
                RotationParameter::build(snapshot, 0),
                RotationParameter::build(snapshot, 1),
            ],
            sources: [source.clone(), source.clone()],
            window_wctl: (r.wctld & 0xFF) as u8,
            primary: 1,
        };

        Self::assemble(
            snapshot,
            LayerId::Rbg1,
            format,
            source,
            ScrollState::fixed(0, 0),
            Some(rotation),
            (r.prina & 0x7) as u8,
            (r.ccrna & 0x1F) as u8,
            (r.wctla & 0xFF) as u8,
            u32::from(r.craofa & 0x7) << 8,
            0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        snapshot: &RegisterSnapshot,
        id: LayerId,
        format: CellFormat,
        source: LayerSource,
        scroll: ScrollState,
        rotation: Option<RotationPath>,
        priority: u8,
        raw_ratio: u8,
        wctl: u8,
        cram_offset: u32,
        sf_shift: u32,
    ) -> Self {
        let r = &snapshot.registers;
        let bit = id.control_bit();
        let (alpha, advertises) = color_calc(r, bit, raw_ratio);

        Self {
            id,
            priority,
            alpha,
            advertises,
            transparency: !r.bgon.get_bit(8 + bit),
            format,
            source,
            scroll,
            rotation,
            mosaic: Mosaic::from_mzctl(r.mzctl, bit),
            wctl,
            cc_wctl: (r.wctld >> 8) as u8,
            color_offset: color_offset_for(r, bit),
            cram_offset,
            special_priority_mode: (r.sfprmd >> sf_shift & 0x3) as u8,
            special_color_mode: (r.sfccmd >> sf_shift & 0x3) as u8,
            special_code: special_code_for(r, bit),
            line_screen: u8::from(r.lnclen.get_bit(bit)),
            large_vram: r.vrsize.get_bit(15),
            cram_mode: snapshot.cram_mode(),
        }
    }

    /// Renders this layer's full-frame pixel submissions.
    #[must_use]
    pub fn render(
        &self,
        snapshot: &RegisterSnapshot,
        resolution: Resolution,
        windows: &WindowSet,
    ) -> LayerOutput {
        match &self.rotation {
            Some(path) => self.render_rotation(snapshot, resolution, windows, path),
            None => self.render_scroll(snapshot, resolution, windows),
        }
    }

    fn render_scroll(
        &self,
        snapshot: &RegisterSnapshot,
        resolution: Resolution,
        windows: &WindowSet,
    ) -> LayerOutput {
        let memory = &snapshot.memory;
        let mut out = LayerOutput::default();
        let mask_x = self.source.mask_x();
        let mask_y = self.source.mask_y();

        let mut inc_x = self.scroll.inc_x;
        let mut line_scroll_address = self.scroll.line_scroll.map_or(0, |ls| ls.table);

        for j in 0..resolution.height {
            let mut line_scroll_x = 0;
            let mut y = self.scroll.y + self.scroll.inc_y * i64::from(self.mosaic.quantize_y(j));

            if let Some(ls) = &self.scroll.line_scroll {
                if ls.horizontal {
                    line_scroll_x = memory.vram_long(line_scroll_address) >> 16 & 0x7FF;
                    line_scroll_address += 4;
                }
                if ls.vertical {
                    let offset = memory.vram_word(line_scroll_address) & 0x7FF;
                    y = self.scroll.y + from_int(i32::from(offset));
                    line_scroll_address += 4;
                }
                if ls.zoom {
                    inc_x = i64::from(memory.vram_long(line_scroll_address) & 0x7_FF00);
                    if inc_x == 0 {
                        inc_x = from_int(1);
                    }
                    line_scroll_address += 4;
                }
            }

            let mut line_y = (y >> FIXED_SHIFT) as u32 & mask_y;
            if let Some(table) = self.scroll.vertical_cell {
                line_y = (line_y + (memory.vram_long(table) >> 16)) & 0x1FF;
            }

            let mut pipeline = TilePipeline::default();
            for i in 0..resolution.width {
                if !windows.visible(self.wctl, i, j) {
                    continue;
                }

                let fx = self.scroll.x + inc_x * i64::from(self.mosaic.quantize_x(i));
                let x = ((fx >> FIXED_SHIFT) as u32).wrapping_add(line_scroll_x) & mask_x;

                let sampled = self.sample(memory, &self.source, &mut pipeline, x, line_y);
                self.emit(memory, windows, &mut out, &sampled, i, j, self.line_screen);
            }
        }
        out
    }

    fn render_rotation(
        &self,
        snapshot: &RegisterSnapshot,
        resolution: Resolution,
        windows: &WindowSet,
        path: &RotationPath,
    ) -> LayerOutput {
        let memory = &snapshot.memory;
        let registers = &snapshot.registers;
        let mut out = LayerOutput::default();

        let line_color_capable = |which: usize| {
            path.params[which]
                .coefficient
                .as_ref()
                .is_some_and(|config| config.line_color)
        };
        let mut line_screen = self.line_screen;
        if line_screen != 0 {
            if path.primary == 0 && line_color_capable(0) {
                line_screen = 2;
            } else if line_color_capable(1) {
                line_screen = 3;
            }
        }
        let mut line_color_address = registers.line_color_table();
        let line_color_inc = if registers.lctau.get_bit(15) { 2 } else { 0 };

        for j in 0..resolution.height {
            let lines = [
                path.params[0].line_state(memory, j),
                path.params[1].line_state(memory, j),
            ];

            if line_screen > 1 {
                let base = memory.vram_word(line_color_address) & 0x780;
                let coefficient_color =
                    path.params[path.primary].line_color(&lines[path.primary]);
                let index = u32::from(base | u16::from(coefficient_color.unwrap_or(0)));
                let (color, _) = memory.cram_color(self.cram_mode, index);
                out.line_colors.push(LineColor {
                    slot: line_screen,
                    y: j,
                    color,
                });
                line_color_address += line_color_inc;
            }

            let mut pipelines = [TilePipeline::default(), TilePipeline::default()];
            for i in 0..resolution.width {
                if !windows.visible(self.wctl, i, j) {
                    continue;
                }

                let resolved = match path.select {
                    ParameterSelect::CoefficientMsb => {
                        match path.params[0].resolve(memory, &lines[0], i) {
                            Some(point) => Some((0, point)),
                            None => path.params[1]
                                .resolve(memory, &lines[1], i)
                                .map(|point| (1, point)),
                        }
                    }
                    select => {
                        let which = match select {
                            ParameterSelect::FixedA => 0,
                            ParameterSelect::FixedB => 1,
                            _ => usize::from(!windows.visible(path.window_wctl, i, j)),
                        };
                        path.params[which]
                            .resolve(memory, &lines[which], i)
                            .map(|point| (which, point))
                    }
                };
                let Some((which, (sx, sy))) = resolved else {
                    continue;
                };

                let source = &path.sources[which];
                let Some((x, y)) = clamp_to_surface(&path.params[which], source, sx, sy) else {
                    continue;
                };

                let sampled = self.sample(memory, source, &mut pipelines[which], x, y);
                self.emit(memory, windows, &mut out, &sampled, i, j, line_screen);
            }
        }
        out
    }

    fn sample(
        &self,
        memory: &VideoMemory,
        source: &LayerSource,
        pipeline: &mut TilePipeline,
        x: u32,
        y: u32,
    ) -> SampledDot {
        match source {
            LayerSource::Tiles { geometry, delayed } => {
                let attributes = pipeline.attributes(
                    memory,
                    geometry,
                    self.format,
                    self.large_vram,
                    *delayed,
                    x,
                    y,
                );
                SampledDot {
                    dot: attributes.fetch(
                        memory,
                        self.format,
                        geometry.control.double_cells,
                        x,
                        y,
                    ),
                    palette: attributes.palette,
                    special_function: attributes.special_function,
                    special_color: attributes.special_color,
                }
            }
            LayerSource::Bitmap {
                base,
                width,
                palette,
                special_function,
                special_color,
                ..
            } => SampledDot {
                dot: fetch_dot(memory, self.format, *base, *width, x, y),
                palette: *palette,
                special_function: *special_function,
                special_color: *special_color,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        memory: &VideoMemory,
        windows: &WindowSet,
        out: &mut LayerOutput,
        sampled: &SampledDot,
        i: u32,
        j: u32,
        line_screen: u8,
    ) {
        let Some(resolved) = self.resolve_dot(memory, sampled.dot, sampled.palette) else {
            return;
        };

        let mut priority = self.priority;
        match self.special_priority_mode {
            1 => priority = priority & 0xE | u8::from(sampled.special_function),
            2 => {
                priority &= 0xE;
                if sampled.special_function && self.code_matches(resolved.raw) {
                    priority |= 1;
                }
            }
            _ => {}
        }

        let (alpha, advertises) = if windows.visible(self.cc_wctl, i, j) {
            self.pixel_alpha(sampled.special_color, resolved.raw, resolved.msb)
        } else {
            // Inside the color calculation window means no blending.
            (0x3F, false)
        };

        let color = self
            .color_offset
            .map_or(resolved.color, |offset| offset.apply(resolved.color));

        out.ops.push(PixelOp {
            priority,
            x: i,
            y: j,
            pixel: Pixel {
                color,
                alpha,
                advertises_ratio: advertises,
                line_screen,
            },
        });
    }

    fn resolve_dot(&self, memory: &VideoMemory, dot: Dot, palette: u16) -> Option<ResolvedDot> {
        match dot {
            Dot::Palette(value) => {
                if value == 0 && self.transparency {
                    return None;
                }
                let index = match self.format {
                    CellFormat::Palette2048 => u32::from(value),
                    _ => u32::from(palette) << 4 | u32::from(value),
                };
                let (color, msb) = memory.cram_color(self.cram_mode, self.cram_offset + index);
                Some(ResolvedDot {
                    color,
                    raw: u32::from(value),
                    msb,
                })
            }
            Dot::Rgb(color, opaque) => {
                if !opaque && self.transparency {
                    return None;
                }
                Some(ResolvedDot {
                    color,
                    raw: 0,
                    msb: false,
                })
            }
        }
    }

    /// Special color code test: each SFCODE bit covers two adjacent
    /// low dot values.
    fn code_matches(&self, raw: u32) -> bool {
        self.special_code & (1 << ((raw & 0xF) >> 1)) != 0
    }

    fn pixel_alpha(&self, special_color: bool, raw: u32, msb: bool) -> (u8, bool) {
        let opaque = match self.special_color_mode {
            1 => !special_color,
            2 => !special_color || !self.code_matches(raw),
            3 => !msb,
            _ => false,
        };
        if opaque {
            (0x3F, false)
        } else {
            (self.alpha, self.advertises)
        }
    }
}

/// Color calculation ratio and participation for one screen.
fn color_calc(registers: &Registers, bit: u32, raw_ratio: u8) -> (u8, bool) {
    let mask = 1u16 << bit;
    let alpha = if registers.ccctl & (0x200 | mask) != 0 {
        ((!raw_ratio & 0x1F) << 1) + 1
    } else {
        0x3F
    };
    let advertises = registers.ccctl & (0x200 | mask) == (0x200 | mask)
        || registers.ccctl & (0x100 | mask) == (0x100 | mask);
    (alpha, advertises)
}

fn color_offset_for(registers: &Registers, bit: u32) -> Option<ColorOffset> {
    registers.clofen.get_bit(bit).then(|| {
        if registers.clofsl.get_bit(bit) {
            ColorOffset::from_registers(registers.cobr, registers.cobg, registers.cobb)
        } else {
            ColorOffset::from_registers(registers.coar, registers.coag, registers.coab)
        }
    })
}

fn special_code_for(registers: &Registers, bit: u32) -> u8 {
    if registers.sfsel.get_bit(bit) {
        (registers.sfcode >> 8) as u8
    } else {
        (registers.sfcode & 0xFF) as u8
    }
}

/// Splits map registers into their 6-bit per-plane values, low byte
/// first.
fn map_planes(registers: &[u16]) -> Vec<u8> {
    registers
        .iter()
        .flat_map(|&r| [(r & 0x3F) as u8, (r >> 8 & 0x3F) as u8])
        .collect()
}

/// Applies a rotation parameter's screen-over mode to resolved source
/// coordinates.
fn clamp_to_surface(
    param: &RotationParameter,
    source: &LayerSource,
    x: i32,
    y: i32,
) -> Option<(u32, u32)> {
    let mask_x = source.mask_x() as i32;
    let mask_y = source.mask_y() as i32;
    match param.screen_over {
        ScreenOver::Repeat => Some(((x & mask_x) as u32, (y & mask_y) as u32)),
        ScreenOver::Transparent => {
            if x < 0 || y < 0 || x > mask_x || y > mask_y {
                None
            } else {
                Some((x as u32, y as u32))
            }
        }
        ScreenOver::Transparent512 => {
            if x < 0 || y < 0 || x > 511 || y > 511 {
                None
            } else {
                Some(((x & mask_x) as u32, (y & mask_y) as u32))
            }
        }
    }
}

/// VRAM access timing check: in any bank whose cycle pattern schedules
/// a screen's character fetch in an earlier slot than its pattern name
/// fetch, tile attributes arrive one tile late.
fn delayed_pattern_fetch(registers: &Registers, screen: u16) -> bool {
    let banks = [
        (registers.cyca0l, registers.cyca0u),
        (registers.cyca1l, registers.cyca1u),
        (registers.cycb0l, registers.cycb0u),
        (registers.cycb1l, registers.cycb1u),
    ];
    for (low, high) in banks {
        let mut pattern_slot = None;
        let mut character_slot = None;
        for slot in 0..8u32 {
            let word = if slot < 4 { low } else { high };
            let value = word >> (12 - (slot & 3) * 4) & 0xF;
            if value == screen {
                pattern_slot.get_or_insert(slot);
            }
            if value == screen + 4 {
                character_slot.get_or_insert(slot);
            }
        }
        if let (Some(pattern), Some(character)) = (pattern_slot, character_slot) {
            if character < pattern {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot() -> RegisterSnapshot {
        let mut snapshot = RegisterSnapshot::default();
        snapshot.registers.tvmd = 0x8000;
        snapshot
    }

    fn write_cram_rgb555(snapshot: &mut RegisterSnapshot, index: usize, value: u16) {
        snapshot.memory.cram[index * 2] = (value >> 8) as u8;
        snapshot.memory.cram[index * 2 + 1] = (value & 0xFF) as u8;
    }

    fn ops_at(output: &LayerOutput, x: u32, y: u32) -> Vec<PixelOp> {
        output
            .ops
            .iter()
            .copied()
            .filter(|op| op.x == x && op.y == y)
            .collect()
    }

    #[test]
    fn disabled_layer_builds_no_plan() {
        let snapshot = snapshot();
        assert!(LayerPlan::build(&snapshot, LayerId::Nbg0).is_none());
    }

    #[test]
    fn rbg1_takes_over_nbg0() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0021;
        assert!(LayerPlan::build(&snapshot, LayerId::Nbg0).is_none());
        assert!(LayerPlan::build(&snapshot, LayerId::Rbg1).is_some());
    }

    #[test]
    fn deep_nbg0_suppresses_companion_screens() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x000F;
        // NBG0 in 2048-color mode: NBG2 loses its VRAM slot.
        snapshot.registers.chctla = 2 << 4;
        assert!(LayerPlan::build(&snapshot, LayerId::Nbg2).is_none());
        assert!(LayerPlan::build(&snapshot, LayerId::Nbg1).is_some());
        // 16M-color NBG0 also drops NBG1.
        snapshot.registers.chctla = 4 << 4;
        assert!(LayerPlan::build(&snapshot, LayerId::Nbg1).is_none());
    }

    #[test]
    fn tiled_layer_draws_palette_dots() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0004;
        snapshot.registers.pncn2 = 0x8000;
        snapshot.registers.prinb = 0x0005;
        // Pattern name 0 points at character 1; its first dot is
        // palette index 1, the second transparent.
        snapshot.memory.vram[1] = 0x01;
        snapshot.memory.vram[0x20] = 0x10;
        write_cram_rgb555(&mut snapshot, 1, 0x7FFF);

        let plan = LayerPlan::build(&snapshot, LayerId::Nbg2).expect("plan");
        let resolution = snapshot.resolution();
        let windows = WindowSet::build(&snapshot, resolution);
        let output = plan.render(&snapshot, resolution, &windows);

        let first = ops_at(&output, 0, 0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].priority, 5);
        assert_eq!(first[0].pixel.color, Color::rgb(0xF8, 0xF8, 0xF8));
        assert_eq!(first[0].pixel.alpha, 0x3F);
        assert!(ops_at(&output, 1, 0).is_empty());
    }

    #[test]
    fn transparency_disable_draws_dot_zero() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0404;
        snapshot.registers.pncn2 = 0x8000;
        write_cram_rgb555(&mut snapshot, 0, 0x001F);

        let plan = LayerPlan::build(&snapshot, LayerId::Nbg2).expect("plan");
        let resolution = snapshot.resolution();
        let windows = WindowSet::build(&snapshot, resolution);
        let output = plan.render(&snapshot, resolution, &windows);
        assert_eq!(ops_at(&output, 1, 0).len(), 1);
    }

    #[test]
    fn line_scroll_shifts_a_bitmap_layer() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0001;
        // NBG0, 256-color bitmap, horizontal line scroll from VRAM 0x1000.
        snapshot.registers.chctla = 0x0012;
        snapshot.registers.scrctl = 0x0002;
        snapshot.registers.lsta0l = 0x1000 >> 1;
        // Line 0 scrolls 8 dots right.
        snapshot.memory.vram[0x1000] = 0x00;
        snapshot.memory.vram[0x1001] = 0x08;
        snapshot.memory.vram[8] = 0x05;
        write_cram_rgb555(&mut snapshot, 5, 0x03E0);

        let plan = LayerPlan::build(&snapshot, LayerId::Nbg0).expect("plan");
        let resolution = snapshot.resolution();
        let windows = WindowSet::build(&snapshot, resolution);
        let output = plan.render(&snapshot, resolution, &windows);

        let first = ops_at(&output, 0, 0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].pixel.color, Color::rgb(0, 0xF8, 0));
    }

    #[test]
    fn color_calc_ratio_and_advertising() {
        let mut registers = Registers::default();
        registers.ccctl = 0x0001;
        let (alpha, advertises) = color_calc(&registers, 0, 0x10);
        assert_eq!(alpha, ((!0x10u8 & 0x1F) << 1) + 1);
        assert!(!advertises);

        registers.ccctl = 0x0201;
        assert!(color_calc(&registers, 0, 0).1);
        registers.ccctl = 0x0200;
        // Bottom-ratio mode forces ratios even without the enable bit.
        assert_eq!(color_calc(&registers, 0, 0x1F).0, 1);
        assert!(!color_calc(&registers, 0, 0x1F).1);
    }

    #[test]
    fn character_before_pattern_name_delays_fetch() {
        let mut registers = Registers::default();
        // Bank A0: NBG2 character data in T0, pattern name in T2.
        registers.cyca0l = 0x6F2F;
        assert!(delayed_pattern_fetch(&registers, 2));
        // Pattern name first is the ordinary timing.
        registers.cyca0l = 0x2F6F;
        assert!(!delayed_pattern_fetch(&registers, 2));
        assert!(!delayed_pattern_fetch(&registers, 1));
    }

    #[test]
    fn delayed_fetch_uses_previous_tile_attributes() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0004;
        snapshot.registers.pncn2 = 0x8000;
        snapshot.registers.cyca0l = 0x6F2F;
        // Tile 0 -> character 1, tile 1 -> character 2. Character 1 is
        // solid palette 1, character 2 solid palette 2.
        snapshot.memory.vram[1] = 0x01;
        snapshot.memory.vram[3] = 0x02;
        for dot in 0..0x20 {
            snapshot.memory.vram[0x20 + dot] = 0x11;
            snapshot.memory.vram[0x40 + dot] = 0x22;
        }
        write_cram_rgb555(&mut snapshot, 1, 0x7C00);
        write_cram_rgb555(&mut snapshot, 2, 0x001F);

        let plan = LayerPlan::build(&snapshot, LayerId::Nbg2).expect("plan");
        let resolution = snapshot.resolution();
        let windows = WindowSet::build(&snapshot, resolution);
        let output = plan.render(&snapshot, resolution, &windows);

        // The first tile renders with its own attributes, the second
        // still carries the first tile's character address.
        assert_eq!(ops_at(&output, 0, 0)[0].pixel.color, Color::rgb(0, 0, 0xF8));
        assert_eq!(ops_at(&output, 8, 0)[0].pixel.color, Color::rgb(0, 0, 0xF8));
        assert_eq!(
            ops_at(&output, 16, 0)[0].pixel.color,
            Color::rgb(0xF8, 0, 0)
        );
    }

    #[test]
    fn rbg0_plan_carries_both_parameter_sets() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0010;
        snapshot.registers.rpmd = 0x0002;
        let plan = LayerPlan::build(&snapshot, LayerId::Rbg0).expect("plan");
        let path = plan.rotation.as_ref().expect("rotation path");
        assert_eq!(path.select, ParameterSelect::CoefficientMsb);
        assert_eq!(path.primary, 0);
    }
}
