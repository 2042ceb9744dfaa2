//! Whole-frame rendering: plans, per-layer workers, composition.
//!
//! A frame renders in three phases. The serial prologue decodes the
//! layer plans, builds the window state (including the sprite window
//! mask, which every other layer may consult) and the back and line
//! screens. The layer phase then renders each background and the
//! sprite framebuffer on its own scoped thread, each producing a
//! private submission list. Finally the submissions accumulate into
//! the priority compositor in a fixed order and resolve to RGBA.

use std::thread;

use crate::color::Color;
use crate::compositor::{BlendMode, PriorityCompositor};
use crate::error::RenderError;
use crate::layer::{LayerId, LayerOutput, LayerPlan};
use crate::snapshot::{RegisterSnapshot, Resolution};
use crate::sprite::SpriteLayer;
use crate::window::WindowSet;

/// Layers accumulate in this order; with equal priorities the later
/// submission wins, so this fixes the equal-priority stacking: the
/// sprite layer (accumulated last of all) beats RBG0, which beats
/// NBG0, down to NBG3.
const ACCUMULATE_ORDER: [LayerId; 6] = [
    LayerId::Nbg3,
    LayerId::Nbg2,
    LayerId::Nbg1,
    LayerId::Nbg0,
    LayerId::Rbg1,
    LayerId::Rbg0,
];

/// A resolved frame of RGBA8888 pixels, row-major.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// Renders one complete frame from a register snapshot.
///
/// # Errors
///
/// Returns [`RenderError::BufferAllocation`] when the compositing
/// buffers cannot be allocated.
pub fn render_frame(snapshot: &RegisterSnapshot) -> Result<FrameBuffer, RenderError> {
    let resolution = snapshot.resolution();
    tracing::debug!(
        width = resolution.width,
        height = resolution.height,
        "rendering frame"
    );

    let blend = BlendMode::from_ccctl(snapshot.registers.ccctl);
    let mut compositor = PriorityCompositor::new(resolution.width, resolution.height, blend)?;

    draw_back_screen(&mut compositor, snapshot, resolution);

    if snapshot.display_enabled() {
        draw_line_screen(&mut compositor, snapshot, resolution);

        let sprite = SpriteLayer::build(snapshot);
        let mut windows = WindowSet::build(snapshot, resolution);
        if WindowSet::sprite_window_requested(snapshot) {
            windows.sprite_mask = Some(sprite.window_mask(snapshot, resolution));
        }

        let plans: Vec<LayerPlan> = ACCUMULATE_ORDER
            .iter()
            .filter_map(|&id| LayerPlan::build(snapshot, id))
            .collect();

        for output in render_layers(snapshot, resolution, &windows, &sprite, &plans) {
            accumulate(&mut compositor, &output);
        }
    }

    let mut pixels = vec![0_u32; (resolution.width * resolution.height) as usize];
    compositor.resolve_into(&mut pixels);
    Ok(FrameBuffer {
        width: resolution.width,
        height: resolution.height,
        pixels,
    })
}

/// Runs the sprite layer and every background on its own thread. The
/// returned outputs keep the accumulation order: the backgrounds as
/// planned, the sprite layer last.
fn render_layers(
    snapshot: &RegisterSnapshot,
    resolution: Resolution,
    windows: &WindowSet,
    sprite: &SpriteLayer,
    plans: &[LayerPlan],
) -> Vec<LayerOutput> {
    thread::scope(|scope| {
        let sprite_worker = scope.spawn(|| sprite.render(snapshot, resolution, windows));
        let workers: Vec<_> = plans
            .iter()
            .map(|plan| scope.spawn(move || plan.render(snapshot, resolution, windows)))
            .collect();

        let mut outputs = Vec::with_capacity(plans.len() + 1);
        outputs.extend(workers.into_iter().map(join_worker));
        outputs.push(join_worker(sprite_worker));
        outputs
    })
}

fn join_worker(handle: thread::ScopedJoinHandle<'_, LayerOutput>) -> LayerOutput {
    match handle.join() {
        Ok(output) => output,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn accumulate(compositor: &mut PriorityCompositor, output: &LayerOutput) {
    for lc in &output.line_colors {
        compositor.set_line_screen(usize::from(lc.slot), lc.y, lc.color);
    }
    for op in &output.ops {
        compositor.put_pixel(op.priority, op.x, op.y, op.pixel);
    }
    for shadow in &output.shadows {
        compositor.put_shadow(shadow.priority, shadow.x, shadow.y);
    }
}

/// The back screen covers everything no layer reaches. With both the
/// display and the border-color-mode bits clear it is forced black;
/// otherwise it comes from the back screen table, one entry per frame
/// or per line.
fn draw_back_screen(
    compositor: &mut PriorityCompositor,
    snapshot: &RegisterSnapshot,
    resolution: Resolution,
) {
    let r = &snapshot.registers;
    if r.tvmd & 0x8000 == 0 && r.tvmd & 0x100 == 0 {
        for line in 0..resolution.height {
            compositor.set_back_line(line, Color::rgb(0, 0, 0));
        }
        return;
    }

    let offset = (r.clofen & 0x20 != 0).then(|| {
        if r.clofsl & 0x20 != 0 {
            crate::color::ColorOffset::from_registers(r.cobr, r.cobg, r.cobb)
        } else {
            crate::color::ColorOffset::from_registers(r.coar, r.coag, r.coab)
        }
    });

    let mut address = r.back_screen_table();
    let per_line = r.bktau & 0x8000 != 0;
    for line in 0..resolution.height {
        let dot = snapshot.memory.vram_word(address);
        let color = Color::from_rgb555(dot);
        let color = offset.map_or(color, |o| o.apply(color));
        compositor.set_back_line(line, color);
        if per_line {
            address += 2;
        }
    }
}

/// The plain line color screen (slot 1), shared by every layer whose
/// LNCLEN bit is set. The rotation layers may override their slot with
/// coefficient-driven line colors at render time.
fn draw_line_screen(
    compositor: &mut PriorityCompositor,
    snapshot: &RegisterSnapshot,
    resolution: Resolution,
) {
    let r = &snapshot.registers;
    if r.lnclen == 0 {
        return;
    }

    let mut address = r.line_color_table();
    let per_line = r.lctau & 0x8000 != 0;
    let mode = snapshot.cram_mode();
    for line in 0..resolution.height {
        let index = u32::from(snapshot.memory.vram_word(address) & 0x7FF);
        let (color, _) = snapshot.memory.cram_color(mode, index);
        compositor.set_line_screen(1, line, color);
        if per_line {
            address += 2;
        }
    }
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

    fn pixel(frame: &FrameBuffer, x: u32, y: u32) -> u32 {
        frame.pixels[(y * frame.width + x) as usize]
    }

    #[test]
    fn empty_frame_resolves_to_back_screen() {
        let mut snapshot = snapshot();
        // Back screen table at VRAM 0x2000, single red entry.
        snapshot.registers.bktal = 0x2000 >> 1;
        snapshot.memory.vram[0x2000] = 0x00;
        snapshot.memory.vram[0x2001] = 0x1F;

        let frame = render_frame(&snapshot).expect("frame");
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 224);
        assert_eq!(pixel(&frame, 0, 0), Color::rgb(0xF8, 0, 0).to_rgba8888());
        assert_eq!(
            pixel(&frame, 319, 223),
            Color::rgb(0xF8, 0, 0).to_rgba8888()
        );
    }

    #[test]
    fn display_disabled_blanks_the_frame() {
        let snapshot = RegisterSnapshot::default();
        let frame = render_frame(&snapshot).expect("frame");
        assert_eq!(pixel(&frame, 10, 10), Color::rgb(0, 0, 0).to_rgba8888());
    }

    #[test]
    fn per_line_back_screen() {
        let mut snapshot = snapshot();
        snapshot.registers.bktau = 0x8000;
        snapshot.registers.bktal = 0;
        // Line 0 red, line 1 green.
        snapshot.memory.vram[1] = 0x1F;
        snapshot.memory.vram[2] = 0x03;
        snapshot.memory.vram[3] = 0xE0;

        let frame = render_frame(&snapshot).expect("frame");
        assert_eq!(pixel(&frame, 0, 0), Color::rgb(0xF8, 0, 0).to_rgba8888());
        assert_eq!(pixel(&frame, 0, 1), Color::rgb(0, 0xF8, 0).to_rgba8888());
    }

    #[test]
    fn background_layer_beats_back_screen() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0004;
        snapshot.registers.pncn2 = 0x8000;
        snapshot.registers.prinb = 0x0005;
        // Back screen table away from the pattern data at address 0.
        snapshot.registers.bktal = 0x2000;
        snapshot.memory.vram[1] = 0x01;
        snapshot.memory.vram[0x20] = 0x10;
        write_cram_rgb555(&mut snapshot, 1, 0x7FFF);

        let frame = render_frame(&snapshot).expect("frame");
        assert_eq!(
            pixel(&frame, 0, 0),
            Color::rgb(0xF8, 0xF8, 0xF8).to_rgba8888()
        );
        // The neighbouring transparent dot falls through to the (black)
        // back screen.
        assert_eq!(pixel(&frame, 1, 0), Color::rgb(0, 0, 0).to_rgba8888());
    }

    #[test]
    fn sprite_priority_orders_against_backgrounds() {
        let mut snapshot = snapshot();
        // NBG2 priority 5 everywhere in the first tile row.
        snapshot.registers.bgon = 0x0004;
        snapshot.registers.pncn2 = 0x8000;
        snapshot.registers.prinb = 0x0005;
        snapshot.memory.vram[1] = 0x01;
        for dot in 0..0x20 {
            snapshot.memory.vram[0x20 + dot] = 0x11;
        }
        write_cram_rgb555(&mut snapshot, 1, 0x7FFF);

        // One sprite dot at priority 6, another at priority 4.
        snapshot.registers.prisa = 0x0406;
        snapshot.vdp1.framebuffer.data[1] = 0x02; // type 0, slot 0, data 2
        snapshot.vdp1.framebuffer.data[2] = 0x40; // slot 1
        snapshot.vdp1.framebuffer.data[3] = 0x02;
        write_cram_rgb555(&mut snapshot, 2, 0x001F);

        let frame = render_frame(&snapshot).expect("frame");
        // Priority 6 sprite covers the background...
        assert_eq!(pixel(&frame, 0, 0), Color::rgb(0xF8, 0, 0).to_rgba8888());
        // ...the priority 4 one does not.
        assert_eq!(
            pixel(&frame, 1, 0),
            Color::rgb(0xF8, 0xF8, 0xF8).to_rgba8888()
        );
    }

    #[test]
    fn equal_priority_sprite_beats_background() {
        let mut snapshot = snapshot();
        // NBG2 white and a sprite dot, both at priority 5.
        snapshot.registers.bgon = 0x0004;
        snapshot.registers.pncn2 = 0x8000;
        snapshot.registers.prinb = 0x0005;
        snapshot.memory.vram[1] = 0x01;
        for dot in 0..0x20 {
            snapshot.memory.vram[0x20 + dot] = 0x11;
        }
        write_cram_rgb555(&mut snapshot, 1, 0x7FFF);

        snapshot.registers.prisa = 0x0005;
        snapshot.vdp1.framebuffer.data[1] = 0x02;
        write_cram_rgb555(&mut snapshot, 2, 0x001F);

        let frame = render_frame(&snapshot).expect("frame");
        assert_eq!(pixel(&frame, 0, 0), Color::rgb(0xF8, 0, 0).to_rgba8888());
    }

    #[test]
    fn sprite_shadow_halves_the_background() {
        let mut snapshot = snapshot();
        snapshot.registers.bgon = 0x0004;
        snapshot.registers.pncn2 = 0x8000;
        snapshot.registers.prinb = 0x0005;
        snapshot.memory.vram[1] = 0x01;
        for dot in 0..0x20 {
            snapshot.memory.vram[0x20 + dot] = 0x11;
        }
        write_cram_rgb555(&mut snapshot, 1, 0x7FFF);

        // Normal shadow dot at priority 6 over the background.
        snapshot.registers.prisa = 0x0006;
        snapshot.vdp1.framebuffer.data[0] = 0x07;
        snapshot.vdp1.framebuffer.data[1] = 0xFE;

        let frame = render_frame(&snapshot).expect("frame");
        assert_eq!(
            pixel(&frame, 0, 0),
            Color::rgb(0x7C, 0x7C, 0x7C).to_rgba8888()
        );
    }
}
