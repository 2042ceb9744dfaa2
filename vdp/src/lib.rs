//! Saturn VDP2 frame compositor with VDP1 sprite integration.
//!
//! The embedding emulator captures a [`snapshot::RegisterSnapshot`] at
//! its frame boundary and hands it to [`renderer::render_frame`], which
//! returns the finished RGBA frame. Nothing here touches shared state;
//! rendering is a pure function of the snapshot.

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod bitwise;

#[allow(clippy::cast_possible_truncation)]
pub mod color;

pub mod compositor;
pub mod error;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub mod layer;

#[allow(clippy::cast_possible_truncation)]
pub mod memory;

pub mod mosaic;
pub mod registers;
pub mod renderer;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod rotation;

pub mod snapshot;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub mod sprite;

pub mod window;
