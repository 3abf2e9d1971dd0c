//! Device Driver (spec §4.2): a polymorphic sink for a finished frame.
//! Two variants — `real` (HTTP POST to the physical device) and `mock`
//! (records ops, logs) — behind one trait so the Device Handle and Scene
//! Runtime never need to know which one they're holding.

pub mod mock;
pub mod real;

use async_trait::async_trait;

use crate::canvas::{Alignment, Color, PixelCanvas, Point, Size};
use crate::error::PidiconError;
use crate::types::DriverKind;

/// A recorded drawing invocation, used by the mock driver for diagnostics
/// and by tests that want to assert on what a scene actually drew.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    Pixel { x: i32, y: i32, color: Color },
    Line { from: Point, to: Point, color: Color },
    Rect { pos: Point, size: Size, color: Color },
    Text { text: String, pos: Point, color: Color, alignment: Alignment },
    Numeric { value: f64, pos: Point, color: Color, alignment: Alignment, max_total_digits: u32 },
    Image { path: String, pos: Point, size: Size, alpha: u8 },
    Push,
}

/// Common behavior every driver variant provides. Drawing happens directly
/// against the canvas the driver owns; `push` is the only operation that
/// performs I/O.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    fn canvas(&self) -> &PixelCanvas;
    fn canvas_mut(&mut self) -> &mut PixelCanvas;

    /// Records a drawing op for diagnostics. No-op for drivers that don't
    /// track history (the real driver).
    fn record_op(&mut self, _op: DrawOp) {}

    /// Ships the current canvas to the device (or logs it, for mock).
    async fn push(&mut self) -> Result<(), PidiconError>;

    async fn set_brightness(&mut self, percent: u8) -> Result<(), PidiconError>;
    async fn set_power(&mut self, on: bool) -> Result<(), PidiconError>;

    /// "Soft reset" UX: flip to the init channel briefly, then back.
    async fn reset(&mut self) -> Result<(), PidiconError>;

    /// Whether the driver is ready to accept pushes. Mock is always ready;
    /// real drivers may report false before their first successful push.
    fn is_ready(&self) -> bool {
        true
    }
}

pub fn build_driver(kind: DriverKind, host: &str) -> Box<dyn Driver> {
    match kind {
        DriverKind::Real => Box::new(real::RealDriver::new(host.to_string())),
        DriverKind::Mock => Box::new(mock::MockDriver::new()),
    }
}
