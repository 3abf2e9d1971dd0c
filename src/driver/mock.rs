//! Mock driver: records an ordered list of draw ops and logs a summary on
//! `push`, per spec §4.2. Used for tests and for devices configured as
//! `mock` in the environment knobs of §6.

use async_trait::async_trait;

use crate::canvas::PixelCanvas;
use crate::error::PidiconError;
use crate::types::DriverKind;

use super::{Driver, DrawOp};

pub struct MockDriver {
    canvas: PixelCanvas,
    ops: Vec<DrawOp>,
    brightness: u8,
    power_on: bool,
    push_count: u64,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver {
            canvas: PixelCanvas::new(),
            ops: Vec::new(),
            brightness: 100,
            power_on: true,
            push_count: 0,
        }
    }

    /// The ops recorded since the last `push`, for test assertions.
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn push_count(&self) -> u64 {
        self.push_count
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn power_on(&self) -> bool {
        self.power_on
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Mock
    }

    fn canvas(&self) -> &PixelCanvas {
        &self.canvas
    }

    fn canvas_mut(&mut self) -> &mut PixelCanvas {
        &mut self.canvas
    }

    fn record_op(&mut self, op: DrawOp) {
        self.ops.push(op);
    }

    async fn push(&mut self) -> Result<(), PidiconError> {
        self.push_count += 1;
        tracing::debug!(ops = self.ops.len(), pushes = self.push_count, "mock push");
        self.ops.push(DrawOp::Push);
        Ok(())
    }

    async fn set_brightness(&mut self, percent: u8) -> Result<(), PidiconError> {
        self.brightness = percent.min(100);
        Ok(())
    }

    async fn set_power(&mut self, on: bool) -> Result<(), PidiconError> {
        self.power_on = on;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), PidiconError> {
        tracing::debug!("mock reset");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Color;

    #[tokio::test]
    async fn push_is_always_ok_and_counts() {
        let mut d = MockDriver::new();
        d.canvas_mut().draw_pixel(0, 0, Color::WHITE);
        d.record_op(DrawOp::Pixel { x: 0, y: 0, color: Color::WHITE });
        d.push().await.unwrap();
        assert_eq!(d.push_count(), 1);
        assert!(d.ops().iter().any(|op| matches!(op, DrawOp::Push)));
    }
}
