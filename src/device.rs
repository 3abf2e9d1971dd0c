//! Device Handle (spec §4.2): wraps one driver, forwards the drawing API,
//! and records metrics on every push.

use std::time::Instant;

use crate::canvas::{Alignment, Color, Point, Size};
use crate::driver::{build_driver, Driver, DrawOp};
use crate::error::PidiconError;
use crate::types::{DeviceId, DriverKind};

pub struct DeviceHandle {
    id: DeviceId,
    driver: Box<dyn Driver>,
}

impl DeviceHandle {
    pub fn new(id: DeviceId, kind: DriverKind, host: &str) -> Self {
        DeviceHandle {
            id,
            driver: build_driver(kind, host),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.driver.kind()
    }

    /// Discards the current driver instance and constructs a fresh one.
    /// The next `push` re-runs that driver's init sequence.
    pub fn switch_driver(&mut self, kind: DriverKind, host: &str) {
        self.driver = build_driver(kind, host);
    }

    pub fn clear(&mut self) {
        self.driver.canvas_mut().clear();
        self.driver.record_op(DrawOp::Clear);
    }

    pub fn draw_pixel(&mut self, x: i32, y: i32, color: Color) {
        self.driver.canvas_mut().draw_pixel(x, y, color);
        self.driver.record_op(DrawOp::Pixel { x, y, color });
    }

    pub fn draw_line(&mut self, from: Point, to: Point, color: Color) {
        self.driver.canvas_mut().draw_line(from, to, color);
        self.driver.record_op(DrawOp::Line { from, to, color });
    }

    pub fn draw_rect(&mut self, pos: Point, size: Size, color: Color) {
        self.driver.canvas_mut().draw_rect(pos, size, color);
        self.driver.record_op(DrawOp::Rect { pos, size, color });
    }

    pub fn fill_rect(&mut self, pos: Point, size: Size, color: Color) {
        self.draw_rect(pos, size, color);
    }

    pub fn draw_text(&mut self, text: &str, pos: Point, color: Color, alignment: Alignment) -> u32 {
        let width = self.driver.canvas_mut().draw_text(text, pos, color, alignment);
        self.driver.record_op(DrawOp::Text {
            text: text.to_string(),
            pos,
            color,
            alignment,
        });
        width
    }

    pub fn draw_numeric(
        &mut self,
        value: f64,
        pos: Point,
        color: Color,
        alignment: Alignment,
        max_total_digits: u32,
    ) -> u32 {
        let width = self
            .driver
            .canvas_mut()
            .draw_numeric(value, pos, color, alignment, max_total_digits);
        self.driver.record_op(DrawOp::Numeric {
            value,
            pos,
            color,
            alignment,
            max_total_digits,
        });
        width
    }

    pub fn draw_image(&mut self, image_path: &str, pos: Point, size: Size, alpha: u8) {
        self.driver
            .canvas_mut()
            .draw_image(std::path::Path::new(image_path), pos, size, alpha);
        self.driver.record_op(DrawOp::Image {
            path: image_path.to_string(),
            pos,
            size,
            alpha,
        });
    }

    /// Ships the current canvas via the driver and returns the measured
    /// frametime on success.
    pub async fn push(&mut self) -> Result<std::time::Duration, PidiconError> {
        let start = Instant::now();
        self.driver.push().await?;
        Ok(start.elapsed())
    }

    pub async fn set_brightness(&mut self, percent: u8) -> Result<(), PidiconError> {
        self.driver.set_brightness(percent).await
    }

    pub async fn set_power(&mut self, on: bool) -> Result<(), PidiconError> {
        self.driver.set_power(on).await
    }

    pub async fn reset(&mut self) -> Result<(), PidiconError> {
        self.driver.reset().await
    }

    pub fn is_ready(&self) -> bool {
        self.driver.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn switching_driver_resets_ready_state() {
        let mut dev = DeviceHandle::new(DeviceId::from("10.0.0.1"), DriverKind::Mock, "10.0.0.1");
        dev.push().await.unwrap();
        dev.switch_driver(DriverKind::Mock, "10.0.0.1");
        assert_eq!(dev.driver_kind(), DriverKind::Mock);
    }
}
