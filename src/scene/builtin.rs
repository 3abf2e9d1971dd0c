//! Built-in scene pack (SPEC_FULL.md §2): `empty` and `fill` are the
//! fallback pack installed when discovery finds nothing; `clock` and
//! `chart` are worked examples of the `SceneModule` contract used by the
//! registry's own tests.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::canvas::{Alignment, Color, Point, Size};
use crate::error::PidiconError;
use crate::scene::{RenderContext, RenderOutcome, SceneModule};

/// Clears the canvas and does nothing further. Single-shot.
pub struct EmptyScene;

#[async_trait]
impl SceneModule for EmptyScene {
    fn name(&self) -> &str {
        "empty"
    }

    fn wants_loop(&self) -> bool {
        false
    }

    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<RenderOutcome, PidiconError> {
        ctx.device.clear();
        Ok(RenderOutcome::Finished)
    }
}

/// Fills the canvas with a solid color read from the `color` parameter
/// (an `[r, g, b]` array), defaulting to black. Single-shot.
pub struct FillScene;

#[async_trait]
impl SceneModule for FillScene {
    fn name(&self) -> &str {
        "fill"
    }

    fn wants_loop(&self) -> bool {
        false
    }

    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<RenderOutcome, PidiconError> {
        let color = color_param(ctx.parameter("color")).unwrap_or(Color::BLACK);
        ctx.device.fill_rect(
            Point { x: 0, y: 0 },
            Size { width: 64, height: 64 },
            color,
        );
        Ok(RenderOutcome::Finished)
    }
}

fn color_param(value: Option<&Value>) -> Option<Color> {
    let arr = value?.as_array()?;
    if arr.len() < 3 {
        return None;
    }
    let ch = |i: usize| arr.get(i)?.as_u64().map(|v| v.min(255) as u8);
    Some(Color::rgb(ch(0)?, ch(1)?, ch(2)?))
}

/// Draws HH:MM:SS, re-rendering once a second. Demonstrates a loop-driven
/// scene with no per-tick state beyond the wall clock.
pub struct ClockScene;

#[async_trait]
impl SceneModule for ClockScene {
    fn name(&self) -> &str {
        "clock"
    }

    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<RenderOutcome, PidiconError> {
        let now = chrono::Local::now();
        ctx.device.clear();
        ctx.device.draw_text(
            &now.format("%H:%M:%S").to_string(),
            Point { x: 32, y: 28 },
            Color::WHITE,
            Alignment::Center,
        );
        Ok(RenderOutcome::continue_after(Duration::from_millis(1000)))
    }
}

/// A scrolling bar chart driven by a `scale` parameter, persisted into the
/// scene bag so a parameter update can change it without losing history.
pub struct ChartScene;

#[async_trait]
impl SceneModule for ChartScene {
    fn name(&self) -> &str {
        "chart"
    }

    async fn init(&self, ctx: &mut RenderContext<'_>) -> Result<(), PidiconError> {
        if let Some(scale) = ctx.parameter("scale").and_then(Value::as_f64) {
            ctx.state_set("scale", Value::from(scale));
        }
        if !ctx.state_get("history", Value::Null).is_array() {
            ctx.state_set("history", Value::from(Vec::<f64>::new()));
        }
        Ok(())
    }

    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<RenderOutcome, PidiconError> {
        let scale = ctx.state_get("scale", Value::from(10.0)).as_f64().unwrap_or(10.0);
        let phase = ctx.state_get("phase", Value::from(0u64)).as_u64().unwrap_or(0);

        let mut history: Vec<f64> = ctx
            .state_get("history", Value::from(Vec::<f64>::new()))
            .as_array()
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        let sample = scale * ((phase as f64) * 0.3).sin().abs();
        history.push(sample);
        if history.len() > 64 {
            history.remove(0);
        }

        ctx.device.clear();
        for (x, value) in history.iter().enumerate() {
            let bar_height = (*value).clamp(0.0, 63.0) as u32;
            if bar_height == 0 {
                continue;
            }
            ctx.device.fill_rect(
                Point { x: x as i32, y: 64 - bar_height as i32 },
                Size { width: 1, height: bar_height },
                Color::rgb(0, 200, 255),
            );
        }

        ctx.state_set("history", Value::from(history));
        ctx.state_set("phase", Value::from(phase + 1));

        Ok(RenderOutcome::continue_after(Duration::from_millis(200)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_color_param_parses_rgb_array() {
        let v = Value::from(vec![10u64, 20, 30]);
        let c = color_param(Some(&v)).unwrap();
        assert_eq!(c, Color::rgb(10, 20, 30));
    }

    #[test]
    fn fill_color_param_rejects_short_array() {
        let v = Value::from(vec![10u64]);
        assert!(color_param(Some(&v)).is_none());
    }
}
