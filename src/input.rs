//! Input batching and throttling: raw coordinate events in, discrete
//! splat commands out.
//!
//! Fast motion across a long frame gap is split into interpolated
//! substeps so a stroke stays a stroke; bursts of events collapse into one
//! batched flush per throttle window. Time is the engine's simulation
//! clock, passed in explicitly, so the layer is deterministic under test.

use std::collections::HashMap;

use rand::Rng;

use crate::config::{ColorTheme, SimulationConfig};
use crate::splat::SplatCommand;

/// One raw coordinate event from the host's pointer stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEvent {
    /// Stream identity (pointer/touch contact id).
    pub id: u64,
    /// Normalized position, origin top-left.
    pub x: f32,
    pub y: f32,
    /// Explicit normalized motion delta; derived from the previous
    /// coordinate of the same stream when absent.
    pub dx: Option<f32>,
    pub dy: Option<f32>,
    /// Explicit dye color; generated from config when absent.
    pub color: Option<[f32; 3]>,
}

pub struct InputBatcher {
    last_pos: HashMap<u64, (f32, f32)>,
    pending: Vec<SplatCommand>,
    last_flush: f64,
}

impl Default for InputBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBatcher {
    pub fn new() -> Self {
        Self {
            last_pos: HashMap::new(),
            pending: Vec::new(),
            last_flush: f64::NEG_INFINITY,
        }
    }

    /// Queue one raw event. Malformed coordinates are dropped without
    /// error; out-of-range coordinates are clamped.
    pub fn push(&mut self, event: MotionEvent, config: &SimulationConfig, now: f64) {
        if !event.x.is_finite() || !event.y.is_finite() {
            return;
        }
        let x = event.x.clamp(0.0, 1.0);
        let y = event.y.clamp(0.0, 1.0);

        let prev = self.last_pos.get(&event.id).copied();
        let (dx, dy) = match (event.dx, event.dy) {
            (Some(dx), Some(dy)) if dx.is_finite() && dy.is_finite() => (dx, dy),
            _ => match prev {
                Some((px, py)) => (x - px, y - py),
                None => (0.0, 0.0),
            },
        };
        self.last_pos.insert(event.id, (x, y));

        let first_contact = prev.is_none();
        let below_threshold =
            dx.abs() < config.min_input_delta && dy.abs() < config.min_input_delta;
        // Sub-threshold jitter is noise, except an explicitly colored event
        // (an intentional stationary splat) or the first contact of a stream.
        if below_threshold && !first_contact && event.color.is_none() {
            return;
        }

        let color = event
            .color
            .unwrap_or_else(|| stroke_color(config, [dx, dy], first_contact, now));

        let dist = (dx * dx + dy * dy).sqrt();
        let steps = ((dist / config.max_substep_length).ceil() as u32)
            .clamp(1, config.max_splat_substeps.max(1));
        let start = [x - dx, y - dy];
        let step_delta = [
            dx * config.splat_force / steps as f32,
            dy * config.splat_force / steps as f32,
        ];
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            self.pending.push(SplatCommand {
                position: [
                    (start[0] + dx * t).clamp(0.0, 1.0),
                    (start[1] + dy * t).clamp(0.0, 1.0),
                ],
                delta: step_delta,
                color,
            });
        }
    }

    /// Forget a stream's last coordinate (contact released); the next event
    /// with the same id starts a fresh stroke.
    pub fn end_stream(&mut self, id: u64) {
        self.last_pos.remove(&id);
    }

    /// Drain the pending batch if a full throttle window has elapsed since
    /// the previous flush. Returns an empty vector otherwise.
    pub fn maybe_flush(&mut self, config: &SimulationConfig, now: f64) -> Vec<SplatCommand> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        if now - self.last_flush < config.input_throttle as f64 {
            return Vec::new();
        }
        self.last_flush = now;
        std::mem::take(&mut self.pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Dye color for a stroke segment when the event carries none.
fn stroke_color(config: &SimulationConfig, delta: [f32; 2], first_contact: bool, now: f64) -> [f32; 3] {
    if !config.colorful {
        return [0.3, 0.3, 0.3];
    }
    let mut rng = rand::thread_rng();
    if first_contact {
        return [
            rng.gen::<f32>() * 0.5 + 0.1,
            rng.gen::<f32>() * 0.5 + 0.1,
            rng.gen::<f32>() * 0.5 + 0.1,
        ];
    }
    let speed = (delta[0] * delta[0] + delta[1] * delta[1]).sqrt();
    let brightness = (speed * 4.0).min(1.0);
    let angle = delta[1].atan2(delta[0]);
    let hue = match &config.color_theme {
        ColorTheme::Named(_) => {
            ((angle / std::f32::consts::TAU + 0.5) as f64 + now * 0.1).rem_euclid(1.0) as f32
        }
        ColorTheme::Fixed(hue) => hue.rem_euclid(1.0),
        ColorTheme::Range([min, max]) => (rng.gen::<f32>() * (max - min) + min).rem_euclid(1.0),
    };
    let (r, g, b) = hsv_to_rgb(hue, 0.8, 1.0);
    [r * brightness, g * brightness, b * brightness]
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match (i as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            input_throttle: 0.040,
            splat_force: 1000.0,
            ..Default::default()
        }
    }

    fn event(x: f32, y: f32) -> MotionEvent {
        MotionEvent {
            id: 0,
            x,
            y,
            dx: None,
            dy: None,
            color: None,
        }
    }

    #[test]
    fn burst_coalesces_into_one_flush() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(0.30, 0.50), &config, 0.000);
        batcher.push(event(0.35, 0.50), &config, 0.005);

        let mut non_empty_flushes = 0;
        for tick in 0..10 {
            let now = 0.005 + tick as f64 * 0.016;
            if !batcher.maybe_flush(&config, now).is_empty() {
                non_empty_flushes += 1;
            }
        }
        assert_eq!(non_empty_flushes, 1);
    }

    #[test]
    fn flush_waits_out_the_throttle_window() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(0.3, 0.5), &config, 0.0);
        assert!(!batcher.maybe_flush(&config, 0.0).is_empty());

        batcher.push(event(0.4, 0.5), &config, 0.010);
        // still inside the 40ms window measured from the last flush
        assert!(batcher.maybe_flush(&config, 0.020).is_empty());
        assert!(batcher.maybe_flush(&config, 0.039).is_empty());
        assert!(!batcher.maybe_flush(&config, 0.041).is_empty());
    }

    #[test]
    fn fast_motion_splits_into_bounded_substeps() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(0.1, 0.5), &config, 0.0);
        batcher.maybe_flush(&config, 0.0);

        // A sweep across most of the surface in one event.
        batcher.push(event(0.9, 0.5), &config, 0.016);
        let commands = batcher.maybe_flush(&config, 0.1);
        let expected = ((0.8f32 / config.max_substep_length).ceil() as u32)
            .min(config.max_splat_substeps) as usize;
        assert_eq!(commands.len(), expected);
        assert!(commands.len() > 1);

        // Positions march monotonically toward the end point...
        for pair in commands.windows(2) {
            assert!(pair[1].position[0] > pair[0].position[0]);
        }
        assert!((commands.last().unwrap().position[0] - 0.9).abs() < 1e-5);
        // ...and the per-substep delta is the total divided evenly.
        let total_dx: f32 = commands.iter().map(|c| c.delta[0]).sum();
        assert!((total_dx - 0.8 * config.splat_force).abs() < 1.0);
    }

    #[test]
    fn sub_threshold_motion_dropped_unless_colored() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(0.5, 0.5), &config, 0.0); // first contact splats
        assert_eq!(batcher.pending_len(), 1);

        batcher.push(event(0.5 + 1e-6, 0.5), &config, 0.01);
        assert_eq!(batcher.pending_len(), 1); // jitter dropped

        batcher.push(
            MotionEvent {
                color: Some([1.0, 0.0, 0.0]),
                ..event(0.5, 0.5)
            },
            &config,
            0.02,
        );
        assert_eq!(batcher.pending_len(), 2); // intentional stationary splat
    }

    #[test]
    fn malformed_coordinates_are_dropped() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(f32::NAN, 0.5), &config, 0.0);
        batcher.push(event(0.5, f32::INFINITY), &config, 0.0);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[test]
    fn out_of_range_coordinates_are_clamped() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(1.7, -0.3), &config, 0.0);
        let commands = batcher.maybe_flush(&config, 0.0);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].position, [1.0, 0.0]);
    }

    #[test]
    fn delta_derived_from_last_consumed_coordinate() {
        let config = config();
        let mut batcher = InputBatcher::new();
        batcher.push(event(0.2, 0.2), &config, 0.0);
        batcher.maybe_flush(&config, 0.0);

        batcher.push(event(0.5, 0.2), &config, 0.016);
        let commands = batcher.maybe_flush(&config, 0.1);
        let total_dx: f32 = commands.iter().map(|c| c.delta[0]).sum();
        assert!((total_dx - 0.3 * config.splat_force).abs() < 1.0);

        // After the stream ends the next event is a fresh first contact.
        batcher.end_stream(0);
        batcher.push(event(0.9, 0.9), &config, 0.2);
        let commands = batcher.maybe_flush(&config, 0.2);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].delta, [0.0, 0.0]);
    }
}
