//! The engine facade: construction, the per-frame tick, configuration
//! updates, quality presets, splat entry points, diagnostics, and field
//! readback.
//!
//! Scheduling is cooperative and single-threaded: the host invokes
//! [`FluidEngine::tick`] once per display frame. Config updates and
//! resize-driven reallocation only take effect at tick boundaries, so a
//! tick always observes a fully-old or fully-new world.

use std::collections::{BTreeSet, VecDeque};

use anyhow::Result;
use rand::Rng;
use serde::Serialize;

use crate::capability::{self, format_channels, Capabilities};
use crate::compositor;
use crate::config::{
    apply_preset, diff, find_preset, merge, validate, ConfigUpdate, ConfigWarning,
    SimulationConfig,
};
use crate::input::{InputBatcher, MotionEvent};
use crate::passes::Passes;
use crate::postfx;
use crate::solve;
use crate::splat::{self, SplatCommand};
use crate::targets::{Framebuffers, RenderTarget, SurfaceSize};

/// Largest dt a single tick will integrate; a host resuming from a long
/// suspension gets one small step instead of a runaway catch-up.
pub const MAX_DT: f32 = 1.0 / 60.0;

/// One frame's output description, supplied by the host each tick.
pub struct FrameTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub logical_width: f32,
    pub logical_height: f32,
}

/// Observability snapshot for debug overlays.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub backend: String,
    pub adapter: String,
    pub linear_filtering: bool,
    pub manual_filter_active: bool,
    pub composite_mode: String,
    pub sim_resolution: u32,
    pub dye_width: u32,
    pub dye_height: u32,
    pub surface_width: u32,
    pub surface_height: u32,
    pub upscale_ratio: f32,
    pub quality_tier: Option<String>,
    pub running: bool,
    pub config_warnings: usize,
}

pub struct FluidEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: Capabilities,
    config: SimulationConfig,
    explicit: BTreeSet<String>,
    warnings: Vec<ConfigWarning>,
    quality_tier: Option<String>,
    passes: Passes,
    fb: Framebuffers,
    input: InputBatcher,
    splat_queue: VecDeque<SplatCommand>,
    running: bool,
    force_resize: bool,
    pending_realloc: bool,
    surface: SurfaceSize,
    upscale_ratio: f32,
    clear_color: wgpu::Color,
    time: f64,
}

impl FluidEngine {
    /// Build the engine or fail outright; a half-initialized engine is
    /// never returned. Capability probing and pipeline creation both
    /// happen here, synchronously.
    pub fn new(
        adapter: &wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        overrides: ConfigUpdate,
    ) -> Result<Self> {
        let caps = capability::probe(adapter)?;

        let mut config = merge(&SimulationConfig::default(), &overrides);
        let warnings = validate(&mut config);
        for warning in &warnings {
            eprintln!("dyeflow config: {}", warning.message);
        }
        let explicit = overrides.explicit_keys();

        let passes = Passes::new(&device, &caps, surface_format)?;
        // Real surface dimensions arrive with the first tick; start from a
        // placeholder so the first tick's resize check reallocates.
        let surface = SurfaceSize {
            width: 1,
            height: 1,
        };
        let fb = Framebuffers::new(&device, &queue, &caps, &config, surface);
        let clear_color = clear_color_for(&config);

        Ok(Self {
            device,
            queue,
            caps,
            config,
            explicit,
            warnings,
            quality_tier: None,
            passes,
            fb,
            input: InputBatcher::new(),
            splat_queue: VecDeque::new(),
            running: false,
            force_resize: false,
            pending_realloc: false,
            surface,
            upscale_ratio: 1.0,
            clear_color,
            time: 0.0,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// The engine's accumulated simulation clock, in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Clamp warnings from the most recent config merge.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    /// Idempotent: starting a running engine is a no-op.
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Idempotent: stopping releases no GPU state; resources persist until
    /// the engine is dropped.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Force the next tick to re-check surface dimensions and reallocate.
    pub fn force_resize_check(&mut self) {
        self.force_resize = true;
    }

    /// Queue one impulse; applied FIFO at the start of the next tick.
    pub fn splat(&mut self, x: f32, y: f32, dx: f32, dy: f32, color: [f32; 3]) {
        self.splat_queue.push_back(SplatCommand {
            position: [x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)],
            delta: [dx, dy],
            color,
        });
    }

    /// Queue `amount` randomized impulses for ambient motion.
    pub fn multiple_splats(&mut self, amount: u32) {
        let mut rng = rand::thread_rng();
        for _ in 0..amount {
            let color = [
                rng.gen::<f32>() * 0.3 + 0.1,
                rng.gen::<f32>() * 0.3 + 0.1,
                rng.gen::<f32>() * 0.3 + 0.1,
            ];
            let x = rng.gen::<f32>();
            let y = rng.gen::<f32>();
            let dx = 10.0 * (rng.gen::<f32>() - 0.5);
            let dy = 10.0 * (rng.gen::<f32>() - 0.5);
            self.splat(x, y, dx, dy, color);
        }
    }

    /// Feed one raw coordinate event into the batching layer.
    pub fn push_input(&mut self, event: MotionEvent) {
        self.input.push(event, &self.config, self.time);
    }

    /// A pointer contact ended; its stream state is discarded.
    pub fn end_input_stream(&mut self, id: u64) {
        self.input.end_stream(id);
    }

    /// Merge a partial update over the current config. Takes effect at the
    /// next tick boundary; returns the clamp warnings, which are also kept
    /// for diagnostics.
    pub fn update_config(&mut self, update: ConfigUpdate) -> Vec<ConfigWarning> {
        let mut next = merge(&self.config, &update);
        let warnings = validate(&mut next);
        for warning in &warnings {
            eprintln!("dyeflow config: {}", warning.message);
        }
        let effects = diff(&self.config, &next);
        self.config = next;
        if effects.any_realloc() {
            self.pending_realloc = true;
        }
        if effects.clear_color {
            self.clear_color = clear_color_for(&self.config);
        }
        self.warnings = warnings.clone();
        warnings
    }

    /// Apply a named quality preset without touching keys the caller set
    /// explicitly at construction. Returns false for an unknown name.
    pub fn apply_quality_preset(&mut self, name: &str) -> bool {
        let Some(preset) = find_preset(name) else {
            return false;
        };
        let next = apply_preset(&self.config, preset, &self.explicit);
        let effects = diff(&self.config, &next);
        self.config = next;
        if effects.any_realloc() {
            self.pending_realloc = true;
        }
        self.quality_tier = Some(preset.name.to_string());
        true
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let plan = compositor::plan(&self.caps, &self.config, self.upscale_ratio);
        Diagnostics {
            backend: format!("{:?}", self.caps.backend),
            adapter: self.caps.adapter_name.clone(),
            linear_filtering: self.caps.linear_filterable,
            manual_filter_active: plan.manual_filter,
            composite_mode: plan.mode().to_string(),
            sim_resolution: self.fb.velocity.read().width,
            dye_width: self.fb.dye.read().width,
            dye_height: self.fb.dye.read().height,
            surface_width: self.surface.width,
            surface_height: self.surface.height,
            upscale_ratio: self.upscale_ratio,
            quality_tier: self.quality_tier.clone(),
            running: self.running,
            config_warnings: self.warnings.len(),
        }
    }

    /// Advance one frame. `dt` is wall-clock seconds since the previous
    /// tick, clamped to [0, 1/60]. A zero-area frame renders nothing.
    pub fn tick(&mut self, dt: f32, frame: &FrameTarget) {
        if !self.running {
            return;
        }
        if frame.pixel_width == 0 || frame.pixel_height == 0 {
            return;
        }
        let dt = if dt.is_finite() {
            dt.clamp(0.0, MAX_DT)
        } else {
            MAX_DT
        };
        self.time += dt as f64;

        let surface = SurfaceSize::capped(
            frame.pixel_width,
            frame.pixel_height,
            frame.logical_width,
            frame.logical_height,
            self.config.dpr_cap,
        );
        if surface != self.surface || self.force_resize || self.pending_realloc {
            self.surface = surface;
            self.fb
                .reallocate(&self.device, &self.queue, &self.caps, &self.config, surface);
            self.force_resize = false;
            self.pending_realloc = false;
        }

        {
            let dye = self.fb.dye.read();
            self.upscale_ratio = (surface.width as f32 / dye.width as f32)
                .max(surface.height as f32 / dye.height as f32);
        }
        let plan = compositor::plan(&self.caps, &self.config, self.upscale_ratio);

        let flushed = self.input.maybe_flush(&self.config, self.time);
        self.splat_queue.extend(flushed);
        let aspect = surface.aspect();
        while let Some(command) = self.splat_queue.pop_front() {
            splat::apply(
                &self.device,
                &self.queue,
                &self.passes,
                &mut self.fb,
                &self.config,
                aspect,
                &command,
            );
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Tick"),
            });
        solve::run(
            &self.device,
            &self.queue,
            &self.passes,
            &mut self.fb,
            &self.config,
            dt,
            plan.manual_filter,
            &mut encoder,
        );
        if self.config.aura {
            postfx::run_aura(
                &self.device,
                &self.queue,
                &self.passes,
                &self.fb,
                &self.config,
                &mut encoder,
            );
        }
        if self.config.ray_aura {
            postfx::run_ray_aura(
                &self.device,
                &self.queue,
                &self.passes,
                &self.fb,
                &self.config,
                &mut encoder,
            );
        }
        compositor::composite(
            &self.device,
            &self.queue,
            &self.passes,
            &self.fb,
            &self.config,
            plan,
            self.clear_color,
            frame.view,
            &mut encoder,
        );
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn dye_dimensions(&self) -> (u32, u32) {
        (self.fb.dye.read().width, self.fb.dye.read().height)
    }

    pub fn sim_dimensions(&self) -> (u32, u32) {
        (self.fb.velocity.read().width, self.fb.velocity.read().height)
    }

    /// Read the dye field back as RGBA texels, row-major from the top-left.
    pub fn read_dye(&self) -> Vec<[f32; 4]> {
        let channels = format_channels(self.caps.dye_format) as usize;
        let raw = self.read_target(self.fb.dye.read());
        raw.chunks(channels)
            .map(|texel| {
                let mut out = [0.0f32; 4];
                out[..channels.min(4)].copy_from_slice(&texel[..channels.min(4)]);
                out
            })
            .collect()
    }

    pub fn read_velocity(&self) -> Vec<[f32; 2]> {
        let channels = format_channels(self.caps.velocity_format) as usize;
        let raw = self.read_target(self.fb.velocity.read());
        raw.chunks(channels)
            .map(|texel| [texel[0], texel[1]])
            .collect()
    }

    pub fn read_pressure(&self) -> Vec<f32> {
        let channels = format_channels(self.caps.scalar_format) as usize;
        let raw = self.read_target(self.fb.pressure.read());
        raw.chunks(channels).map(|texel| texel[0]).collect()
    }

    /// Copy a half-float target into a staging buffer and decode it.
    fn read_target(&self, target: &RenderTarget) -> Vec<f32> {
        let channels = format_channels(target.format);
        let bytes_per_pixel = channels * 2;
        let unpadded_bytes_per_row = target.width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback"),
            size: (padded_bytes_per_row * target.height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Field Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.receive())
            .expect("readback channel closed")
            .expect("field readback failed");

        let data = slice.get_mapped_range();
        let mut values =
            Vec::with_capacity((target.width * target.height * channels) as usize);
        for row in 0..target.height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            for half in data[start..end].chunks_exact(2) {
                values.push(f16_to_f32(u16::from_le_bytes([half[0], half[1]])));
            }
        }
        drop(data);
        staging.unmap();
        values
    }
}

fn clear_color_for(config: &SimulationConfig) -> wgpu::Color {
    if config.transparent {
        wgpu::Color::TRANSPARENT
    } else {
        wgpu::Color {
            r: config.back_color[0] as f64 / 255.0,
            g: config.back_color[1] as f64 / 255.0,
            b: config.back_color[2] as f64 / 255.0,
            a: 1.0,
        }
    }
}

/// Decode an IEEE 754 binary16 value. Half-float targets read back as raw
/// bits; keeping the conversion local avoids a dependency for 20 lines.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) as u32;
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let mantissa = (bits & 0x3ff) as u32;

    let out = if exponent == 0 {
        if mantissa == 0 {
            sign << 31
        } else {
            // subnormal: renormalize into f32 range
            let mut exponent = 113u32;
            let mut mantissa = mantissa;
            while mantissa & 0x400 == 0 {
                mantissa <<= 1;
                exponent -= 1;
            }
            (sign << 31) | (exponent << 23) | ((mantissa & 0x3ff) << 13)
        }
    } else if exponent == 0x1f {
        (sign << 31) | (0xff << 23) | (mantissa << 13)
    } else {
        (sign << 31) | ((exponent + 112) << 23) | (mantissa << 13)
    };
    f32::from_bits(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f16_decodes_common_values() {
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert_eq!(f16_to_f32(0x7c00), f32::INFINITY);
        assert!((f16_to_f32(0x3555) - 0.333_25).abs() < 1e-4);
        // smallest positive subnormal
        assert!((f16_to_f32(0x0001) - 5.960_464_5e-8).abs() < 1e-12);
        assert!(f16_to_f32(0x7e00).is_nan());
    }

    #[test]
    fn max_dt_caps_catch_up() {
        assert!((MAX_DT - 1.0 / 60.0).abs() < 1e-9);
    }
}
