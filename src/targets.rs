//! Render targets, double buffers, and the resource manager that owns
//! every simulation field.
//!
//! All targets are exclusively owned here; external callers never write
//! into them. Reallocation is idempotent per target and never preserves
//! contents (a resize visibly clears the field, which is accepted).

use crate::capability::Capabilities;
use crate::config::{SimulationConfig, DYE_RESOLUTION_FLOOR};

/// A GPU texture plus its attachment metadata.
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

impl RenderTarget {
    /// Create a target and clear it to zero so the first read never sees
    /// undefined memory.
    pub fn create(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Target Clear"),
        });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Target Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        queue.submit(std::iter::once(encoder.finish()));

        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.width as f32, 1.0 / self.height as f32]
    }

    fn matches(&self, width: u32, height: u32, format: wgpu::TextureFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }
}

/// A read/write pair swapped after each in-place update.
///
/// Exactly one half is "read" (current) at any time; `swap` twice is the
/// identity. Generic so the invariant is testable without a GPU.
pub struct DoubleBuffer<T> {
    pair: [T; 2],
    current: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(read: T, write: T) -> Self {
        Self {
            pair: [read, write],
            current: 0,
        }
    }

    pub fn read(&self) -> &T {
        &self.pair[self.current]
    }

    pub fn write(&self) -> &T {
        &self.pair[1 - self.current]
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }
}

/// Physical output size after applying the device-pixel-ratio cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    /// Cap the backing size at `logical * dpr_cap` so very dense displays
    /// do not force oversized targets.
    pub fn capped(
        pixel_width: u32,
        pixel_height: u32,
        logical_width: f32,
        logical_height: f32,
        dpr_cap: f32,
    ) -> Self {
        let max_w = (logical_width * dpr_cap).round() as u32;
        let max_h = (logical_height * dpr_cap).round() as u32;
        Self {
            width: pixel_width.min(max_w.max(1)),
            height: pixel_height.min(max_h.max(1)),
        }
    }

    pub fn max_dim(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Dye size under the auto policy: half the surface backing size, floored
/// and capped, then re-raised (still capped) whenever the surface-to-dye
/// upscale would exceed `max_upscale`.
pub fn auto_dye_size(surface_max_dim: u32, config: &SimulationConfig) -> u32 {
    let cap = config.dye_resolution;
    let floor = DYE_RESOLUTION_FLOOR.min(cap);
    let mut dye = (surface_max_dim / 2).clamp(floor, cap);
    let upscale = surface_max_dim as f32 / dye as f32;
    if upscale > config.max_upscale {
        let wanted = (surface_max_dim as f32 / config.max_upscale).ceil() as u32;
        dye = wanted.clamp(floor, cap);
    }
    dye
}

/// Effective dye texture size for the current config and surface.
pub fn dye_size(config: &SimulationConfig, surface: SurfaceSize, caps: &Capabilities) -> u32 {
    let size = if config.auto_dye_resolution {
        auto_dye_size(surface.max_dim(), config)
    } else {
        config.dye_resolution
    };
    size.min(caps.max_texture_dimension)
}

/// Every field the pipeline renders into. Double buffers for fields that
/// advect through or update themselves; single targets for derived fields.
pub struct Framebuffers {
    pub velocity: DoubleBuffer<RenderTarget>,
    pub dye: DoubleBuffer<RenderTarget>,
    pub pressure: DoubleBuffer<RenderTarget>,
    pub divergence: RenderTarget,
    pub curl: RenderTarget,
    pub aura: RenderTarget,
    pub aura_temp: RenderTarget,
    pub aura_mask: RenderTarget,
    pub ray_aura: RenderTarget,
    pub ray_aura_mask: RenderTarget,
    // 8-bit fallback chain, allocated only while that path is enabled.
    pub dye8: Option<RenderTarget>,
    pub display8: Option<RenderTarget>,
    pub sharpen8: Option<RenderTarget>,
}

impl Framebuffers {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        caps: &Capabilities,
        config: &SimulationConfig,
        surface: SurfaceSize,
    ) -> Self {
        let sim = config.sim_resolution.min(caps.max_texture_dimension);
        let dye = dye_size(config, surface, caps);
        let aura_res = config.aura_resolution.min(caps.max_texture_dimension);
        let ray_res = config.ray_aura_resolution.min(caps.max_texture_dimension);

        let double = |label_a: &str, label_b: &str, size: u32, format| {
            DoubleBuffer::new(
                RenderTarget::create(device, queue, label_a, size, size, format),
                RenderTarget::create(device, queue, label_b, size, size, format),
            )
        };

        let mut fb = Self {
            velocity: double("Velocity A", "Velocity B", sim, caps.velocity_format),
            dye: double("Dye A", "Dye B", dye, caps.dye_format),
            pressure: double("Pressure A", "Pressure B", sim, caps.scalar_format),
            divergence: RenderTarget::create(device, queue, "Divergence", sim, sim, caps.scalar_format),
            curl: RenderTarget::create(device, queue, "Curl", sim, sim, caps.scalar_format),
            aura: RenderTarget::create(device, queue, "Aura", aura_res, aura_res, caps.dye_format),
            aura_temp: RenderTarget::create(device, queue, "Aura Temp", aura_res, aura_res, caps.dye_format),
            aura_mask: RenderTarget::create(device, queue, "Aura Mask", aura_res, aura_res, caps.dye_format),
            ray_aura: RenderTarget::create(device, queue, "Ray Aura", ray_res, ray_res, caps.dye_format),
            ray_aura_mask: RenderTarget::create(device, queue, "Ray Aura Mask", ray_res, ray_res, caps.dye_format),
            dye8: None,
            display8: None,
            sharpen8: None,
        };
        fb.reallocate_eight_bit(device, queue, config, surface);
        fb
    }

    /// Bring every target in line with the current config and surface size.
    /// A target whose dimensions already match is left untouched.
    pub fn reallocate(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        caps: &Capabilities,
        config: &SimulationConfig,
        surface: SurfaceSize,
    ) {
        let sim = config.sim_resolution.min(caps.max_texture_dimension);
        let dye = dye_size(config, surface, caps);
        let aura_res = config.aura_resolution.min(caps.max_texture_dimension);
        let ray_res = config.ray_aura_resolution.min(caps.max_texture_dimension);

        ensure_double(device, queue, &mut self.velocity, "Velocity A", "Velocity B", sim, caps.velocity_format);
        ensure_double(device, queue, &mut self.dye, "Dye A", "Dye B", dye, caps.dye_format);
        ensure_double(device, queue, &mut self.pressure, "Pressure A", "Pressure B", sim, caps.scalar_format);
        ensure_single(device, queue, &mut self.divergence, "Divergence", sim, caps.scalar_format);
        ensure_single(device, queue, &mut self.curl, "Curl", sim, caps.scalar_format);
        ensure_single(device, queue, &mut self.aura, "Aura", aura_res, caps.dye_format);
        ensure_single(device, queue, &mut self.aura_temp, "Aura Temp", aura_res, caps.dye_format);
        ensure_single(device, queue, &mut self.aura_mask, "Aura Mask", aura_res, caps.dye_format);
        ensure_single(device, queue, &mut self.ray_aura, "Ray Aura", ray_res, caps.dye_format);
        ensure_single(device, queue, &mut self.ray_aura_mask, "Ray Aura Mask", ray_res, caps.dye_format);
        self.reallocate_eight_bit(device, queue, config, surface);
    }

    fn reallocate_eight_bit(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: &SimulationConfig,
        surface: SurfaceSize,
    ) {
        if !config.eight_bit_fallback || surface.width == 0 || surface.height == 0 {
            self.dye8 = None;
            self.display8 = None;
            self.sharpen8 = None;
            return;
        }
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let (w, h) = (surface.width, surface.height);
        let stale = |t: &Option<RenderTarget>| !matches!(t, Some(t) if t.matches(w, h, format));
        if stale(&self.dye8) {
            self.dye8 = Some(RenderTarget::create(device, queue, "Dye 8-bit", w, h, format));
        }
        if stale(&self.display8) {
            self.display8 = Some(RenderTarget::create(device, queue, "Display 8-bit", w, h, format));
        }
        if stale(&self.sharpen8) {
            self.sharpen8 = Some(RenderTarget::create(device, queue, "Sharpen 8-bit", w, h, format));
        }
    }
}

fn ensure_single(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    target: &mut RenderTarget,
    label: &str,
    size: u32,
    format: wgpu::TextureFormat,
) {
    if !target.matches(size, size, format) {
        *target = RenderTarget::create(device, queue, label, size, size, format);
    }
}

fn ensure_double(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &mut DoubleBuffer<RenderTarget>,
    label_a: &str,
    label_b: &str,
    size: u32,
    format: wgpu::TextureFormat,
) {
    if !buffer.read().matches(size, size, format) {
        *buffer = DoubleBuffer::new(
            RenderTarget::create(device, queue, label_a, size, size, format),
            RenderTarget::create(device, queue, label_b, size, size, format),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    #[test]
    fn swap_is_an_involution() {
        let mut buffer = DoubleBuffer::new(1, 2);
        assert_eq!(*buffer.read(), 1);
        assert_eq!(*buffer.write(), 2);
        buffer.swap();
        assert_eq!(*buffer.read(), 2);
        assert_eq!(*buffer.write(), 1);
        buffer.swap();
        assert_eq!(*buffer.read(), 1);
        assert_eq!(*buffer.write(), 2);
    }

    #[test]
    fn auto_dye_respects_floor_and_cap() {
        let config = SimulationConfig {
            dye_resolution: 1024,
            max_upscale: 2.0,
            ..Default::default()
        };
        // tiny surface -> floor
        assert_eq!(auto_dye_size(100, &config), 256);
        // mid surface -> half the backing size
        assert_eq!(auto_dye_size(800, &config), 400);
        // large surface -> still half, capped at the configured maximum
        assert_eq!(auto_dye_size(3000, &config), 1024);
    }

    #[test]
    fn auto_dye_recomputes_when_upscale_exceeded() {
        let config = SimulationConfig {
            dye_resolution: 2048,
            max_upscale: 1.5,
            ..Default::default()
        };
        // half-size 1200 would be a 2x upscale; policy raises dye to 1600
        assert_eq!(auto_dye_size(2400, &config), 1600);
        // the cap wins even when the upscale stays above the limit
        assert_eq!(auto_dye_size(6000, &config), 2048);
    }

    #[test]
    fn surface_size_caps_by_dpr() {
        let size = SurfaceSize::capped(1600, 1200, 400.0, 300.0, 2.0);
        assert_eq!(size, SurfaceSize { width: 800, height: 600 });
        // backing smaller than the cap passes through
        let size = SurfaceSize::capped(500, 400, 400.0, 300.0, 2.0);
        assert_eq!(size, SurfaceSize { width: 500, height: 400 });
    }
}
