//! Splat injection: Gaussian impulses written into the velocity and dye
//! fields at a normalized coordinate.

use crate::config::SimulationConfig;
use crate::passes::{encode_pass, Passes, SolveParams};
use crate::targets::Framebuffers;

/// One queued impulse. Consumed exactly once, in FIFO order, at the start
/// of the tick it was queued before.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatCommand {
    /// Normalized position, origin top-left, clamped to [0, 1].
    pub position: [f32; 2],
    /// Velocity impulse, already motion-scaled by the producer.
    pub delta: [f32; 2],
    /// Dye color, each channel in [0, 1] nominally.
    pub color: [f32; 3],
}

/// Velocity splats are tighter than dye splats by this factor.
const VELOCITY_RADIUS_DIVISOR: f32 = 5.0;

/// Apply one impulse to both fields. `aspect` is the output backing-buffer
/// aspect ratio, so impulses stay circular in device pixels.
pub fn apply(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    passes: &Passes,
    fb: &mut Framebuffers,
    config: &SimulationConfig,
    aspect: f32,
    command: &SplatCommand,
) {
    let velocity_params = SolveParams {
        splat_point: command.position,
        splat_aspect: aspect,
        splat_radius: config.splat_radius / VELOCITY_RADIUS_DIVISOR,
        splat_color: [command.delta[0], command.delta[1], 0.0],
        splat_brightness: 1.0,
        ..Default::default()
    };
    // Splatting straight into the dye at full strength doubles up once the
    // aura re-adds the blurred highlights; damp the dye contribution then.
    let dye_brightness = if config.aura { 0.6 } else { 1.0 };
    let dye_params = SolveParams {
        splat_point: command.position,
        splat_aspect: aspect,
        splat_radius: config.splat_radius,
        splat_color: command.color,
        splat_brightness: dye_brightness,
        ..Default::default()
    };

    queue.write_buffer(&passes.splat_velocity_ubo, 0, bytemuck::bytes_of(&velocity_params));
    queue.write_buffer(&passes.splat_dye_ubo, 0, bytemuck::bytes_of(&dye_params));

    let velocity_uniforms = passes.uniform_group(device, &passes.splat_velocity_ubo);
    let velocity_textures =
        passes.solve_textures(device, &fb.velocity.read().view, &fb.velocity.read().view);
    let dye_uniforms = passes.uniform_group(device, &passes.splat_dye_ubo);
    let dye_textures = passes.solve_textures(device, &fb.dye.read().view, &fb.dye.read().view);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Splat"),
    });
    encode_pass(
        &mut encoder,
        "Splat Velocity",
        &passes.splat_velocity,
        &fb.velocity.write().view,
        wgpu::LoadOp::Load,
        &[&velocity_uniforms, &velocity_textures],
    );
    encode_pass(
        &mut encoder,
        "Splat Dye",
        &passes.splat_dye,
        &fb.dye.write().view,
        wgpu::LoadOp::Load,
        &[&dye_uniforms, &dye_textures],
    );
    queue.submit(std::iter::once(encoder.finish()));

    fb.velocity.swap();
    fb.dye.swap();
}
