//! Optional additive post effects: the aura (separable-blur bloom) and the
//! ray aura (radial light-shaft accumulation), both driven by a brightness
//! mask of the dye field.

use crate::config::SimulationConfig;
use crate::passes::{encode_pass, Passes, PostfxParams};
use crate::targets::Framebuffers;

/// Mask the dye, then blur horizontally into the temp target and
/// vertically into the aura target.
pub fn run_aura(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    passes: &Passes,
    fb: &Framebuffers,
    config: &SimulationConfig,
    encoder: &mut wgpu::CommandEncoder,
) {
    let mask_texel = fb.aura_mask.texel_size();

    queue.write_buffer(&passes.mask_ubo, 0, bytemuck::bytes_of(&PostfxParams::default()));
    queue.write_buffer(
        &passes.blur_h_ubo,
        0,
        bytemuck::bytes_of(&PostfxParams {
            texel: [mask_texel[0], 0.0],
            weight: config.aura_weight,
            _pad: 0.0,
        }),
    );
    queue.write_buffer(
        &passes.blur_v_ubo,
        0,
        bytemuck::bytes_of(&PostfxParams {
            texel: [0.0, mask_texel[1]],
            weight: config.aura_weight,
            _pad: 0.0,
        }),
    );

    let mask_uniforms = passes.uniform_group(device, &passes.mask_ubo);
    let mask_source = passes.single_texture(device, &fb.dye.read().view);
    encode_pass(
        encoder,
        "Aura Mask",
        &passes.mask,
        &fb.aura_mask.view,
        wgpu::LoadOp::Load,
        &[&mask_uniforms, &mask_source],
    );

    let blur_h_uniforms = passes.uniform_group(device, &passes.blur_h_ubo);
    let blur_h_source = passes.single_texture(device, &fb.aura_mask.view);
    encode_pass(
        encoder,
        "Aura Blur H",
        &passes.blur,
        &fb.aura_temp.view,
        wgpu::LoadOp::Load,
        &[&blur_h_uniforms, &blur_h_source],
    );

    let blur_v_uniforms = passes.uniform_group(device, &passes.blur_v_ubo);
    let blur_v_source = passes.single_texture(device, &fb.aura_temp.view);
    encode_pass(
        encoder,
        "Aura Blur V",
        &passes.blur,
        &fb.aura.view,
        wgpu::LoadOp::Load,
        &[&blur_v_uniforms, &blur_v_source],
    );
}

/// Mask the dye, then accumulate radially from the image center. Blending
/// stays disabled so nothing double-accumulates.
pub fn run_ray_aura(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    passes: &Passes,
    fb: &Framebuffers,
    config: &SimulationConfig,
    encoder: &mut wgpu::CommandEncoder,
) {
    queue.write_buffer(&passes.mask_ubo, 0, bytemuck::bytes_of(&PostfxParams::default()));
    queue.write_buffer(
        &passes.rays_ubo,
        0,
        bytemuck::bytes_of(&PostfxParams {
            texel: [0.0, 0.0],
            weight: config.ray_aura_weight,
            _pad: 0.0,
        }),
    );

    let mask_uniforms = passes.uniform_group(device, &passes.mask_ubo);
    let mask_source = passes.single_texture(device, &fb.dye.read().view);
    encode_pass(
        encoder,
        "Ray Aura Mask",
        &passes.mask,
        &fb.ray_aura_mask.view,
        wgpu::LoadOp::Load,
        &[&mask_uniforms, &mask_source],
    );

    let rays_uniforms = passes.uniform_group(device, &passes.rays_ubo);
    let rays_source = passes.single_texture(device, &fb.ray_aura_mask.view);
    encode_pass(
        encoder,
        "Ray Aura",
        &passes.rays,
        &fb.ray_aura.view,
        wgpu::LoadOp::Load,
        &[&rays_uniforms, &rays_source],
    );
}
