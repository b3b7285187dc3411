//! The per-tick solve sequence: one fixed order of GPU passes advancing
//! the velocity and dye fields. No branching beyond feature toggles; every
//! pass has a strict data dependency on the previous one.

use crate::config::{SimulationConfig, REFERENCE_SIM_RESOLUTION};
use crate::passes::{encode_pass, Passes, SolveParams};
use crate::targets::Framebuffers;

/// Encode one simulation step into `encoder`. All uniform writes happen
/// through the queue and land before the caller's single submit.
#[allow(clippy::too_many_arguments)]
pub fn run(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    passes: &Passes,
    fb: &mut Framebuffers,
    config: &SimulationConfig,
    dt: f32,
    manual_filter: bool,
    encoder: &mut wgpu::CommandEncoder,
) {
    let sim_texel = fb.velocity.read().texel_size();
    let dye_texel = fb.dye.read().texel_size();
    let manual = manual_filter as u32;

    // Confinement strength is resolution-independent: the configured value
    // is nominal at the reference grid size.
    let curl_strength =
        config.curl * (REFERENCE_SIM_RESOLUTION / fb.velocity.read().width.max(1) as f32);

    let grid = SolveParams {
        texel: sim_texel,
        ..Default::default()
    };
    queue.write_buffer(&passes.curl_ubo, 0, bytemuck::bytes_of(&grid));
    queue.write_buffer(&passes.divergence_ubo, 0, bytemuck::bytes_of(&grid));
    queue.write_buffer(&passes.pressure_ubo, 0, bytemuck::bytes_of(&grid));
    queue.write_buffer(&passes.gradient_ubo, 0, bytemuck::bytes_of(&grid));
    queue.write_buffer(
        &passes.vorticity_ubo,
        0,
        bytemuck::bytes_of(&SolveParams {
            texel: sim_texel,
            dt,
            curl_strength,
            ..Default::default()
        }),
    );
    queue.write_buffer(
        &passes.advect_velocity_ubo,
        0,
        bytemuck::bytes_of(&SolveParams {
            texel: sim_texel,
            source_texel: sim_texel,
            dt,
            dissipation: config.velocity_dissipation,
            manual_filter: manual,
            ..Default::default()
        }),
    );
    queue.write_buffer(
        &passes.advect_dye_ubo,
        0,
        bytemuck::bytes_of(&SolveParams {
            texel: sim_texel,
            source_texel: dye_texel,
            dt,
            dissipation: config.density_dissipation,
            manual_filter: manual,
            ..Default::default()
        }),
    );

    // 1. Self-advect velocity.
    {
        let uniforms = passes.uniform_group(device, &passes.advect_velocity_ubo);
        let textures = passes.solve_textures(
            device,
            &fb.velocity.read().view,
            &fb.velocity.read().view,
        );
        encode_pass(
            encoder,
            "Advect Velocity",
            &passes.advect_velocity,
            &fb.velocity.write().view,
            wgpu::LoadOp::Load,
            &[&uniforms, &textures],
        );
        fb.velocity.swap();
    }

    // 2. Curl.
    {
        let uniforms = passes.uniform_group(device, &passes.curl_ubo);
        let textures =
            passes.solve_textures(device, &fb.velocity.read().view, &fb.velocity.read().view);
        encode_pass(
            encoder,
            "Curl",
            &passes.curl,
            &fb.curl.view,
            wgpu::LoadOp::Load,
            &[&uniforms, &textures],
        );
    }

    // 3. Vorticity confinement.
    {
        let uniforms = passes.uniform_group(device, &passes.vorticity_ubo);
        let textures = passes.solve_textures(device, &fb.velocity.read().view, &fb.curl.view);
        encode_pass(
            encoder,
            "Vorticity",
            &passes.vorticity,
            &fb.velocity.write().view,
            wgpu::LoadOp::Load,
            &[&uniforms, &textures],
        );
        fb.velocity.swap();
    }

    // 4. Divergence.
    {
        let uniforms = passes.uniform_group(device, &passes.divergence_ubo);
        let textures =
            passes.solve_textures(device, &fb.velocity.read().view, &fb.velocity.read().view);
        encode_pass(
            encoder,
            "Divergence",
            &passes.divergence,
            &fb.divergence.view,
            wgpu::LoadOp::Load,
            &[&uniforms, &textures],
        );
    }

    // 5. Jacobi pressure iterations, fixed count, no convergence check.
    {
        let uniforms = passes.uniform_group(device, &passes.pressure_ubo);
        for _ in 0..config.pressure_iterations {
            let textures =
                passes.solve_textures(device, &fb.pressure.read().view, &fb.divergence.view);
            encode_pass(
                encoder,
                "Jacobi Pressure",
                &passes.pressure,
                &fb.pressure.write().view,
                wgpu::LoadOp::Load,
                &[&uniforms, &textures],
            );
            fb.pressure.swap();
        }
    }

    // 6. Subtract the pressure gradient.
    {
        let uniforms = passes.uniform_group(device, &passes.gradient_ubo);
        let textures =
            passes.solve_textures(device, &fb.pressure.read().view, &fb.velocity.read().view);
        encode_pass(
            encoder,
            "Gradient Subtract",
            &passes.gradient_subtract,
            &fb.velocity.write().view,
            wgpu::LoadOp::Load,
            &[&uniforms, &textures],
        );
        fb.velocity.swap();
    }

    // 7. Advect dye through the projected velocity field.
    {
        let uniforms = passes.uniform_group(device, &passes.advect_dye_ubo);
        let textures =
            passes.solve_textures(device, &fb.velocity.read().view, &fb.dye.read().view);
        encode_pass(
            encoder,
            "Advect Dye",
            &passes.advect_dye,
            &fb.dye.write().view,
            wgpu::LoadOp::Load,
            &[&uniforms, &textures],
        );
        fb.dye.swap();
    }
}
