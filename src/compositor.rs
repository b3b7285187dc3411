//! Adaptive display compositor: picks, once per tick, how the dye field
//! reaches the output surface — direct hardware-filtered sampling, a manual
//! bilinear shader, bicubic upsampling, or the 8-bit downsample + sharpen
//! fallback chain — then encodes the chosen passes.

use serde::Serialize;

use crate::capability::Capabilities;
use crate::config::SimulationConfig;
use crate::passes::{encode_pass, DisplayParams, Passes, ResampleParams};
use crate::targets::Framebuffers;

/// Upscale ratio above which bicubic is considered worthwhile.
const BICUBIC_MIN_UPSCALE: f32 = 1.01;

/// The per-tick compositing decision, derived purely from capabilities,
/// configuration, and the computed upscale ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompositePlan {
    pub manual_filter: bool,
    pub bicubic: bool,
    pub eight_bit: bool,
    pub sharpen: bool,
}

impl CompositePlan {
    /// Human-readable mode label for diagnostics.
    pub fn mode(&self) -> &'static str {
        match (self.eight_bit, self.bicubic, self.manual_filter) {
            (true, _, _) => "eight-bit",
            (false, true, _) => "bicubic",
            (false, false, true) => "manual-bilinear",
            (false, false, false) => "hardware-linear",
        }
    }
}

pub fn plan(caps: &Capabilities, config: &SimulationConfig, upscale_ratio: f32) -> CompositePlan {
    let manual_filter = config
        .manual_filter
        .unwrap_or(!caps.linear_filterable || config.simulate_no_float_linear);
    let bicubic = manual_filter
        && config.bicubic
        && (upscale_ratio > BICUBIC_MIN_UPSCALE || !config.bicubic_upscale_only);
    let eight_bit = config.eight_bit_fallback;
    let sharpen = eight_bit && !caps.linear_filterable && config.sharpen_amount > 0.0;
    CompositePlan {
        manual_filter,
        bicubic,
        eight_bit,
        sharpen,
    }
}

/// Encode the display chain for this tick into `encoder`.
#[allow(clippy::too_many_arguments)]
pub fn composite(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    passes: &Passes,
    fb: &Framebuffers,
    config: &SimulationConfig,
    plan: CompositePlan,
    clear_color: wgpu::Color,
    frame_view: &wgpu::TextureView,
    encoder: &mut wgpu::CommandEncoder,
) {
    let back_color = [
        config.back_color[0] as f32 / 255.0,
        config.back_color[1] as f32 / 255.0,
        config.back_color[2] as f32 / 255.0,
    ];

    if plan.eight_bit {
        let (Some(dye8), Some(display8), Some(sharpen8)) =
            (&fb.dye8, &fb.display8, &fb.sharpen8)
        else {
            return;
        };

        // High-precision dye -> 8-bit, pixel-center sampled.
        queue.write_buffer(
            &passes.downsample_ubo,
            0,
            bytemuck::bytes_of(&ResampleParams {
                src_size: [fb.dye.read().width as f32, fb.dye.read().height as f32],
                dest_size: [dye8.width as f32, dye8.height as f32],
                ..Default::default()
            }),
        );
        let down_uniforms = passes.uniform_group(device, &passes.downsample_ubo);
        let down_source = passes.single_texture(device, &fb.dye.read().view);
        encode_pass(
            encoder,
            "Downsample Dye",
            &passes.downsample,
            &dye8.view,
            wgpu::LoadOp::Load,
            &[&down_uniforms, &down_source],
        );

        // Display into the 8-bit framebuffer; 8-bit textures always filter
        // in hardware, so the manual paths stay off here.
        queue.write_buffer(
            &passes.display_ubo,
            0,
            bytemuck::bytes_of(&DisplayParams {
                texel: dye8.texel_size(),
                brightness: config.brightness,
                shading: config.shading as u32,
                back_color,
                transparent: config.transparent as u32,
                aura: config.aura as u32,
                ray_aura: config.ray_aura as u32,
                manual_filter: 0,
                bicubic: 0,
            }),
        );
        let display_uniforms = passes.uniform_group(device, &passes.display_ubo);
        let display_textures =
            passes.display_textures(device, &dye8.view, &fb.aura.view, &fb.ray_aura.view);
        encode_pass(
            encoder,
            "Display 8-bit",
            &passes.display_eight_bit,
            &display8.view,
            wgpu::LoadOp::Clear(clear_color),
            &[&display_uniforms, &display_textures],
        );

        let final_source = if plan.sharpen {
            queue.write_buffer(
                &passes.sharpen_ubo,
                0,
                bytemuck::bytes_of(&ResampleParams {
                    texel: display8.texel_size(),
                    amount: config.sharpen_amount,
                    ..Default::default()
                }),
            );
            let sharpen_uniforms = passes.uniform_group(device, &passes.sharpen_ubo);
            let sharpen_source = passes.single_texture(device, &display8.view);
            encode_pass(
                encoder,
                "Sharpen 8-bit",
                &passes.sharpen,
                &sharpen8.view,
                wgpu::LoadOp::Load,
                &[&sharpen_uniforms, &sharpen_source],
            );
            &sharpen8.view
        } else {
            &display8.view
        };

        queue.write_buffer(
            &passes.copy_ubo,
            0,
            bytemuck::bytes_of(&ResampleParams::default()),
        );
        let copy_uniforms = passes.uniform_group(device, &passes.copy_ubo);
        let copy_source = passes.single_texture(device, final_source);
        encode_pass(
            encoder,
            "Copy To Surface",
            &passes.copy_surface,
            frame_view,
            wgpu::LoadOp::Clear(clear_color),
            &[&copy_uniforms, &copy_source],
        );
        return;
    }

    queue.write_buffer(
        &passes.display_ubo,
        0,
        bytemuck::bytes_of(&DisplayParams {
            texel: fb.dye.read().texel_size(),
            brightness: config.brightness,
            shading: config.shading as u32,
            back_color,
            transparent: config.transparent as u32,
            aura: config.aura as u32,
            ray_aura: config.ray_aura as u32,
            manual_filter: plan.manual_filter as u32,
            bicubic: plan.bicubic as u32,
        }),
    );
    let display_uniforms = passes.uniform_group(device, &passes.display_ubo);
    let display_textures = passes.display_textures(
        device,
        &fb.dye.read().view,
        &fb.aura.view,
        &fb.ray_aura.view,
    );
    encode_pass(
        encoder,
        "Display",
        &passes.display_surface,
        frame_view,
        wgpu::LoadOp::Clear(clear_color),
        &[&display_uniforms, &display_textures],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(linear_filterable: bool) -> Capabilities {
        Capabilities {
            velocity_format: wgpu::TextureFormat::Rg16Float,
            scalar_format: wgpu::TextureFormat::R16Float,
            dye_format: wgpu::TextureFormat::Rgba16Float,
            linear_filterable,
            max_texture_dimension: 8192,
            backend: wgpu::Backend::Vulkan,
            adapter_name: "test".to_string(),
            driver: String::new(),
        }
    }

    #[test]
    fn manual_filter_follows_probe_when_unset() {
        let config = SimulationConfig::default();
        assert!(!plan(&caps(true), &config, 1.0).manual_filter);
        assert!(plan(&caps(false), &config, 1.0).manual_filter);
    }

    #[test]
    fn manual_filter_override_beats_capability() {
        let mut config = SimulationConfig {
            manual_filter: Some(false),
            ..Default::default()
        };
        assert!(!plan(&caps(false), &config, 1.0).manual_filter);

        config.manual_filter = Some(true);
        assert!(plan(&caps(true), &config, 1.0).manual_filter);
    }

    #[test]
    fn simulate_flag_forces_manual_filter() {
        let config = SimulationConfig {
            simulate_no_float_linear: true,
            ..Default::default()
        };
        assert!(plan(&caps(true), &config, 1.0).manual_filter);
    }

    #[test]
    fn bicubic_requires_manual_filter_and_upscale() {
        let config = SimulationConfig {
            simulate_no_float_linear: true,
            bicubic: true,
            bicubic_upscale_only: true,
            ..Default::default()
        };
        // hardware path never goes bicubic
        let hw = SimulationConfig::default();
        assert!(!plan(&caps(true), &hw, 3.0).bicubic);
        // upscale gate
        assert!(!plan(&caps(true), &config, 1.0).bicubic);
        assert!(plan(&caps(true), &config, 1.5).bicubic);
        // lifting the upscale-only restriction allows it at 1:1
        let anyscale = SimulationConfig {
            bicubic_upscale_only: false,
            ..config
        };
        assert!(plan(&caps(true), &anyscale, 1.0).bicubic);
    }

    #[test]
    fn sharpen_only_in_eight_bit_without_hardware_filtering() {
        let config = SimulationConfig {
            eight_bit_fallback: true,
            ..Default::default()
        };
        assert!(plan(&caps(false), &config, 1.0).sharpen);
        assert!(!plan(&caps(true), &config, 1.0).sharpen);
        let no_sharpen = SimulationConfig {
            eight_bit_fallback: true,
            sharpen_amount: 0.0,
            ..Default::default()
        };
        assert!(!plan(&caps(false), &no_sharpen, 1.0).sharpen);
    }

    #[test]
    fn mode_labels() {
        let mut p = CompositePlan {
            manual_filter: false,
            bicubic: false,
            eight_bit: false,
            sharpen: false,
        };
        assert_eq!(p.mode(), "hardware-linear");
        p.manual_filter = true;
        assert_eq!(p.mode(), "manual-bilinear");
        p.bicubic = true;
        assert_eq!(p.mode(), "bicubic");
        p.eight_bit = true;
        assert_eq!(p.mode(), "eight-bit");
    }
}
