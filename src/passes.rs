//! GPU programs: shader modules, render pipelines, bind group layouts,
//! samplers, and the per-pass uniform buffers.
//!
//! Every pass is a fullscreen triangle into one color attachment with
//! blending disabled; passes that accumulate do so by sampling the read
//! half of a double buffer and writing the sum into the write half.

use anyhow::{bail, Result};
use bytemuck::{Pod, Zeroable};

use crate::capability::Capabilities;

/// Uniforms shared by every solve pass; each pass reads the fields it needs.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pod, Zeroable)]
pub struct SolveParams {
    pub texel: [f32; 2],
    pub source_texel: [f32; 2],
    pub dt: f32,
    pub dissipation: f32,
    pub curl_strength: f32,
    pub manual_filter: u32,
    pub splat_point: [f32; 2],
    pub splat_aspect: f32,
    pub splat_radius: f32,
    pub splat_color: [f32; 3],
    pub splat_brightness: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pod, Zeroable)]
pub struct DisplayParams {
    pub texel: [f32; 2],
    pub brightness: f32,
    pub shading: u32,
    pub back_color: [f32; 3],
    pub transparent: u32,
    pub aura: u32,
    pub ray_aura: u32,
    pub manual_filter: u32,
    pub bicubic: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pod, Zeroable)]
pub struct PostfxParams {
    pub texel: [f32; 2],
    pub weight: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pod, Zeroable)]
pub struct ResampleParams {
    pub src_size: [f32; 2],
    pub dest_size: [f32; 2],
    pub texel: [f32; 2],
    pub amount: f32,
    pub _pad: f32,
}

/// All pipelines plus their shared layouts and samplers. Built once at
/// construction; pipeline creation failure fails engine construction.
pub struct Passes {
    pub linear_sampler: wgpu::Sampler,
    pub nearest_sampler: wgpu::Sampler,
    filterable: bool,

    pub uniform_bgl: wgpu::BindGroupLayout,
    pub solve_tex_bgl: wgpu::BindGroupLayout,
    pub display_tex_bgl: wgpu::BindGroupLayout,
    pub single_tex_bgl: wgpu::BindGroupLayout,

    pub advect_velocity: wgpu::RenderPipeline,
    pub advect_dye: wgpu::RenderPipeline,
    pub curl: wgpu::RenderPipeline,
    pub vorticity: wgpu::RenderPipeline,
    pub divergence: wgpu::RenderPipeline,
    pub pressure: wgpu::RenderPipeline,
    pub gradient_subtract: wgpu::RenderPipeline,
    pub splat_velocity: wgpu::RenderPipeline,
    pub splat_dye: wgpu::RenderPipeline,
    pub mask: wgpu::RenderPipeline,
    pub blur: wgpu::RenderPipeline,
    pub rays: wgpu::RenderPipeline,
    pub display_surface: wgpu::RenderPipeline,
    pub display_eight_bit: wgpu::RenderPipeline,
    pub downsample: wgpu::RenderPipeline,
    pub sharpen: wgpu::RenderPipeline,
    pub copy_surface: wgpu::RenderPipeline,

    pub advect_velocity_ubo: wgpu::Buffer,
    pub advect_dye_ubo: wgpu::Buffer,
    pub curl_ubo: wgpu::Buffer,
    pub vorticity_ubo: wgpu::Buffer,
    pub divergence_ubo: wgpu::Buffer,
    pub pressure_ubo: wgpu::Buffer,
    pub gradient_ubo: wgpu::Buffer,
    pub splat_velocity_ubo: wgpu::Buffer,
    pub splat_dye_ubo: wgpu::Buffer,
    pub mask_ubo: wgpu::Buffer,
    pub blur_h_ubo: wgpu::Buffer,
    pub blur_v_ubo: wgpu::Buffer,
    pub rays_ubo: wgpu::Buffer,
    pub display_ubo: wgpu::Buffer,
    pub downsample_ubo: wgpu::Buffer,
    pub sharpen_ubo: wgpu::Buffer,
    pub copy_ubo: wgpu::Buffer,
}

impl Passes {
    pub fn new(
        device: &wgpu::Device,
        caps: &Capabilities,
        surface_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        // Collect validation errors (bad shader, incompatible pipeline)
        // synchronously so construction fails instead of panicking later.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let filterable = caps.linear_filterable;

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let nearest_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Nearest Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if filterable {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        };

        let solve_tex_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Solve Texture Layout"),
            entries: &[texture_entry(0), texture_entry(1), sampler_entry(2)],
        });
        let display_tex_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Display Texture Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                sampler_entry(3),
            ],
        });
        let single_tex_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Single Texture Layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });

        let solve_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Solve Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/solve.wgsl").into()),
        });
        let display_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Display Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/display.wgsl").into()),
        });
        let postfx_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Postfx Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/postfx.wgsl").into()),
        });
        let resample_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Resample Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/resample.wgsl").into()),
        });

        let solve_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Solve Pipeline Layout"),
            bind_group_layouts: &[&uniform_bgl, &solve_tex_bgl],
            push_constant_ranges: &[],
        });
        let display_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Display Pipeline Layout"),
            bind_group_layouts: &[&uniform_bgl, &display_tex_bgl],
            push_constant_ranges: &[],
        });
        let single_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Single Texture Pipeline Layout"),
            bind_group_layouts: &[&uniform_bgl, &single_tex_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str,
                        module: &wgpu::ShaderModule,
                        entry: &str,
                        layout: &wgpu::PipelineLayout,
                        format: wgpu::TextureFormat| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_fullscreen",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: entry,
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        };

        let eight_bit = wgpu::TextureFormat::Rgba8Unorm;

        let advect_velocity = pipeline("Advect Velocity", &solve_module, "fs_advect", &solve_layout, caps.velocity_format);
        let advect_dye = pipeline("Advect Dye", &solve_module, "fs_advect", &solve_layout, caps.dye_format);
        let curl = pipeline("Curl", &solve_module, "fs_curl", &solve_layout, caps.scalar_format);
        let vorticity = pipeline("Vorticity", &solve_module, "fs_vorticity", &solve_layout, caps.velocity_format);
        let divergence = pipeline("Divergence", &solve_module, "fs_divergence", &solve_layout, caps.scalar_format);
        let pressure = pipeline("Pressure", &solve_module, "fs_pressure", &solve_layout, caps.scalar_format);
        let gradient_subtract = pipeline("Gradient Subtract", &solve_module, "fs_gradient_subtract", &solve_layout, caps.velocity_format);
        let splat_velocity = pipeline("Splat Velocity", &solve_module, "fs_splat", &solve_layout, caps.velocity_format);
        let splat_dye = pipeline("Splat Dye", &solve_module, "fs_splat", &solve_layout, caps.dye_format);
        let mask = pipeline("Brightness Mask", &postfx_module, "fs_mask", &single_layout, caps.dye_format);
        let blur = pipeline("Aura Blur", &postfx_module, "fs_blur", &single_layout, caps.dye_format);
        let rays = pipeline("Ray Aura", &postfx_module, "fs_rays", &single_layout, caps.dye_format);
        let display_surface = pipeline("Display", &display_module, "fs_display", &display_layout, surface_format);
        let display_eight_bit = pipeline("Display 8-bit", &display_module, "fs_display", &display_layout, eight_bit);
        let downsample = pipeline("Downsample 8-bit", &resample_module, "fs_downsample", &single_layout, eight_bit);
        let sharpen = pipeline("Sharpen 8-bit", &resample_module, "fs_sharpen", &single_layout, eight_bit);
        let copy_surface = pipeline("Copy To Surface", &resample_module, "fs_copy", &single_layout, surface_format);

        let ubo = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let solve_size = std::mem::size_of::<SolveParams>() as u64;
        let postfx_size = std::mem::size_of::<PostfxParams>() as u64;
        let resample_size = std::mem::size_of::<ResampleParams>() as u64;

        let passes = Self {
            linear_sampler,
            nearest_sampler,
            filterable,
            uniform_bgl,
            solve_tex_bgl,
            display_tex_bgl,
            single_tex_bgl,
            advect_velocity,
            advect_dye,
            curl,
            vorticity,
            divergence,
            pressure,
            gradient_subtract,
            splat_velocity,
            splat_dye,
            mask,
            blur,
            rays,
            display_surface,
            display_eight_bit,
            downsample,
            sharpen,
            copy_surface,
            advect_velocity_ubo: ubo("Advect Velocity Params", solve_size),
            advect_dye_ubo: ubo("Advect Dye Params", solve_size),
            curl_ubo: ubo("Curl Params", solve_size),
            vorticity_ubo: ubo("Vorticity Params", solve_size),
            divergence_ubo: ubo("Divergence Params", solve_size),
            pressure_ubo: ubo("Pressure Params", solve_size),
            gradient_ubo: ubo("Gradient Params", solve_size),
            splat_velocity_ubo: ubo("Splat Velocity Params", solve_size),
            splat_dye_ubo: ubo("Splat Dye Params", solve_size),
            mask_ubo: ubo("Mask Params", postfx_size),
            blur_h_ubo: ubo("Blur H Params", postfx_size),
            blur_v_ubo: ubo("Blur V Params", postfx_size),
            rays_ubo: ubo("Rays Params", postfx_size),
            display_ubo: ubo("Display Params", std::mem::size_of::<DisplayParams>() as u64),
            downsample_ubo: ubo("Downsample Params", resample_size),
            sharpen_ubo: ubo("Sharpen Params", resample_size),
            copy_ubo: ubo("Copy Params", resample_size),
        };

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            bail!("GPU pipeline creation failed: {error}");
        }
        Ok(passes)
    }

    /// The sampler compatible with the texture layouts built at init.
    pub fn field_sampler(&self) -> &wgpu::Sampler {
        if self.filterable {
            &self.linear_sampler
        } else {
            &self.nearest_sampler
        }
    }

    pub fn uniform_group(&self, device: &wgpu::Device, buffer: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Uniforms"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    pub fn solve_textures(
        &self,
        device: &wgpu::Device,
        tex_a: &wgpu::TextureView,
        tex_b: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Solve Textures"),
            layout: &self.solve_tex_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(tex_a),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(tex_b),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.field_sampler()),
                },
            ],
        })
    }

    pub fn single_texture(
        &self,
        device: &wgpu::Device,
        texture: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Single Texture"),
            layout: &self.single_tex_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(self.field_sampler()),
                },
            ],
        })
    }

    pub fn display_textures(
        &self,
        device: &wgpu::Device,
        dye: &wgpu::TextureView,
        aura: &wgpu::TextureView,
        ray_aura: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Display Textures"),
            layout: &self.display_tex_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(dye),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(aura),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(ray_aura),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(self.field_sampler()),
                },
            ],
        })
    }
}

/// Encode one fullscreen pass into `encoder`.
pub fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    target: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
    bind_groups: &[&wgpu::BindGroup],
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    for (index, group) in bind_groups.iter().enumerate() {
        pass.set_bind_group(index as u32, group, &[]);
    }
    pass.draw(0..3, 0..1);
}
