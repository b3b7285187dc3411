// Interactive fluid dye demo.
// Drag with the left mouse button to stir dye into the flow.
//
// Keys: 1-4 quality presets, A aura, R ray aura, H shading, C colorful,
// B ambient splat burst, E 8-bit fallback, D diagnostics, P snapshot.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use winit::{
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
};

use dyeflow::{ConfigUpdate, FluidEngine, FrameTarget, MotionEvent};

struct App {
    engine: FluidEngine,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
}

impl App {
    async fn new(window: Arc<winit::window::Window>) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .context("no compatible GPU adapter")?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Dyeflow Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("failed to create device")?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let mut engine = FluidEngine::new(
            &adapter,
            device,
            queue,
            surface_format,
            ConfigUpdate::default(),
        )?;
        engine.start();

        Ok(Self {
            engine,
            surface,
            surface_config,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface
                .configure(self.engine.device(), &self.surface_config);
            self.engine.force_resize_check();
        }
    }

    fn toggle(&mut self, update: ConfigUpdate) {
        self.engine.update_config(update);
    }

    fn save_snapshot(&self) -> Result<()> {
        let (width, height) = self.engine.dye_dimensions();
        let dye = self.engine.read_dye();
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for texel in &dye {
            for channel in &texel[..3] {
                // same highlight compression as the 8-bit display chain
                let mapped = (channel / (channel + 1.0)).powf(1.0 / 1.1);
                pixels.push((mapped.clamp(0.0, 1.0) * 255.0) as u8);
            }
            pixels.push(255);
        }

        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = format!("dyeflow-{stamp}.png");
        let file = std::fs::File::create(&path)?;
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&pixels)?;
        println!("Saved dye snapshot to {path}");
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        event_loop
            .create_window(
                winit::window::WindowAttributes::default()
                    .with_title("dyeflow")
                    .with_inner_size(winit::dpi::PhysicalSize::new(900, 900)),
            )
            .context("failed to create window")?,
    );

    let mut app = pollster::block_on(App::new(window.clone()))?;
    app.engine.multiple_splats(6);

    let mut last_update = Instant::now();
    let mut last_overlay = Instant::now();
    let mut cursor: Option<(f32, f32)> = None;
    let mut mouse_down = false;

    event_loop.run(move |event, control_flow| {
        match event {
            Event::WindowEvent {
                ref event,
                window_id,
            } if window_id == window.id() => match event {
                WindowEvent::CloseRequested => control_flow.exit(),
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(key),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    let config = app.engine.config().clone();
                    match key {
                        KeyCode::Escape => control_flow.exit(),
                        KeyCode::Digit1 => {
                            app.engine.apply_quality_preset("low");
                        }
                        KeyCode::Digit2 => {
                            app.engine.apply_quality_preset("medium");
                        }
                        KeyCode::Digit3 => {
                            app.engine.apply_quality_preset("high");
                        }
                        KeyCode::Digit4 => {
                            app.engine.apply_quality_preset("ultra");
                        }
                        KeyCode::KeyA => app.toggle(ConfigUpdate {
                            aura: Some(!config.aura),
                            ..Default::default()
                        }),
                        KeyCode::KeyR => app.toggle(ConfigUpdate {
                            ray_aura: Some(!config.ray_aura),
                            ..Default::default()
                        }),
                        KeyCode::KeyH => app.toggle(ConfigUpdate {
                            shading: Some(!config.shading),
                            ..Default::default()
                        }),
                        KeyCode::KeyC => app.toggle(ConfigUpdate {
                            colorful: Some(!config.colorful),
                            ..Default::default()
                        }),
                        KeyCode::KeyE => app.toggle(ConfigUpdate {
                            eight_bit_fallback: Some(!config.eight_bit_fallback),
                            ..Default::default()
                        }),
                        KeyCode::KeyB => app.engine.multiple_splats(8),
                        KeyCode::KeyD => {
                            match serde_json::to_string_pretty(&app.engine.diagnostics()) {
                                Ok(json) => println!("{json}"),
                                Err(err) => eprintln!("diagnostics: {err}"),
                            }
                        }
                        KeyCode::KeyP => {
                            if let Err(err) = app.save_snapshot() {
                                eprintln!("snapshot failed: {err:?}");
                            }
                        }
                        _ => {}
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    let size = window.inner_size();
                    let x = position.x as f32 / size.width.max(1) as f32;
                    let y = position.y as f32 / size.height.max(1) as f32;
                    cursor = Some((x, y));
                    if mouse_down {
                        app.engine.push_input(MotionEvent {
                            id: 0,
                            x,
                            y,
                            dx: None,
                            dy: None,
                            color: None,
                        });
                    }
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    mouse_down = *state == ElementState::Pressed;
                    if mouse_down {
                        if let Some((x, y)) = cursor {
                            app.engine.push_input(MotionEvent {
                                id: 0,
                                x,
                                y,
                                dx: None,
                                dy: None,
                                color: None,
                            });
                        }
                    } else {
                        app.engine.end_input_stream(0);
                    }
                }
                WindowEvent::Resized(physical_size) => {
                    app.resize(physical_size.width, physical_size.height);
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    let dt = (now - last_update).as_secs_f32();
                    last_update = now;

                    let frame = match app.surface.get_current_texture() {
                        Ok(frame) => frame,
                        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                            app.surface
                                .configure(app.engine.device(), &app.surface_config);
                            return;
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            control_flow.exit();
                            return;
                        }
                        Err(err) => {
                            eprintln!("{err:?}");
                            return;
                        }
                    };
                    let view = frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());

                    let logical = window
                        .inner_size()
                        .to_logical::<f32>(window.scale_factor());
                    app.engine.tick(
                        dt,
                        &FrameTarget {
                            view: &view,
                            pixel_width: app.surface_config.width,
                            pixel_height: app.surface_config.height,
                            logical_width: logical.width,
                            logical_height: logical.height,
                        },
                    );
                    frame.present();

                    if app.engine.config().debug_overlay
                        && last_overlay.elapsed().as_secs_f32() >= 1.0
                    {
                        last_overlay = Instant::now();
                        if let Ok(json) = serde_json::to_string(&app.engine.diagnostics()) {
                            println!("{json}");
                        }
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
