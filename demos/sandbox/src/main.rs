// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Cadenza Sandbox
// Draws a tinted triangle through the N-buffered frame pipeline.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use cadenza_core::math::Extent2D;
use cadenza_core::renderer::{
    ClearValues, Engine, EngineConfig, FrameReport, PipelineId, RenderError,
};
use cadenza_infra::{WgpuContext, WgpuDevice};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

const TRIANGLE_WGSL: &str = r#"
struct Constants {
    tint: vec4<f32>,
    offset: vec4<f32>,
};

@group(0) @binding(0) var<uniform> constants: Constants;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 0.5),
        vec2<f32>(-0.5, -0.5),
        vec2<f32>(0.5, -0.5),
    );
    var colors = array<vec3<f32>, 3>(
        vec3<f32>(1.0, 0.0, 0.0),
        vec3<f32>(0.0, 1.0, 0.0),
        vec3<f32>(0.0, 0.0, 1.0),
    );
    var out: VertexOutput;
    out.position = vec4<f32>(positions[index] + constants.offset.xy, 0.0, 1.0);
    out.color = vec4<f32>(colors[index] * constants.tint.rgb, 1.0);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

/// Per-frame data written into the constant ring.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct TriangleConstants {
    tint: [f32; 4],
    offset: [f32; 4],
}

/// Everything created once the window exists.
struct Renderer {
    window: Arc<Window>,
    device: Arc<WgpuDevice>,
    engine: Engine,
    pipeline: PipelineId,
}

impl Renderer {
    fn new(window: Arc<Window>, config: EngineConfig) -> Result<Self> {
        let size = window.inner_size();
        let context = WgpuContext::new_blocking(window.clone(), Extent2D::new(size.width, size.height))?;
        let device = WgpuDevice::new(context);
        let pipeline = create_triangle_pipeline(&device);
        let engine = Engine::initialize(device.clone(), config)?;
        Ok(Self {
            window,
            device,
            engine,
            pipeline,
        })
    }

    fn render(&mut self, seconds: f32) -> Result<FrameReport, RenderError> {
        let clear = ClearValues::with_color([0.02, 0.02, 0.05, 1.0]);
        self.engine.begin_frame(clear)?;

        let pulse = 0.6 + 0.4 * (seconds * 2.0).sin();
        let constants = self.engine.write_constants_pod(&TriangleConstants {
            tint: [pulse, pulse, pulse, 1.0],
            offset: [0.3 * seconds.sin(), 0.0, 0.0, 0.0],
        })?;

        let recorder = self.engine.current_recorder()?;
        recorder.set_pipeline(self.pipeline);
        recorder.bind_constants(0, constants);
        recorder.draw(0..3, 0..1);

        self.engine.end_frame()
    }

    fn shutdown(mut self) {
        if let Err(e) = self.engine.wait_idle() {
            log::error!("Sandbox: Failed to drain the GPU before shutdown: {e}");
        }
        if let Err(e) = self.device.unregister_render_pipeline(self.pipeline) {
            log::warn!("Sandbox: {e}");
        }
        match self.engine.shutdown() {
            Ok(report) if report.is_clean() => {
                log::info!("Sandbox: Rendered {} frames", report.frames_rendered)
            }
            Ok(report) => log::warn!("Sandbox: Shutdown left resources behind: {report:?}"),
            Err(e) => log::error!("Sandbox: Shutdown failed: {e}"),
        }
    }
}

fn create_triangle_pipeline(device: &WgpuDevice) -> PipelineId {
    let format = device.wgpu_surface_format();
    let pipeline = device.with_wgpu_device(|device| {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Triangle Shader"),
            source: wgpu::ShaderSource::Wgsl(TRIANGLE_WGSL.into()),
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Triangle Pipeline"),
            layout: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    });
    device.register_render_pipeline(pipeline)
}

#[derive(Default)]
struct Sandbox {
    config: EngineConfig,
    renderer: Option<Renderer>,
    started: Option<Instant>,
}

impl Sandbox {
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for Sandbox {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("Cadenza Sandbox")
            .with_inner_size(LogicalSize::new(1024, 768));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Sandbox: Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(window, self.config.clone()) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.started = Some(Instant::now());
            }
            Err(e) => {
                log::error!("Sandbox: Failed to initialize the renderer: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Shutdown requested, exiting event loop...");
                self.close(event_loop);
            }
            WindowEvent::Resized(size) => {
                // Minimized windows report a zero size; keep the old surface.
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Err(e) = renderer.engine.resize(size.width, size.height) {
                    log::warn!("Sandbox: Resize to {}x{} failed: {e}", size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let seconds = self.started.map_or(0.0, |t| t.elapsed().as_secs_f32());
                match renderer.render(seconds) {
                    Ok(report) => {
                        if report.frame_number % 600 == 0 {
                            log::info!(
                                "Frame {} on slot {} (waited {:?})",
                                report.frame_number,
                                report.slot,
                                report.fence_wait
                            );
                        }
                    }
                    Err(e) if e.is_recoverable() => {
                        log::debug!("Sandbox: Skipped frame: {e}");
                    }
                    Err(e) => {
                        log::error!("Rendering error: {e}");
                        self.close(event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            renderer.window.request_redraw();
        }
    }
}

fn load_config() -> Result<EngineConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Sandbox: Loading engine configuration from {path}");
            EngineConfig::from_json_str(&std::fs::read_to_string(&path)?)?
        }
        None => EngineConfig::default(),
    };
    // The triangle pipeline has no depth attachment.
    config.depth_format = None;
    Ok(config)
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .init();

    let mut sandbox = Sandbox {
        config: load_config()?,
        ..Sandbox::default()
    };
    let event_loop = EventLoop::new()?;
    event_loop.run_app(&mut sandbox)?;
    Ok(())
}
