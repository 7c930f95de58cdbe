//! wgpu implementation of [`RenderBackend`].
//!
//! Every target owns a window surface plus a window-sized background
//! texture holding the darkened history of earlier images. A frame draws the
//! background, then per surface a black overlay and the current image, all
//! as instanced quads through one shader.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, anyhow};
use bytemuck::{Pod, Zeroable};
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;
use wgpu::SurfaceError;
use winit::window::Window;

use crate::error::RenderError;
use crate::events::{PreparedImageCpu, TargetKey};
use crate::gpu::resources::{Composite, RenderBackend, TargetOptions};
use crate::processing::layout::{Rect, Size};

const BACKGROUND_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Globals {
    screen: [f32; 2],
    rgb_scale: f32,
    _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuadInstance {
    rect: [f32; 4],
    color: [f32; 4],
}

impl QuadInstance {
    fn new(rect: Rect, color: [f32; 4]) -> Self {
        Self {
            rect: [rect.x, rect.y, rect.width, rect.height],
            color,
        }
    }
}

pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    lost: Arc<AtomicBool>,
    shader: wgpu::ShaderModule,
    globals_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    white: GpuBitmap,
    max_texture_dimension: u32,
}

pub struct GpuBitmap {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

pub struct GpuTarget {
    key: TargetKey,
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    surface_pipeline: wgpu::RenderPipeline,
    background_pipeline: wgpu::RenderPipeline,
    background: GpuBitmap,
    background_view: wgpu::TextureView,
    surface_globals: wgpu::BindGroup,
    background_globals: wgpu::BindGroup,
    clear_alpha: f64,
    darken: f32,
}

/// Renders into winit windows registered by the host.
pub struct WgpuBackend {
    instance: wgpu::Instance,
    windows: HashMap<TargetKey, Arc<Window>>,
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuBackend {
    pub fn new() -> Self {
        Self {
            instance: wgpu::Instance::default(),
            windows: HashMap::new(),
        }
    }

    pub fn register_window(&mut self, key: TargetKey, window: Arc<Window>) {
        self.windows.insert(key, window);
    }

    pub fn unregister_window(&mut self, key: TargetKey) -> Option<Arc<Window>> {
        self.windows.remove(&key)
    }

    fn init_device(&self) -> anyhow::Result<GpuDevice> {
        let adapter = pollster::block_on(self.instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to acquire GPU adapter")?;
        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("slideshow-device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            ..Default::default()
        }))
        .context("failed to acquire GPU device")?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = Arc::clone(&lost);
            device.set_device_lost_callback(move |reason, message| {
                warn!(?reason, %message, "GPU device lost");
                lost.store(true, Ordering::SeqCst);
            });
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/composite.wgsl").into()),
        });
        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-globals-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-texture-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite-pipeline-layout"),
            bind_group_layouts: &[&globals_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("composite-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let white = upload_rgba(
            &device,
            &queue,
            &texture_layout,
            &sampler,
            "solid-white",
            1,
            1,
            &[255, 255, 255, 255],
        );
        info!(adapter = %adapter.get_info().name, max_texture = limits.max_texture_dimension_2d, "GPU device ready");

        Ok(GpuDevice {
            device,
            queue,
            adapter,
            lost,
            shader,
            globals_layout,
            texture_layout,
            pipeline_layout,
            sampler,
            white,
            max_texture_dimension: limits.max_texture_dimension_2d,
        })
    }

    fn init_target(
        &self,
        gpu: &GpuDevice,
        key: TargetKey,
        size: Size,
        options: &TargetOptions,
    ) -> Result<GpuTarget, RenderError> {
        let window = self
            .windows
            .get(&key)
            .cloned()
            .ok_or(RenderError::UnknownTarget(key))?;
        let surface = self
            .instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        if !gpu.adapter.is_surface_supported(&surface) {
            return Err(anyhow!("adapter cannot present to window {key}").into());
        }

        let caps = surface.get_capabilities(&gpu.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface for {key} reports no formats"))?;
        let (alpha_mode, rgb_scale, clear_alpha) = select_alpha_mode(&caps.alpha_modes, options.alpha);
        let width = size.width.clamp(1, gpu.max_texture_dimension);
        let height = size.height.clamp(1, gpu.max_texture_dimension);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        let surface_pipeline = make_pipeline(gpu, format, keep_destination_alpha(), "composite-surface-pipeline");
        let background_pipeline = make_pipeline(
            gpu,
            BACKGROUND_FORMAT,
            wgpu::BlendState::ALPHA_BLENDING,
            "composite-background-pipeline",
        );

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("background"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BACKGROUND_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let background_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let background = GpuBitmap {
            bind_group: texture_bind_group(gpu, &background_view, "background-bind"),
            _texture: texture,
        };

        let screen = [width as f32, height as f32];
        let surface_globals = globals_bind_group(gpu, screen, rgb_scale, "surface-globals");
        let background_globals = globals_bind_group(gpu, screen, 1.0, "background-globals");

        // Fresh history starts out black.
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("background-clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("background-clear-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &background_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        info!(
            target_key = %key,
            width,
            height,
            format = ?format,
            alpha_mode = ?alpha_mode,
            "render target configured"
        );
        Ok(GpuTarget {
            key,
            window,
            surface,
            config,
            surface_pipeline,
            background_pipeline,
            background,
            background_view,
            surface_globals,
            background_globals,
            clear_alpha,
            darken: options.darken,
        })
    }
}

impl RenderBackend for WgpuBackend {
    type Device = GpuDevice;
    type Target = GpuTarget;
    type Bitmap = GpuBitmap;

    fn create_device(&mut self) -> Result<GpuDevice, RenderError> {
        Ok(self.init_device()?)
    }

    fn create_target(
        &mut self,
        device: &GpuDevice,
        key: TargetKey,
        size: Size,
        options: &TargetOptions,
    ) -> Result<GpuTarget, RenderError> {
        self.init_target(device, key, size, options)
    }

    fn upload_bitmap(&mut self, gpu: &GpuDevice, image: &PreparedImageCpu) -> Result<GpuBitmap, RenderError> {
        let limit = gpu.max_texture_dimension;
        if image.width.max(image.height) <= limit {
            return Ok(upload_rgba(
                &gpu.device,
                &gpu.queue,
                &gpu.texture_layout,
                &gpu.sampler,
                "image",
                image.width,
                image.height,
                &image.pixels,
            ));
        }
        let rgba = image::RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", image.width, image.height))?;
        let scale = limit as f32 / image.width.max(image.height) as f32;
        let w = ((image.width as f32 * scale) as u32).clamp(1, limit);
        let h = ((image.height as f32 * scale) as u32).clamp(1, limit);
        debug!(path = %image.path.display(), w, h, "shrinking image to texture limit");
        let resized = image::imageops::resize(&rgba, w, h, image::imageops::FilterType::Triangle);
        Ok(upload_rgba(
            &gpu.device,
            &gpu.queue,
            &gpu.texture_layout,
            &gpu.sampler,
            "image",
            w,
            h,
            resized.as_raw(),
        ))
    }

    fn snapshot(
        &mut self,
        gpu: &GpuDevice,
        target: &mut GpuTarget,
        previous: &Composite<'_, GpuBitmap>,
    ) -> Result<(), RenderError> {
        let mut quads = vec![(
            QuadInstance::new(previous.bounds, [0.0, 0.0, 0.0, target.darken]),
            &gpu.white,
        )];
        if let Some(bitmap) = previous.bitmap {
            quads.push((QuadInstance::new(previous.placement, [1.0; 4]), bitmap));
        }
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("snapshot-encoder"),
        });
        draw_quads(
            gpu,
            &mut encoder,
            &target.background_view,
            &target.background_pipeline,
            &target.background_globals,
            wgpu::LoadOp::Load,
            &quads,
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn present(
        &mut self,
        gpu: &GpuDevice,
        target: &mut GpuTarget,
        layers: &[Composite<'_, GpuBitmap>],
    ) -> Result<(), RenderError> {
        let frame = match target.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Lost) => return Err(RenderError::DeviceLost),
            Err(SurfaceError::Timeout) => {
                warn!(target_key = %target.key, "surface acquisition timed out");
                return Ok(());
            }
            Err(SurfaceError::OutOfMemory) => {
                error!(target_key = %target.key, "surface out of memory");
                return Err(anyhow!("surface out of memory").into());
            }
            Err(err) => {
                let size = target.window.inner_size();
                target.config.width = size.width.clamp(1, gpu.max_texture_dimension);
                target.config.height = size.height.clamp(1, gpu.max_texture_dimension);
                target.surface.configure(&gpu.device, &target.config);
                debug!(target_key = %target.key, error = %err, "surface reconfigured");
                return Ok(());
            }
        };

        let full = Rect::new(0.0, 0.0, target.config.width as f32, target.config.height as f32);
        let mut quads = vec![(QuadInstance::new(full, [1.0; 4]), &target.background)];
        for layer in layers {
            let Some(bitmap) = layer.bitmap else {
                continue;
            };
            quads.push((
                QuadInstance::new(layer.bounds, [0.0, 0.0, 0.0, target.darken * layer.progress]),
                &gpu.white,
            ));
            quads.push((
                QuadInstance::new(layer.placement, [1.0, 1.0, 1.0, layer.progress]),
                bitmap,
            ));
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("present-encoder"),
        });
        draw_quads(
            gpu,
            &mut encoder,
            &view,
            &target.surface_pipeline,
            &target.surface_globals,
            wgpu::LoadOp::Clear(wgpu::Color {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: target.clear_alpha,
            }),
            &quads,
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));
        target.window.pre_present_notify();
        frame.present();
        Ok(())
    }

    fn device_lost(&self, gpu: &GpuDevice) -> bool {
        gpu.lost.load(Ordering::SeqCst)
    }
}

/// Picks the composite alpha mode for a window opacity of `alpha`. Returns
/// the mode, the factor colours must be scaled by, and the clear alpha.
fn select_alpha_mode(modes: &[wgpu::CompositeAlphaMode], alpha: u8) -> (wgpu::CompositeAlphaMode, f32, f64) {
    let fallback = modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);
    if alpha == u8::MAX {
        return (fallback, 1.0, 1.0);
    }
    let a = f32::from(alpha) / 255.0;
    if modes.contains(&wgpu::CompositeAlphaMode::PostMultiplied) {
        (wgpu::CompositeAlphaMode::PostMultiplied, 1.0, f64::from(a))
    } else if modes.contains(&wgpu::CompositeAlphaMode::PreMultiplied) {
        (wgpu::CompositeAlphaMode::PreMultiplied, a, f64::from(a))
    } else {
        warn!(?modes, "window transparency unsupported by this surface");
        (fallback, 1.0, 1.0)
    }
}

/// Alpha blending for colour; the destination alpha (the window opacity set
/// by the clear) is left untouched.
fn keep_destination_alpha() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::SrcAlpha,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::Zero,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

fn make_pipeline(
    gpu: &GpuDevice,
    format: wgpu::TextureFormat,
    blend: wgpu::BlendState,
    label: &str,
) -> wgpu::RenderPipeline {
    gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&gpu.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &gpu.shader,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<QuadInstance>() as u64,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x4],
            }],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &gpu.shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

fn globals_bind_group(gpu: &GpuDevice, screen: [f32; 2], rgb_scale: f32, label: &str) -> wgpu::BindGroup {
    let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(&Globals {
            screen,
            rgb_scale,
            _pad: 0.0,
        }),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &gpu.globals_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}

fn texture_bind_group(gpu: &GpuDevice, view: &wgpu::TextureView, label: &str) -> wgpu::BindGroup {
    make_texture_bind_group(&gpu.device, &gpu.texture_layout, &gpu.sampler, view, label)
}

fn make_texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    view: &wgpu::TextureView,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

#[allow(clippy::too_many_arguments)]
fn upload_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    label: &str,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> GpuBitmap {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuBitmap {
        bind_group: make_texture_bind_group(device, layout, sampler, &view, label),
        _texture: texture,
    }
}

fn draw_quads(
    gpu: &GpuDevice,
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    globals: &wgpu::BindGroup,
    load: wgpu::LoadOp<wgpu::Color>,
    quads: &[(QuadInstance, &GpuBitmap)],
) {
    let instances: Vec<QuadInstance> = quads.iter().map(|(quad, _)| *quad).collect();
    let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("quad-instances"),
        contents: bytemuck::cast_slice(&instances),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("composite-pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, globals, &[]);
    pass.set_vertex_buffer(0, buffer.slice(..));
    for (i, (_, bitmap)) in quads.iter().enumerate() {
        let i = i as u32;
        pass.set_bind_group(1, &bitmap.bind_group, &[]);
        pass.draw(0..6, i..i + 1);
    }
}
