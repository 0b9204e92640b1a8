//! GPU renderer for the scene graph.
//!
//! Owns the device and queue, keeps GPU copies of registry resources keyed by
//! handle, and draws one frame into a linear HDR target before handing it to
//! the bloom processor for the final composite.

use std::collections::HashMap;

use crate::backend::FrameInput;
use crate::gpu::bloom_processor::BloomProcessor;
use crate::gpu::draw_list::{self, DrawUniforms, FrameUniforms, MAX_DRAWS};
use crate::gpu::mesh::GpuGeometry;
use crate::gpu::pipeline::{self, PipelineKey, Primitive, DEPTH_FORMAT, HDR_FORMAT};
use crate::resources::{GeometryHandle, ResourceId, ResourceRegistry, Texture, TextureHandle};

/// Uniform buffer alignment (WebGPU minUniformBufferOffsetAlignment is 256 bytes).
const UNIFORM_ALIGNMENT: usize = 256;

type TexturePair = (Option<TextureHandle>, Option<TextureHandle>);

pub struct SceneRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,

    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    white: wgpu::TextureView,

    geometries: HashMap<GeometryHandle, GpuGeometry>,
    textures: HashMap<TextureHandle, wgpu::TextureView>,
    texture_bind_groups: HashMap<TexturePair, wgpu::BindGroup>,

    hdr_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    bloom: BloomProcessor,
}

impl SceneRenderer {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/scene.wgsl"));

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<FrameUniforms>() as u64
                    ),
                },
                count: None,
            }],
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<DrawUniforms>() as u64
                    ),
                },
                count: None,
            }],
        });
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Texture Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniform Buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        // One aligned slot per draw, selected with a dynamic offset.
        let draw_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer (Dynamic)"),
            size: (UNIFORM_ALIGNMENT * MAX_DRAWS) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let draw_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw Bind Group"),
            layout: &draw_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &draw_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let white = upload_texture(
            &device,
            &queue,
            &Texture {
                width: 1,
                height: 1,
                pixels: vec![[255, 255, 255, 255]],
            },
            "White Texture",
        );

        let (hdr_view, depth_view) = create_targets(&device, width, height);
        let bloom = BloomProcessor::new(&device, output_format, width, height);

        Self {
            device,
            queue,
            width,
            height,
            shader,
            pipeline_layout,
            pipelines: HashMap::new(),
            frame_buffer,
            frame_bind_group,
            draw_buffer,
            draw_bind_group,
            texture_layout,
            sampler,
            white,
            geometries: HashMap::new(),
            textures: HashMap::new(),
            texture_bind_groups: HashMap::new(),
            hdr_view,
            depth_view,
            bloom,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        let (hdr_view, depth_view) = create_targets(&self.device, width, height);
        self.hdr_view = hdr_view;
        self.depth_view = depth_view;
        self.bloom.resize(&self.device, width, height);
    }

    /// Drop cached GPU copies of disposed resources.
    pub fn release(&mut self, ids: &[ResourceId]) {
        for id in ids {
            match id {
                ResourceId::Geometry(handle) => {
                    self.geometries.remove(handle);
                }
                ResourceId::Texture(handle) => {
                    self.textures.remove(handle);
                    self.texture_bind_groups
                        .retain(|(map, emissive), _| map != &Some(*handle) && emissive != &Some(*handle));
                }
                // Materials live in per-frame uniforms only.
                ResourceId::Material(_) => {}
            }
        }
    }

    pub fn clear(&mut self) {
        self.geometries.clear();
        self.textures.clear();
        self.texture_bind_groups.clear();
        self.pipelines.clear();
    }

    pub fn cached_geometries(&self) -> usize {
        self.geometries.len()
    }

    fn sync_geometry(&mut self, resources: &ResourceRegistry, handle: GeometryHandle) {
        let Some(geometry) = resources.geometry(handle) else {
            return;
        };
        let stale = self
            .geometries
            .get(&handle)
            .map_or(true, |gpu| gpu.revision != geometry.revision);
        if !stale {
            return;
        }
        match GpuGeometry::upload(&self.device, geometry, &format!("Geometry {}", handle.0)) {
            Some(gpu) => {
                self.geometries.insert(handle, gpu);
            }
            None => {
                self.geometries.remove(&handle);
            }
        }
    }

    fn sync_textures(&mut self, resources: &ResourceRegistry, pair: TexturePair) {
        for handle in [pair.0, pair.1].into_iter().flatten() {
            if self.textures.contains_key(&handle) {
                continue;
            }
            if let Some(texture) = resources.texture(handle) {
                let view = upload_texture(
                    &self.device,
                    &self.queue,
                    texture,
                    &format!("Texture {}", handle.0),
                );
                self.textures.insert(handle, view);
            }
        }
        if self.texture_bind_groups.contains_key(&pair) {
            return;
        }
        let lookup = |h: Option<TextureHandle>| {
            h.and_then(|h| self.textures.get(&h)).unwrap_or(&self.white)
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Texture Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(lookup(pair.0)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(lookup(pair.1)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.texture_bind_groups.insert(pair, bind_group);
    }

    /// Draw `frame` and composite it into `target`.
    pub fn render(&mut self, frame: &FrameInput<'_>, target: &wgpu::TextureView) {
        let draws = draw_list::collect_draws(frame);

        // Uploads and pipeline creation happen before the pass borrows anything.
        for draw in &draws {
            self.sync_geometry(frame.resources, draw.geometry);
            self.sync_textures(frame.resources, draw.textures);
            if !self.pipelines.contains_key(&draw.key) {
                let pipeline = pipeline::create_scene_pipeline(
                    &self.device,
                    &self.pipeline_layout,
                    &self.shader,
                    draw.key,
                );
                self.pipelines.insert(draw.key, pipeline);
            }
        }

        let uniforms = draw_list::frame_uniforms(frame, self.width, self.height);
        self.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniforms));
        // queue.write_buffer is not recorded in the pass, so every slot is written up front.
        for (slot, draw) in draws.iter().enumerate() {
            self.queue.write_buffer(
                &self.draw_buffer,
                (slot * UNIFORM_ALIGNMENT) as u64,
                bytemuck::bytes_of(&draw.uniforms),
            );
        }

        let [r, g, b] = frame.scene.background.to_linear();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Scene Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.hdr_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_bind_group(0, &self.frame_bind_group, &[]);

            for (slot, draw) in draws.iter().enumerate() {
                let (Some(gpu), Some(pipeline), Some(textures)) = (
                    self.geometries.get(&draw.geometry),
                    self.pipelines.get(&draw.key),
                    self.texture_bind_groups.get(&draw.textures),
                ) else {
                    continue;
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(1, &self.draw_bind_group, &[(slot * UNIFORM_ALIGNMENT) as u32]);
                pass.set_bind_group(2, textures, &[]);
                pass.set_vertex_buffer(0, gpu.vertex_buffer.slice(..));

                match draw.key.primitive {
                    Primitive::Triangles => {
                        if let Some(indices) = &gpu.index_buffer {
                            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                            pass.draw_indexed(0..gpu.index_count, 0, 0..1);
                        }
                    }
                    Primitive::Wireframe => {
                        if let Some(edges) = &gpu.edge_buffer {
                            pass.set_index_buffer(edges.slice(..), wgpu::IndexFormat::Uint32);
                            pass.draw_indexed(0..gpu.edge_count, 0, 0..1);
                        }
                    }
                    Primitive::LineStrip => pass.draw(0..gpu.vertex_count, 0..1),
                    // Six vertices per quad, one instance per point.
                    Primitive::Points => pass.draw(0..6, 0..gpu.vertex_count),
                }
            }
        }

        self.bloom.process(
            &self.device,
            &mut encoder,
            &self.queue,
            &self.hdr_view,
            target,
            &frame.post.bloom,
            frame.post.tone_mapping,
            frame.post.exposure,
        );
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn create_targets(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::TextureView, wgpu::TextureView) {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let target = |label, format, usage| {
        device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default())
    };
    (
        target(
            "Scene HDR Target",
            HDR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        ),
        target(
            "Scene Depth Target",
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        ),
    )
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &Texture,
    label: &str,
) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: texture.width.max(1),
        height: texture.height.max(1),
        depth_or_array_layers: 1,
    };
    let gpu = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let expected = (size.width * size.height) as usize;
    if texture.pixels.len() >= expected {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &gpu,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texture.pixels[..expected]),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            size,
        );
    } else {
        log::warn!("{}: pixel data shorter than {}x{}", label, size.width, size.height);
    }
    gpu.create_view(&wgpu::TextureViewDescriptor::default())
}
