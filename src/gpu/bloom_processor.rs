//! Bloom and tone-mapping passes.
//!
//! The scene is drawn into a linear HDR texture. This processor then runs:
//! 1. Threshold - bright pixels into a half-resolution target
//! 2. Separable blur - horizontal then vertical
//! 3. Composite - scene plus glow, exposure, tone mapping, into the output
//!
//! The composite pass always runs, so the output is correctly tone mapped
//! even with bloom switched off.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::gpu::pipeline::HDR_FORMAT;
use crate::post_processing::{BloomStage, ToneMapping};

/// Bloom targets are this many times smaller than the output on each axis.
pub const BLOOM_DOWNSAMPLE: u32 = 2;

const SOFT_KNEE: f32 = 0.5;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ThresholdUniforms {
    threshold: f32,
    soft_knee: f32,
    _padding: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlurUniforms {
    direction_and_step: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct CompositeUniforms {
    strength: f32,
    exposure: f32,
    tone_mapping: f32,
    encode_srgb: f32,
}

impl CompositeUniforms {
    fn new(bloom: &BloomStage, tone_mapping: ToneMapping, exposure: f32, encode_srgb: bool) -> Self {
        Self {
            strength: if bloom.is_active() { bloom.strength } else { 0.0 },
            exposure: if exposure.is_finite() { exposure.max(0.0) } else { 1.0 },
            tone_mapping: match tone_mapping {
                ToneMapping::None => 0.0,
                ToneMapping::Reinhard => 1.0,
            },
            encode_srgb: if encode_srgb { 1.0 } else { 0.0 },
        }
    }
}

/// Texel step between blur taps for a radius in `0.0..=1.0`.
pub fn blur_step(radius: f32) -> f32 {
    1.0 + radius.clamp(0.0, 1.0) * 3.0
}

pub fn bloom_extent(width: u32, height: u32) -> (u32, u32) {
    ((width / BLOOM_DOWNSAMPLE).max(1), (height / BLOOM_DOWNSAMPLE).max(1))
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

const QUAD_VERTICES: &[QuadVertex] = &[
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
];

struct UniformSlot {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl UniformSlot {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, size: usize, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn create_target(device: &wgpu::Device, width: u32, height: u32, label: &str) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    layouts: &[&wgpu::BindGroupLayout],
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[QuadVertex::desc()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

pub struct BloomProcessor {
    bloom_view_a: wgpu::TextureView,
    bloom_view_b: wgpu::TextureView,
    bloom_width: u32,
    bloom_height: u32,

    threshold_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,

    single_texture_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,

    threshold_uniforms: UniformSlot,
    // One per direction: both blur writes land before the encoder is submitted.
    blur_h_uniforms: UniformSlot,
    blur_v_uniforms: UniformSlot,
    composite_uniforms: UniformSlot,

    quad_vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    encode_srgb: bool,
}

impl BloomProcessor {
    pub fn new(
        device: &wgpu::Device,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let (bloom_width, bloom_height) = bloom_extent(width, height);
        let bloom_view_a = create_target(device, bloom_width, bloom_height, "Bloom A");
        let bloom_view_b = create_target(device, bloom_width, bloom_height, "Bloom B");

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let quad_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Quad Buffer"),
            contents: bytemuck::cast_slice(QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let single_texture_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Bloom Single Texture Layout"),
                entries: &[texture_entry(0), sampler_entry(1)],
            });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Composite Layout"),
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                texture_entry(2),
                sampler_entry(3),
            ],
        });
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Uniform Layout"),
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

        let threshold_pipeline = fullscreen_pipeline(
            device,
            "Bloom Threshold",
            include_str!("shaders/bloom_threshold.wgsl"),
            &[&single_texture_layout, &uniform_layout],
            HDR_FORMAT,
        );
        let blur_pipeline = fullscreen_pipeline(
            device,
            "Bloom Blur",
            include_str!("shaders/bloom_blur.wgsl"),
            &[&single_texture_layout, &uniform_layout],
            HDR_FORMAT,
        );
        let composite_pipeline = fullscreen_pipeline(
            device,
            "Bloom Composite",
            include_str!("shaders/bloom_composite.wgsl"),
            &[&composite_layout, &uniform_layout],
            output_format,
        );

        let threshold_uniforms = UniformSlot::new(
            device,
            &uniform_layout,
            std::mem::size_of::<ThresholdUniforms>(),
            "Bloom Threshold Uniforms",
        );
        let blur_size = std::mem::size_of::<BlurUniforms>();
        let blur_h_uniforms =
            UniformSlot::new(device, &uniform_layout, blur_size, "Bloom Blur H Uniforms");
        let blur_v_uniforms =
            UniformSlot::new(device, &uniform_layout, blur_size, "Bloom Blur V Uniforms");
        let composite_uniforms = UniformSlot::new(
            device,
            &uniform_layout,
            std::mem::size_of::<CompositeUniforms>(),
            "Bloom Composite Uniforms",
        );

        Self {
            bloom_view_a,
            bloom_view_b,
            bloom_width,
            bloom_height,
            threshold_pipeline,
            blur_pipeline,
            composite_pipeline,
            single_texture_layout,
            composite_layout,
            threshold_uniforms,
            blur_h_uniforms,
            blur_v_uniforms,
            composite_uniforms,
            quad_vertex_buffer,
            sampler,
            encode_srgb: !output_format.is_srgb(),
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let (bloom_width, bloom_height) = bloom_extent(width, height);
        if bloom_width == self.bloom_width && bloom_height == self.bloom_height {
            return;
        }
        self.bloom_width = bloom_width;
        self.bloom_height = bloom_height;
        self.bloom_view_a = create_target(device, bloom_width, bloom_height, "Bloom A");
        self.bloom_view_b = create_target(device, bloom_width, bloom_height, "Bloom B");
    }

    /// Run the chain from `input_view` (HDR scene) into `output_view`.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        input_view: &wgpu::TextureView,
        output_view: &wgpu::TextureView,
        bloom: &BloomStage,
        tone_mapping: ToneMapping,
        exposure: f32,
    ) {
        if bloom.is_active() {
            let threshold = ThresholdUniforms {
                threshold: bloom.threshold.max(0.0),
                soft_knee: SOFT_KNEE,
                _padding: [0.0; 2],
            };
            queue.write_buffer(
                &self.threshold_uniforms.buffer,
                0,
                bytemuck::bytes_of(&threshold),
            );
            self.fullscreen_pass(
                encoder,
                "Bloom Threshold Pass",
                &self.threshold_pipeline,
                &self.single_texture_bind_group(device, input_view),
                &self.threshold_uniforms,
                &self.bloom_view_a,
            );

            let step = blur_step(bloom.radius);
            for (slot, direction) in [
                (&self.blur_h_uniforms, [1.0, 0.0]),
                (&self.blur_v_uniforms, [0.0, 1.0]),
            ] {
                let uniforms = BlurUniforms {
                    direction_and_step: [direction[0], direction[1], step, 0.0],
                };
                queue.write_buffer(&slot.buffer, 0, bytemuck::bytes_of(&uniforms));
            }
            self.fullscreen_pass(
                encoder,
                "Bloom Blur H Pass",
                &self.blur_pipeline,
                &self.single_texture_bind_group(device, &self.bloom_view_a),
                &self.blur_h_uniforms,
                &self.bloom_view_b,
            );
            self.fullscreen_pass(
                encoder,
                "Bloom Blur V Pass",
                &self.blur_pipeline,
                &self.single_texture_bind_group(device, &self.bloom_view_b),
                &self.blur_v_uniforms,
                &self.bloom_view_a,
            );
        }

        let composite = CompositeUniforms::new(bloom, tone_mapping, exposure, self.encode_srgb);
        queue.write_buffer(
            &self.composite_uniforms.buffer,
            0,
            bytemuck::bytes_of(&composite),
        );
        let textures = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Composite Textures"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.bloom_view_a),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.fullscreen_pass(
            encoder,
            "Bloom Composite Pass",
            &self.composite_pipeline,
            &textures,
            &self.composite_uniforms,
            output_view,
        );
    }

    fn single_texture_bind_group(
        &self,
        device: &wgpu::Device,
        view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Source Texture"),
            layout: &self.single_texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn fullscreen_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        textures: &wgpu::BindGroup,
        uniforms: &UniformSlot,
        output: &wgpu::TextureView,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, textures, &[]);
        pass.set_bind_group(1, &uniforms.bind_group, &[]);
        pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_step_range() {
        assert_eq!(blur_step(0.0), 1.0);
        assert_eq!(blur_step(1.0), 4.0);
        assert_eq!(blur_step(7.0), 4.0);
        assert_eq!(blur_step(-1.0), 1.0);
    }

    #[test]
    fn test_bloom_extent_never_zero() {
        assert_eq!(bloom_extent(800, 600), (400, 300));
        assert_eq!(bloom_extent(1, 1), (1, 1));
    }

    #[test]
    fn test_composite_uniforms() {
        let mut bloom = BloomStage::new(1.5);
        let uniforms = CompositeUniforms::new(&bloom, ToneMapping::Reinhard, 1.0, true);
        assert_eq!(uniforms.strength, 1.5);
        assert_eq!(uniforms.tone_mapping, 1.0);
        assert_eq!(uniforms.encode_srgb, 1.0);

        bloom.set_strength(0.0);
        let uniforms = CompositeUniforms::new(&bloom, ToneMapping::None, f32::NAN, false);
        assert_eq!(uniforms.strength, 0.0);
        assert_eq!(uniforms.exposure, 1.0);
        assert_eq!(uniforms.tone_mapping, 0.0);
    }
}
