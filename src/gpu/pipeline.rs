use crate::gpu::mesh::Vertex;
use crate::resources::{Blending, Material};

/// Linear HDR format the scene is drawn into before post-processing.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Triangles,
    Wireframe,
    Points,
    LineStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Additive,
}

impl BlendMode {
    pub fn for_material(material: &Material) -> Self {
        match material.blending {
            Blending::Additive => BlendMode::Additive,
            Blending::Normal if material.transparent || material.opacity < 1.0 => BlendMode::Alpha,
            Blending::Normal => BlendMode::Opaque,
        }
    }

    fn state(self) -> wgpu::BlendState {
        match self {
            BlendMode::Opaque => wgpu::BlendState::REPLACE,
            BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
            BlendMode::Additive => wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Zero,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            },
        }
    }
}

/// Everything that selects a distinct scene pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub primitive: Primitive,
    pub blend: BlendMode,
    pub depth_write: bool,
}

impl PipelineKey {
    pub fn is_transparent(&self) -> bool {
        self.blend != BlendMode::Opaque
    }
}

pub fn create_scene_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    key: PipelineKey,
) -> wgpu::RenderPipeline {
    let (vs, fs, buffers, topology) = match key.primitive {
        Primitive::Triangles => (
            "vs_mesh",
            "fs_mesh",
            [Vertex::desc()],
            wgpu::PrimitiveTopology::TriangleList,
        ),
        Primitive::Wireframe => (
            "vs_mesh",
            "fs_mesh",
            [Vertex::desc()],
            wgpu::PrimitiveTopology::LineList,
        ),
        Primitive::LineStrip => (
            "vs_mesh",
            "fs_mesh",
            [Vertex::desc()],
            wgpu::PrimitiveTopology::LineStrip,
        ),
        Primitive::Points => (
            "vs_points",
            "fs_points",
            [Vertex::instance_desc()],
            wgpu::PrimitiveTopology::TriangleList,
        ),
    };

    let label = format!("Scene Pipeline {:?}", key);
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(vs),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fs),
            targets: &[Some(wgpu::ColorTargetState {
                format: HDR_FORMAT,
                blend: Some(key.blend.state()),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // Scripts build open surfaces and flip normals freely.
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: key.depth_write,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}
