//! 着色器、管线布局与图形管线
//!
//! 管线布局对应 DX12 的根签名：每个根参数要么是一个根 CBV，
//! 要么是一个描述符表。图形管线只支持三角形列表拓扑。
//!
//! # 设计原则
//!
//! - 描述结构只描述状态，不持有原生对象
//! - 原生对象创建失败时返回 `GraphicsError`，不做降级

use bitflags::bitflags;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{GraphicsApi, GraphicsDevice};

use super::descriptor::DescriptorType;
use super::target::{ImageFormat, MAX_RENDER_TARGET_ATTACHMENTS};
use super::Renderer;

bitflags! {
    /// 着色器阶段
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// 着色器来源
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// 预编译的字节码
    Bytecode { vertex: Vec<u8>, pixel: Vec<u8> },
    /// HLSL 源码，由后端编译
    Hlsl {
        source: String,
        vs_entry: String,
        ps_entry: String,
    },
}

/// 着色器描述
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub name: String,
    pub source: ShaderSource,
}

impl ShaderDesc {
    /// 以 `VSMain`/`PSMain` 为入口的 HLSL 着色器
    pub fn hlsl(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: ShaderSource::Hlsl {
                source: source.to_string(),
                vs_entry: "VSMain".to_string(),
                ps_entry: "PSMain".to_string(),
            },
        }
    }
}

/// 顶点与像素着色器
pub struct Shader<A: GraphicsApi> {
    raw: A::Shader,
    name: String,
}

impl<A: GraphicsApi> Shader<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &A::Shader {
        &self.raw
    }
}

/// 描述符表中的一段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    pub ty: DescriptorType,
    pub count: u32,
    /// 着色器寄存器编号
    pub binding: u32,
}

/// 根参数类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameterKind {
    /// 根 CBV，寄存器空间 0
    ConstantBuffer { binding: u32 },
    /// 描述符表
    DescriptorTable { ranges: Vec<DescriptorRange> },
}

/// 根参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootParameter {
    pub visibility: ShaderStage,
    pub kind: RootParameterKind,
}

impl RootParameter {
    pub fn constant_buffer(binding: u32, visibility: ShaderStage) -> Self {
        Self {
            visibility,
            kind: RootParameterKind::ConstantBuffer { binding },
        }
    }

    pub fn descriptor_table(ranges: Vec<DescriptorRange>, visibility: ShaderStage) -> Self {
        Self {
            visibility,
            kind: RootParameterKind::DescriptorTable { ranges },
        }
    }
}

/// 管线布局描述
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    pub parameters: Vec<RootParameter>,
}

/// 管线布局（根签名）
pub struct PipelineLayout<A: GraphicsApi> {
    raw: A::PipelineLayout,
    parameter_count: u32,
}

impl<A: GraphicsApi> PipelineLayout<A> {
    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    pub fn raw(&self) -> &A::PipelineLayout {
        &self.raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// 深度比较函数
///
/// 声明顺序与 D3D12_COMPARISON_FUNC 一致，原生值为序号加一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareMode,
}

/// 顶点属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttrib {
    /// HLSL 语义名
    pub semantic: String,
    pub format: ImageFormat,
    /// 顶点缓冲区槽位
    pub binding: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub attribs: Vec<VertexAttrib>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriList,
}

/// 图形管线描述
pub struct GraphicsPipelineDesc<'a, A: GraphicsApi> {
    pub layout: &'a PipelineLayout<A>,
    pub shader: &'a Shader<A>,
    pub rasterizer: RasterizerState,
    /// 为 `None` 时关闭深度测试
    pub depth: Option<DepthState>,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub color_formats: Vec<ImageFormat>,
    pub depth_stencil_format: ImageFormat,
}

/// 图形管线
pub struct Pipeline<A: GraphicsApi> {
    raw: A::Pipeline,
    topology: PrimitiveTopology,
}

impl<A: GraphicsApi> Pipeline<A> {
    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn raw(&self) -> &A::Pipeline {
        &self.raw
    }
}

impl<A: GraphicsApi> Renderer<A> {
    /// 创建着色器
    pub fn add_shader(&self, desc: &ShaderDesc) -> Result<Shader<A>> {
        if let ShaderSource::Bytecode { vertex, pixel } = &desc.source {
            if vertex.is_empty() || pixel.is_empty() {
                return Err(DistRhiError::InvalidArgument(format!(
                    "shader '{}' has empty bytecode",
                    desc.name
                )));
            }
        }

        let raw = self.device.create_shader(desc)?;
        tracing::debug!(name = %desc.name, "Shader created");
        Ok(Shader {
            raw,
            name: desc.name.clone(),
        })
    }

    /// 创建管线布局
    pub fn init_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<PipelineLayout<A>> {
        for (index, parameter) in desc.parameters.iter().enumerate() {
            if parameter.visibility.is_empty() {
                return Err(DistRhiError::InvalidArgument(format!(
                    "root parameter {} has no shader visibility",
                    index
                )));
            }
            if let RootParameterKind::DescriptorTable { ranges } = &parameter.kind {
                if ranges.is_empty() {
                    return Err(DistRhiError::InvalidArgument(format!(
                        "descriptor table {} has no ranges",
                        index
                    )));
                }
                if ranges.iter().any(|r| r.ty == DescriptorType::Undefined || r.count == 0) {
                    return Err(DistRhiError::InvalidArgument(format!(
                        "descriptor table {} has an undefined or empty range",
                        index
                    )));
                }
                let samplers = ranges.iter().filter(|r| r.ty == DescriptorType::Sampler).count();
                if samplers != 0 && samplers != ranges.len() {
                    return Err(DistRhiError::InvalidArgument(format!(
                        "descriptor table {} mixes samplers with other descriptors",
                        index
                    )));
                }
            }
        }

        let raw = self.device.create_pipeline_layout(desc)?;
        tracing::debug!(parameters = desc.parameters.len(), "Pipeline layout created");
        Ok(PipelineLayout {
            raw,
            parameter_count: desc.parameters.len() as u32,
        })
    }

    /// 创建图形管线
    pub fn add_pipeline(&self, desc: &GraphicsPipelineDesc<'_, A>) -> Result<Pipeline<A>> {
        if desc.color_formats.len() > MAX_RENDER_TARGET_ATTACHMENTS {
            return Err(DistRhiError::InvalidArgument(format!(
                "{} color formats exceed the limit of {}",
                desc.color_formats.len(),
                MAX_RENDER_TARGET_ATTACHMENTS
            )));
        }
        if desc.color_formats.iter().any(|f| f.is_depth() || *f == ImageFormat::Undefined) {
            return Err(DistRhiError::InvalidArgument(
                "color formats must be defined color formats".to_string(),
            ));
        }
        if desc.depth_stencil_format != ImageFormat::Undefined && !desc.depth_stencil_format.is_depth() {
            return Err(DistRhiError::InvalidArgument(format!(
                "{:?} is not a depth format",
                desc.depth_stencil_format
            )));
        }

        let raw = self.device.create_graphics_pipeline(desc)?;
        tracing::debug!(
            shader = %desc.shader.name(),
            attribs = desc.vertex_layout.attribs.len(),
            targets = desc.color_formats.len(),
            "Graphics pipeline created"
        );
        Ok(Pipeline {
            raw,
            topology: desc.topology,
        })
    }
}
