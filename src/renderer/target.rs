//! 渲染目标
//!
//! 颜色目标使用 RTV，深度目标使用 DSV，每个目标拥有自己的视图句柄。
//! 交换链的后备缓冲也以 `RenderTarget` 的形式交给调用方。

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{GraphicsApi, GraphicsDevice, RenderTargetRaw};

use super::barrier::{to_native_state, ResourceState};
use super::Renderer;

/// 一次最多绑定的颜色目标数
pub const MAX_RENDER_TARGET_ATTACHMENTS: usize = 8;

/// 默认清除颜色
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.5, 0.5, 0.5, 1.0];

/// 图像格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Undefined,
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    D32Float,
}

impl ImageFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::D32Float)
    }
}

/// 清除值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color(DEFAULT_CLEAR_COLOR)
    }
}

impl ClearValue {
    /// 深度 1.0、模板 0
    pub fn depth_one() -> Self {
        ClearValue::DepthStencil { depth: 1.0, stencil: 0 }
    }
}

/// 绑定时对已有内容的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadAction {
    #[default]
    DontCare,
    Load,
    Clear,
}

/// 渲染目标描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub clear_value: ClearValue,
    pub start_state: ResourceState,
}

impl RenderTargetDesc {
    /// 颜色目标，初始状态为 `RENDER_TARGET`
    pub fn color(width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            width,
            height,
            format,
            clear_value: ClearValue::default(),
            start_state: ResourceState::RENDER_TARGET,
        }
    }

    /// 深度目标，初始状态为 `DEPTH_WRITE`
    pub fn depth(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: ImageFormat::D32Float,
            clear_value: ClearValue::depth_one(),
            start_state: ResourceState::DEPTH_WRITE,
        }
    }
}

/// 渲染目标
pub struct RenderTarget<A: GraphicsApi> {
    raw: A::RenderTarget,
    desc: RenderTargetDesc,
}

impl<A: GraphicsApi> RenderTarget<A> {
    pub(crate) fn from_raw(raw: A::RenderTarget, desc: RenderTargetDesc) -> Self {
        Self { raw, desc }
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> ImageFormat {
        self.desc.format
    }

    pub fn clear_value(&self) -> ClearValue {
        self.desc.clear_value
    }

    pub fn desc(&self) -> &RenderTargetDesc {
        &self.desc
    }

    pub fn raw(&self) -> &A::RenderTarget {
        &self.raw
    }
}

/// 颜色目标绑定
pub struct BindRenderTargetDesc<'a, A: GraphicsApi> {
    pub render_target: &'a RenderTarget<A>,
    pub load_action: LoadAction,
    /// 为 `None` 时使用目标自身的清除值
    pub clear_value: Option<[f32; 4]>,
}

/// 深度目标绑定
pub struct BindDepthTargetDesc<'a, A: GraphicsApi> {
    pub render_target: &'a RenderTarget<A>,
    pub load_action: LoadAction,
    /// 为 `None` 时使用目标自身的清除值
    pub clear_depth: Option<f32>,
}

/// 一次绑定的全部目标
pub struct BindRenderTargetsDesc<'a, A: GraphicsApi> {
    pub render_targets: Vec<BindRenderTargetDesc<'a, A>>,
    pub depth_stencil: Option<BindDepthTargetDesc<'a, A>>,
}

impl<'a, A: GraphicsApi> BindRenderTargetDesc<'a, A> {
    /// 绑定并用目标的清除值清除
    pub fn clear(render_target: &'a RenderTarget<A>) -> Self {
        Self {
            render_target,
            load_action: LoadAction::Clear,
            clear_value: None,
        }
    }

    /// 绑定并保留已有内容
    pub fn load(render_target: &'a RenderTarget<A>) -> Self {
        Self {
            render_target,
            load_action: LoadAction::Load,
            clear_value: None,
        }
    }

    /// 实际使用的清除颜色
    pub fn resolved_clear_color(&self) -> [f32; 4] {
        match (self.clear_value, self.render_target.clear_value()) {
            (Some(color), _) => color,
            (None, ClearValue::Color(color)) => color,
            (None, ClearValue::DepthStencil { .. }) => DEFAULT_CLEAR_COLOR,
        }
    }
}

impl<'a, A: GraphicsApi> BindDepthTargetDesc<'a, A> {
    pub fn clear(render_target: &'a RenderTarget<A>) -> Self {
        Self {
            render_target,
            load_action: LoadAction::Clear,
            clear_depth: None,
        }
    }

    /// 实际使用的清除深度
    pub fn resolved_clear_depth(&self) -> f32 {
        match (self.clear_depth, self.render_target.clear_value()) {
            (Some(depth), _) => depth,
            (None, ClearValue::DepthStencil { depth, .. }) => depth,
            (None, ClearValue::Color(_)) => 1.0,
        }
    }
}

impl<A: GraphicsApi> Renderer<A> {
    /// 创建颜色或深度渲染目标
    pub fn add_render_target(&self, desc: &RenderTargetDesc) -> Result<RenderTarget<A>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DistRhiError::InvalidArgument(format!(
                "render target extent {}x{} is empty",
                desc.width, desc.height
            )));
        }
        if desc.format == ImageFormat::Undefined {
            return Err(DistRhiError::InvalidArgument(
                "render target format is undefined".to_string(),
            ));
        }

        let clear_matches = match desc.clear_value {
            ClearValue::Color(_) => !desc.format.is_depth(),
            ClearValue::DepthStencil { .. } => desc.format.is_depth(),
        };
        if !clear_matches {
            return Err(DistRhiError::InvalidArgument(format!(
                "clear value {:?} does not match format {:?}",
                desc.clear_value, desc.format
            )));
        }

        let raw = self
            .device
            .create_render_target(desc, to_native_state::<A>(desc.start_state))?;

        tracing::debug!(
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            view = raw.view().ptr,
            "Render target created"
        );

        Ok(RenderTarget::from_raw(raw, *desc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_util::headless_renderer;

    #[test]
    fn test_add_color_and_depth_targets() {
        let renderer = headless_renderer();
        let color = renderer
            .add_render_target(&RenderTargetDesc::color(64, 32, ImageFormat::R8G8B8A8Unorm))
            .unwrap();
        let depth = renderer.add_render_target(&RenderTargetDesc::depth(64, 32)).unwrap();

        assert_eq!(color.width(), 64);
        assert_eq!(depth.format(), ImageFormat::D32Float);
        assert_ne!(color.raw().view(), depth.raw().view());
    }

    #[test]
    fn test_invalid_targets() {
        let renderer = headless_renderer();
        assert!(renderer
            .add_render_target(&RenderTargetDesc::color(0, 32, ImageFormat::R8G8B8A8Unorm))
            .is_err());
        assert!(renderer
            .add_render_target(&RenderTargetDesc::color(8, 8, ImageFormat::Undefined))
            .is_err());

        let mut mismatched = RenderTargetDesc::depth(8, 8);
        mismatched.clear_value = ClearValue::Color([0.0; 4]);
        assert!(renderer.add_render_target(&mismatched).is_err());
    }

    #[test]
    fn test_resolved_clear_values() {
        let renderer = headless_renderer();
        let mut desc = RenderTargetDesc::color(4, 4, ImageFormat::R8G8B8A8Unorm);
        let gray = renderer.add_render_target(&desc).unwrap();
        desc.clear_value = ClearValue::Color([1.0, 0.0, 0.0, 1.0]);
        let red = renderer.add_render_target(&desc).unwrap();

        assert_eq!(BindRenderTargetDesc::clear(&gray).resolved_clear_color(), DEFAULT_CLEAR_COLOR);
        assert_eq!(BindRenderTargetDesc::clear(&red).resolved_clear_color(), [1.0, 0.0, 0.0, 1.0]);

        let mut bind = BindRenderTargetDesc::clear(&red);
        bind.clear_value = Some([0.0; 4]);
        assert_eq!(bind.resolved_clear_color(), [0.0; 4]);

        let depth = renderer.add_render_target(&RenderTargetDesc::depth(4, 4)).unwrap();
        assert_eq!(BindDepthTargetDesc::clear(&depth).resolved_clear_depth(), 1.0);
    }
}
