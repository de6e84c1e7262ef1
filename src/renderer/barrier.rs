//! 资源状态与屏障
//!
//! 抽象的资源状态是一个位掩码，每一位独立映射到后端的原生状态，
//! 多个位按位或组合成更宽的原生状态（例如 `SHADER_RESOURCE`
//! 在 DX12 上同时对应像素与非像素着色器资源状态）。
//!
//! 本层不追踪资源当前状态，调用方必须提供正确的“之前”状态。

use bitflags::bitflags;

use crate::gfx::backend::GraphicsApi;

use super::resource::Buffer;
use super::target::RenderTarget;

bitflags! {
    /// 抽象资源状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const RENDER_TARGET = 1 << 0;
        const PRESENT = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 3;
        const GENERIC_READ = 1 << 4;
        const DEPTH_WRITE = 1 << 5;
        const COPY_DEST = 1 << 6;
        const COPY_SOURCE = 1 << 7;
    }
}

impl ResourceState {
    /// 未定义状态，翻译为原生 COMMON
    pub const UNDEFINED: ResourceState = ResourceState::empty();
}

/// 把抽象状态翻译为后端原生状态
pub fn to_native_state<A: GraphicsApi>(state: ResourceState) -> A::ResourceStates {
    state
        .iter()
        .fold(A::COMMON_STATE, |native, bit| native | A::native_state(bit))
}

/// 渲染目标屏障
pub struct RenderTargetBarrier<'a, A: GraphicsApi> {
    pub render_target: &'a RenderTarget<A>,
    pub current_state: ResourceState,
    pub new_state: ResourceState,
}

/// 缓冲区屏障
pub struct BufferBarrier<'a, A: GraphicsApi> {
    pub buffer: &'a Buffer<A>,
    pub current_state: ResourceState,
    pub new_state: ResourceState,
}

impl<'a, A: GraphicsApi> RenderTargetBarrier<'a, A> {
    pub fn new(render_target: &'a RenderTarget<A>, current_state: ResourceState, new_state: ResourceState) -> Self {
        Self {
            render_target,
            current_state,
            new_state,
        }
    }
}

impl<'a, A: GraphicsApi> BufferBarrier<'a, A> {
    pub fn new(buffer: &'a Buffer<A>, current_state: ResourceState, new_state: ResourceState) -> Self {
        Self {
            buffer,
            current_state,
            new_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessApi, HeadlessState};

    #[test]
    fn test_empty_state_is_common() {
        assert_eq!(to_native_state::<HeadlessApi>(ResourceState::UNDEFINED), HeadlessState::COMMON);
    }

    #[test]
    fn test_single_bit_translation() {
        assert_eq!(
            to_native_state::<HeadlessApi>(ResourceState::RENDER_TARGET),
            HeadlessState::RENDER_TARGET
        );
        assert_eq!(to_native_state::<HeadlessApi>(ResourceState::PRESENT), HeadlessState::PRESENT);
        assert_eq!(
            to_native_state::<HeadlessApi>(ResourceState::DEPTH_WRITE),
            HeadlessState::DEPTH_WRITE
        );
    }

    #[test]
    fn test_shader_resource_widens() {
        let native = to_native_state::<HeadlessApi>(ResourceState::SHADER_RESOURCE);
        assert_eq!(
            native,
            HeadlessState::PIXEL_SHADER_RESOURCE | HeadlessState::NON_PIXEL_SHADER_RESOURCE
        );
    }

    #[test]
    fn test_combined_bits_or_together() {
        // 每个位的映射互不干扰：组合的翻译等于逐位翻译的并集
        let all = ResourceState::all();
        let mut expected = HeadlessState::COMMON;
        for bit in all.iter() {
            expected |= to_native_state::<HeadlessApi>(bit);
        }
        assert_eq!(to_native_state::<HeadlessApi>(all), expected);

        let mixed = ResourceState::VERTEX_AND_CONSTANT_BUFFER | ResourceState::COPY_SOURCE;
        assert_eq!(
            to_native_state::<HeadlessApi>(mixed),
            HeadlessState::VERTEX_AND_CONSTANT_BUFFER | HeadlessState::COPY_SOURCE
        );
    }
}
