//! 抽象枚举到 D3D12 / DXGI 枚举的转换

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::renderer::descriptor::{DescriptorHeapType, DescriptorType};
use crate::renderer::pipeline::{CompareMode, CullMode, FillMode, ShaderStage};
use crate::renderer::sync::QueueType;
use crate::renderer::target::ImageFormat;

pub fn format(format: ImageFormat) -> DXGI_FORMAT {
    match format {
        ImageFormat::Undefined => DXGI_FORMAT_UNKNOWN,
        ImageFormat::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        ImageFormat::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        ImageFormat::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        ImageFormat::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        ImageFormat::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        ImageFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

pub fn command_list_type(ty: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match ty {
        QueueType::Graphics => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Transfer => D3D12_COMMAND_LIST_TYPE_COPY,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
    }
}

pub fn descriptor_heap_type(ty: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

/// 描述符表范围类型；`Undefined` 在创建布局前已被拒绝
pub fn descriptor_range_type(ty: DescriptorType) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match ty {
        DescriptorType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
        DescriptorType::Texture => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorType::UniformBuffer | DescriptorType::Undefined => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
    }
}

pub fn shader_visibility(stages: ShaderStage) -> D3D12_SHADER_VISIBILITY {
    if stages == ShaderStage::VERTEX {
        D3D12_SHADER_VISIBILITY_VERTEX
    } else if stages == ShaderStage::FRAGMENT {
        D3D12_SHADER_VISIBILITY_PIXEL
    } else {
        D3D12_SHADER_VISIBILITY_ALL
    }
}

/// 声明顺序加一即为 D3D12_COMPARISON_FUNC
pub fn comparison_func(mode: CompareMode) -> D3D12_COMPARISON_FUNC {
    D3D12_COMPARISON_FUNC(mode as i32 + 1)
}

pub fn cull_mode(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

pub fn fill_mode(mode: FillMode) -> D3D12_FILL_MODE {
    match mode {
        FillMode::Solid => D3D12_FILL_MODE_SOLID,
        FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_mode_matches_native_values() {
        assert_eq!(comparison_func(CompareMode::Never), D3D12_COMPARISON_FUNC_NEVER);
        assert_eq!(comparison_func(CompareMode::LessEqual), D3D12_COMPARISON_FUNC_LESS_EQUAL);
        assert_eq!(comparison_func(CompareMode::Always), D3D12_COMPARISON_FUNC_ALWAYS);
    }

    #[test]
    fn test_visibility() {
        assert_eq!(shader_visibility(ShaderStage::ALL_GRAPHICS), D3D12_SHADER_VISIBILITY_ALL);
        assert_eq!(shader_visibility(ShaderStage::FRAGMENT), D3D12_SHADER_VISIBILITY_PIXEL);
    }
}
