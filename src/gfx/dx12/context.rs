//! DirectX 12 适配器上下文
//!
//! # 初始化流程
//!
//! 1. 按需启用调试层（以及 GPU 验证）
//! 2. 创建 DXGI 工厂
//! 3. 枚举适配器，选择第一个支持目标功能级别的硬件适配器

use tracing::{debug, warn};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::AdapterContext;
use crate::renderer::{FeatureLevel, GpuDesc, RendererContextDesc};

use super::device::Dx12Device;
use super::Dx12Api;

/// DXGI 工厂与选中的适配器
pub struct Dx12Context {
    factory: IDXGIFactory4,
    adapter: IDXGIAdapter1,
    feature_level: D3D_FEATURE_LEVEL,
    gpu: GpuDesc,
}

// DXGI 工厂与适配器是线程安全的
unsafe impl Send for Dx12Context {}
unsafe impl Sync for Dx12Context {}

fn native_feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

fn enable_debug_layer(gpu_based_validation: bool) {
    unsafe {
        let mut debug: Option<ID3D12Debug> = None;
        match D3D12GetDebugInterface(&mut debug) {
            Ok(()) => {
                if let Some(debug) = debug {
                    debug.EnableDebugLayer();
                    debug!("DX12 debug layer enabled");
                    if gpu_based_validation {
                        match debug.cast::<ID3D12Debug1>() {
                            Ok(debug1) => debug1.SetEnableGPUBasedValidation(true),
                            Err(e) => warn!("GPU based validation unavailable: {}", e.message()),
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to enable DX12 debug layer: {}", e.message()),
        }
    }
}

fn adapter_name(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

impl Dx12Context {
    pub fn factory(&self) -> &IDXGIFactory4 {
        &self.factory
    }

    pub fn adapter(&self) -> &IDXGIAdapter1 {
        &self.adapter
    }
}

impl AdapterContext<Dx12Api> for Dx12Context {
    fn create(desc: &RendererContextDesc) -> Result<Self> {
        if desc.enable_gpu_based_validation || cfg!(debug_assertions) {
            enable_debug_layer(desc.enable_gpu_based_validation);
        }

        let flags = if desc.enable_gpu_based_validation {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(flags) }.map_err(|e| {
            DistRhiError::Graphics(GraphicsError::ContextCreation(format!(
                "Failed to create DXGI factory: {}",
                e.message()
            )))
        })?;

        let feature_level = native_feature_level(desc.feature_level);

        let mut index = 0;
        loop {
            let adapter = match unsafe { factory.EnumAdapters1(index) } {
                Ok(adapter) => adapter,
                Err(_) => break,
            };
            index += 1;

            let adapter_desc = match unsafe { adapter.GetDesc1() } {
                Ok(adapter_desc) => adapter_desc,
                Err(_) => continue,
            };
            if adapter_desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
                continue;
            }

            // 只探测功能级别，探测用的设备立即释放
            let mut candidate: Option<ID3D12Device> = None;
            if unsafe { D3D12CreateDevice(&adapter, feature_level, &mut candidate) }.is_err() {
                debug!(adapter = %adapter_name(&adapter_desc), "Adapter skipped: feature level unsupported");
                continue;
            }

            let gpu = GpuDesc {
                name: adapter_name(&adapter_desc),
                vendor_id: adapter_desc.VendorId,
                device_id: adapter_desc.DeviceId,
                dedicated_video_memory: adapter_desc.DedicatedVideoMemory as u64,
                feature_level: desc.feature_level,
            };

            return Ok(Self {
                factory,
                adapter,
                feature_level,
                gpu,
            });
        }

        Err(GraphicsError::ContextCreation(format!(
            "No hardware adapter supports feature level {:?}",
            desc.feature_level
        ))
        .into())
    }

    fn create_device(&self) -> Result<Dx12Device> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&self.adapter, self.feature_level, &mut device) }.map_err(|e| {
            DistRhiError::Graphics(GraphicsError::DeviceCreation(format!(
                "Failed to create D3D12 device: {}",
                e.message()
            )))
        })?;
        let device = device.ok_or_else(|| {
            DistRhiError::Graphics(GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))
        })?;

        debug!(adapter = %self.gpu.name, "D3D12 device created");
        Ok(Dx12Device::new(device, self.factory.clone()))
    }

    fn gpu_desc(&self) -> &GpuDesc {
        &self.gpu
    }
}
