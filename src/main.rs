//! DistRHI 帧循环驱动程序
//!
//! 用 RHI 的公开接口跑一个完整的帧循环：命令环取资源、等待 fence、
//! 重置命令池、录制一个三角形、提交并呈现。默认使用 headless 后端，
//! Windows 上可以用 `--dx12` 切换到 DirectX 12 并打开一个窗口。
//!
//! # 使用方法
//!
//! ```bash
//! # headless 后端，帧数与模拟延迟来自 config.toml
//! cargo run
//!
//! # 覆盖参数
//! cargo run -- --frames 300 --pools 3 --latency-ms 5
//!
//! # DirectX 12（仅 Windows）
//! cargo run -- --dx12 --validation
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use dist_rhi::core::config::{Config, GraphicsBackend};
use dist_rhi::core::log;
use dist_rhi::gfx::backend::GraphicsApi;
use dist_rhi::gfx::headless::{HeadlessApi, HeadlessCompletion, HeadlessContext, HeadlessOptions};
use dist_rhi::renderer::barrier::{RenderTargetBarrier, ResourceState};
use dist_rhi::renderer::descriptor::{Descriptor, DescriptorData, DescriptorSet, DescriptorSetDesc, DescriptorType};
use dist_rhi::renderer::pipeline::{
    DescriptorRange, GraphicsPipelineDesc, Pipeline, PipelineLayout, PipelineLayoutDesc, PrimitiveTopology,
    RasterizerState, RootParameter, Shader, ShaderDesc, ShaderStage, VertexAttrib, VertexLayout,
};
use dist_rhi::renderer::resource::{Buffer, BufferDesc, BufferLoadDesc, ResourceMemoryUsage};
use dist_rhi::renderer::ring::{GpuCmdRing, GpuCmdRingDesc};
use dist_rhi::renderer::ring_buffer::UniformRingBuffer;
use dist_rhi::renderer::swapchain::{SurfaceHandle, SwapChain, SwapChainDesc};
use dist_rhi::renderer::sync::{Fence, Queue, QueueDesc, QueuePresentDesc, QueueSubmitDesc};
use dist_rhi::renderer::target::{BindRenderTargetDesc, BindRenderTargetsDesc, ImageFormat};
use dist_rhi::renderer::{Renderer, RendererContext, RendererContextDesc, RendererDesc};

/// 三角形着色器，常量缓冲区在 b0
const FRAME_SHADER: &str = include_str!("shaders/frame.hlsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

/// 每帧写入环形缓冲区的常量
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    tint: [f32; 4],
    /// x: 帧序号，y: 已运行秒数
    time: [f32; 4],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
];

fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 命令行覆盖
    config.apply_args(std::env::args());

    // 3. 验证配置
    config.validate().context("invalid configuration")?;

    // 4. 初始化日志系统
    let log_file = config
        .logging
        .file_output
        .then(|| config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)
        .context("failed to initialize logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "DistRHI driver starting");
    info!(
        backend = config.renderer.backend.name(),
        pools = config.frame.pool_count,
        cmds_per_pool = config.frame.cmd_per_pool_count,
        frames = config.frame.frame_count,
        "Frame configuration"
    );

    match config.renderer.backend {
        GraphicsBackend::Headless => run_headless(&config),
        GraphicsBackend::Dx12 => run_dx12(&config),
    }
}

fn renderer_desc(config: &Config) -> RendererDesc {
    RendererDesc {
        context: RendererContextDesc {
            enable_gpu_based_validation: config.renderer.enable_gpu_based_validation,
            ..RendererContextDesc::default()
        },
        cbv_srv_uav_heap_size: config.renderer.cbv_srv_uav_heap_size,
        sampler_heap_size: config.renderer.sampler_heap_size,
    }
}

fn run_headless(config: &Config) -> anyhow::Result<()> {
    let completion = match config.headless.gpu_latency_ms {
        0 => HeadlessCompletion::Immediate,
        ms => HeadlessCompletion::Latency(Duration::from_millis(ms)),
    };
    let context = RendererContext::from_raw(HeadlessContext::with_options(HeadlessOptions {
        completion,
        descriptor_increment: config.headless.descriptor_increment,
    }));
    let renderer = Renderer::<HeadlessApi>::new(
        &config.renderer.name,
        &renderer_desc(config),
        Some(Arc::new(context)),
    )?;

    let mut driver = FrameDriver::new(renderer, SurfaceHandle::Offscreen, config)?;
    while !driver.is_finished() {
        driver.render_frame()?;
    }
    driver.finish()
}

#[cfg(target_os = "windows")]
fn run_dx12(config: &Config) -> anyhow::Result<()> {
    use dist_rhi::gfx::Dx12Api;
    use winit::dpi::PhysicalSize;
    use winit::event::{Event, WindowEvent};
    use winit::event_loop::EventLoop;
    use winit::raw_window_handle::HasWindowHandle;
    use winit::window::WindowBuilder;

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(config.renderer.name.as_str())
        .with_inner_size(PhysicalSize::new(config.swapchain.width, config.swapchain.height))
        .build(&event_loop)?;
    let surface = SurfaceHandle::Window(window.window_handle()?.as_raw());

    let renderer = Renderer::<Dx12Api>::new(&config.renderer.name, &renderer_desc(config), None)?;
    let mut driver = Some(FrameDriver::new(renderer, surface, config)?);

    event_loop.run(move |event, elwt| {
        // 交换链引用窗口，窗口要活到驱动结束
        let _ = &window;
        match event {
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => {
                info!("Close requested, shutting down...");
                elwt.exit();
            }
            Event::AboutToWait => {
                let Some(frames) = driver.as_mut() else {
                    return;
                };
                if frames.is_finished() {
                    elwt.exit();
                } else if let Err(e) = frames.render_frame() {
                    tracing::error!("Frame failed: {:#}", e);
                    elwt.exit();
                }
            }
            Event::LoopExiting => {
                if let Some(frames) = driver.take() {
                    if let Err(e) = frames.finish() {
                        tracing::error!("Shutdown failed: {:#}", e);
                    }
                }
            }
            _ => (),
        }
    })?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run_dx12(_config: &Config) -> anyhow::Result<()> {
    bail!("the DirectX 12 backend is only available on Windows, use --headless")
}

/// 帧循环需要的全部对象
///
/// 字段按释放顺序排列，渲染器最后释放。
struct FrameDriver<A: GraphicsApi> {
    ring: GpuCmdRing<A>,
    uniforms: UniformRingBuffer<A>,
    descriptor_set: DescriptorSet,
    vertex_buffer: Buffer<A>,
    pipeline: Pipeline<A>,
    _layout: PipelineLayout<A>,
    _shader: Shader<A>,
    swap_chain: SwapChain<A>,
    idle_fence: Fence<A>,
    queue: Queue<A>,
    renderer: Renderer<A>,
    width: u32,
    height: u32,
    frame_index: u64,
    frame_count: u64,
    started: Instant,
}

impl<A: GraphicsApi> FrameDriver<A> {
    fn new(renderer: Renderer<A>, surface: SurfaceHandle, config: &Config) -> anyhow::Result<Self> {
        let queue = renderer.init_queue(&QueueDesc::default())?;
        let idle_fence = renderer.init_fence()?;

        let ring = GpuCmdRing::new(
            &renderer,
            &queue,
            &GpuCmdRingDesc {
                pool_count: config.frame.pool_count,
                cmd_per_pool_count: config.frame.cmd_per_pool_count,
            },
        )?;

        let swap_chain = renderer.init_swap_chain(
            &queue,
            &SwapChainDesc {
                surface,
                width: config.swapchain.width,
                height: config.swapchain.height,
                image_count: config.swapchain.image_count,
                color_format: ImageFormat::R8G8B8A8Unorm,
                enable_vsync: config.swapchain.vsync,
            },
        )?;

        // 每个在飞帧一份常量
        let constants_size = std::mem::size_of::<FrameConstants>() as u64;
        let uniforms = UniformRingBuffer::new(&renderer, 256 * u64::from(config.frame.pool_count))?;

        let descriptor_set = renderer.add_descriptor_set(&DescriptorSetDesc {
            root_parameter_index: 0,
            max_sets: config.frame.pool_count,
            descriptors: vec![Descriptor::new(DescriptorType::UniformBuffer, 1, 0)],
        })?;

        let shader = renderer.add_shader(&ShaderDesc::hlsl("frame", FRAME_SHADER))?;
        let layout = renderer.init_pipeline_layout(&PipelineLayoutDesc {
            parameters: vec![RootParameter::descriptor_table(
                vec![DescriptorRange {
                    ty: DescriptorType::UniformBuffer,
                    count: 1,
                    binding: 0,
                }],
                ShaderStage::ALL_GRAPHICS,
            )],
        })?;
        let pipeline = renderer.add_pipeline(&GraphicsPipelineDesc {
            layout: &layout,
            shader: &shader,
            rasterizer: RasterizerState::default(),
            depth: None,
            vertex_layout: VertexLayout {
                attribs: vec![
                    VertexAttrib {
                        semantic: "POSITION".to_string(),
                        format: ImageFormat::R32G32B32Float,
                        binding: 0,
                        offset: 0,
                    },
                    VertexAttrib {
                        semantic: "COLOR".to_string(),
                        format: ImageFormat::R32G32B32A32Float,
                        binding: 0,
                        offset: 12,
                    },
                ],
            },
            topology: PrimitiveTopology::TriList,
            color_formats: vec![ImageFormat::R8G8B8A8Unorm],
            depth_stencil_format: ImageFormat::Undefined,
        })?;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let vertex_buffer = renderer.add_resource(&BufferLoadDesc {
            desc: BufferDesc::new(vertex_bytes.len() as u64, ResourceMemoryUsage::GpuOnly)
                .with_stride(std::mem::size_of::<Vertex>() as u32)
                .with_start_state(ResourceState::VERTEX_AND_CONSTANT_BUFFER)
                .with_name("TriangleVertices"),
            data: Some(vertex_bytes),
        })?;

        debug!(constants_size, uniform_ring = uniforms.max_size(), "Frame resources created");

        Ok(Self {
            ring,
            uniforms,
            descriptor_set,
            vertex_buffer,
            pipeline,
            _layout: layout,
            _shader: shader,
            swap_chain,
            idle_fence,
            queue,
            renderer,
            width: config.swapchain.width,
            height: config.swapchain.height,
            frame_index: 0,
            frame_count: u64::from(config.frame.frame_count),
            started: Instant::now(),
        })
    }

    fn is_finished(&self) -> bool {
        self.frame_index >= self.frame_count
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let Some(mut element) = self.ring.next_element(true, 1) else {
            bail!("command ring has no free cmd for a new frame");
        };

        // 上一次使用这个池的帧必须完成后才能重置
        element.fence.wait()?;
        element.pool.reset()?;

        let set_index = element.pool_index;
        let constants = FrameConstants {
            tint: [1.0, 1.0, 1.0, 1.0],
            time: [self.frame_index as f32, self.started.elapsed().as_secs_f32(), 0.0, 0.0],
        };
        let slot = self
            .uniforms
            .try_get_offset(std::mem::size_of::<FrameConstants>() as u64, None)?;
        self.uniforms.buffer_mut().update_pod(slot.offset, &constants)?;
        let ranges = [slot.range()];
        let buffers = [self.uniforms.buffer()];
        self.renderer.update_descriptor_set(
            set_index,
            &self.descriptor_set,
            &[DescriptorData {
                index: 0,
                array_offset: 0,
                buffers: &buffers,
                ranges: &ranges,
            }],
        )?;

        let image = self.swap_chain.acquire_next_image();
        let Some(back_buffer) = self.swap_chain.render_target(image) else {
            bail!("swapchain returned image {} out of range", image);
        };

        let cmd = &mut element.cmds[0];
        cmd.begin()?;
        cmd.resource_barrier(
            &[],
            &[RenderTargetBarrier::new(
                back_buffer,
                ResourceState::PRESENT,
                ResourceState::RENDER_TARGET,
            )],
        );
        cmd.bind_render_targets(Some(&BindRenderTargetsDesc {
            render_targets: vec![BindRenderTargetDesc::clear(back_buffer)],
            depth_stencil: None,
        }));
        cmd.set_viewport(0.0, 0.0, self.width as f32, self.height as f32, 0.0, 1.0);
        cmd.set_scissor(0, 0, self.width, self.height);
        cmd.bind_pipeline(&self.pipeline);
        cmd.bind_descriptor_set(&self.descriptor_set, set_index);
        cmd.bind_vertex_buffers(&[&self.vertex_buffer]);
        cmd.draw(TRIANGLE.len() as u32, 0);
        cmd.bind_render_targets(None);
        cmd.resource_barrier(
            &[],
            &[RenderTargetBarrier::new(
                back_buffer,
                ResourceState::RENDER_TARGET,
                ResourceState::PRESENT,
            )],
        );
        cmd.end()?;

        let cmds = [&*cmd];
        self.queue.submit(&QueueSubmitDesc {
            cmds: &cmds,
            signal_fence: Some(element.fence),
        })?;
        self.queue.present(&QueuePresentDesc {
            swap_chain: &self.swap_chain,
            index: image,
        })?;

        self.frame_index += 1;
        if self.frame_index % 60 == 0 {
            debug!(frame = self.frame_index, image, pool = set_index, "Frame presented");
        }
        Ok(())
    }

    /// 排空队列并释放所有对象
    fn finish(self) -> anyhow::Result<()> {
        self.queue.wait_idle(&self.idle_fence)?;

        let elapsed = self.started.elapsed();
        let average_ms = if self.frame_index > 0 {
            elapsed.as_secs_f64() * 1000.0 / self.frame_index as f64
        } else {
            0.0
        };
        info!(
            frames = self.frame_index,
            elapsed_ms = elapsed.as_millis() as u64,
            average_ms,
            "Frame loop finished"
        );

        let Self {
            ring,
            uniforms,
            descriptor_set,
            vertex_buffer,
            pipeline,
            _layout,
            _shader,
            swap_chain,
            idle_fence,
            queue,
            renderer,
            ..
        } = self;
        drop((ring, uniforms, descriptor_set, vertex_buffer, pipeline, _layout, _shader));
        drop((swap_chain, idle_fence, queue));
        renderer.shutdown();
        Ok(())
    }
}
