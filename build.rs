/// Build script for DistRHI
///
/// The frame driver embeds its HLSL with `include_str!` and the DX12 backend
/// compiles it at runtime via D3DCompile, so only a rebuild trigger is needed.
fn main() {
    println!("cargo:rerun-if-changed=src/shaders/frame.hlsl");
}
