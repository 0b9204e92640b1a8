pub mod backends;
pub mod bloom_processor;
#[cfg(not(target_arch = "wasm32"))]
pub mod capture;
pub mod draw_list;
pub mod mesh;
pub mod pipeline;
pub mod renderer;

use crate::context::ContextError;

/// Find an adapter (compatible with `surface` when given) and open a device.
pub async fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
    limits: wgpu::Limits,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), ContextError> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(ContextError::NoAdapter)?;
    log::info!("Using adapter: {}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Principia Device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        )
        .await?;
    Ok((adapter, device, queue))
}

/// Prefer an sRGB format so the composite pass can skip manual encoding.
pub fn pick_surface_format(caps: &wgpu::SurfaceCapabilities) -> Option<wgpu::TextureFormat> {
    caps.formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first().copied())
}
