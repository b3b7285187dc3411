//! One-shot device capability probe.
//!
//! Runs once at engine construction and never again. Picks the concrete
//! texture format for each channel layout with widening fallback, records
//! filterability and device limits, and fails construction outright when no
//! usable floating-point render-target format exists.

use anyhow::{bail, Result};

/// Immutable record of probed device facts.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Two-component format for the velocity field.
    pub velocity_format: wgpu::TextureFormat,
    /// Single-component format for pressure, divergence, and curl.
    pub scalar_format: wgpu::TextureFormat,
    /// Four-component format for dye and the post-fx targets.
    pub dye_format: wgpu::TextureFormat,
    /// Whether every chosen float format supports hardware linear filtering.
    pub linear_filterable: bool,
    pub max_texture_dimension: u32,
    pub backend: wgpu::Backend,
    pub adapter_name: String,
    pub driver: String,
}

/// A format is usable for a simulation field if it can be both rendered to
/// and sampled from.
fn format_usable(adapter: &wgpu::Adapter, format: wgpu::TextureFormat) -> bool {
    let features = adapter.get_texture_format_features(format);
    features
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING)
}

fn format_filterable(adapter: &wgpu::Adapter, format: wgpu::TextureFormat) -> bool {
    adapter
        .get_texture_format_features(format)
        .flags
        .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
}

fn pick_format(
    adapter: &wgpu::Adapter,
    candidates: &[wgpu::TextureFormat],
) -> Option<wgpu::TextureFormat> {
    candidates
        .iter()
        .copied()
        .find(|format| format_usable(adapter, *format))
}

/// Probe the adapter once. Fails when no half-float render-target format is
/// available; the engine cannot be constructed in that case.
pub fn probe(adapter: &wgpu::Adapter) -> Result<Capabilities> {
    use wgpu::TextureFormat::{R16Float, Rg16Float, Rgba16Float};

    let Some(dye_format) = pick_format(adapter, &[Rgba16Float]) else {
        bail!("no supported floating-point render-target format (RGBA16F unavailable)");
    };
    let Some(velocity_format) = pick_format(adapter, &[Rg16Float, Rgba16Float]) else {
        bail!("no supported floating-point render-target format for velocity");
    };
    let Some(scalar_format) = pick_format(adapter, &[R16Float, Rg16Float, Rgba16Float]) else {
        bail!("no supported floating-point render-target format for scalar fields");
    };

    let linear_filterable = format_filterable(adapter, dye_format)
        && format_filterable(adapter, velocity_format)
        && format_filterable(adapter, scalar_format);

    let info = adapter.get_info();
    let limits = adapter.limits();

    Ok(Capabilities {
        velocity_format,
        scalar_format,
        dye_format,
        linear_filterable,
        max_texture_dimension: limits.max_texture_dimension_2d,
        backend: info.backend,
        adapter_name: info.name,
        driver: info.driver,
    })
}

/// Channel count actually stored by the chosen format; widened fallbacks
/// carry unused channels.
pub fn format_channels(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::R16Float => 1,
        wgpu::TextureFormat::Rg16Float => 2,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts_per_format() {
        assert_eq!(format_channels(wgpu::TextureFormat::R16Float), 1);
        assert_eq!(format_channels(wgpu::TextureFormat::Rg16Float), 2);
        assert_eq!(format_channels(wgpu::TextureFormat::Rgba16Float), 4);
        assert_eq!(format_channels(wgpu::TextureFormat::Rgba8Unorm), 4);
    }
}
