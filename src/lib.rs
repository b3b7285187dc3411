//! dyeflow - a real-time, GPU-accelerated 2D fluid dye effect.
//!
//! A grid-based incompressible-flow solver advects a color field through a
//! self-advected velocity field, perturbed by Gaussian "splat" impulses
//! from pointer or programmatic input. The host supplies a wgpu adapter,
//! device, queue, and a surface view each frame; the engine owns every
//! render target, the multi-pass solve, the optional aura/ray-aura post
//! effects, and the capability-driven display fallback chain.
//!
//! The solver is intentionally approximate (fixed-count Jacobi pressure
//! iterations, heuristic vorticity confinement, empirical dissipation) -
//! built for visual plausibility, not numerical accuracy.

pub mod capability;
pub mod compositor;
pub mod config;
pub mod engine;
pub mod input;
pub mod passes;
pub mod postfx;
pub mod solve;
pub mod splat;
pub mod targets;

pub use capability::Capabilities;
pub use compositor::CompositePlan;
pub use config::{
    ColorTheme, ConfigUpdate, ConfigWarning, QualityPreset, SimulationConfig, QUALITY_PRESETS,
};
pub use engine::{Diagnostics, FluidEngine, FrameTarget, MAX_DT};
pub use input::{InputBatcher, MotionEvent};
pub use splat::SplatCommand;
pub use targets::{DoubleBuffer, RenderTarget};

#[cfg(test)]
mod tests {
    #[test]
    fn solve_shader_wgsl_parses() {
        let source = include_str!("shaders/solve.wgsl");
        naga::front::wgsl::parse_str(source).expect("solve.wgsl failed to parse");
    }

    #[test]
    fn display_shader_wgsl_parses() {
        let source = include_str!("shaders/display.wgsl");
        naga::front::wgsl::parse_str(source).expect("display.wgsl failed to parse");
    }

    #[test]
    fn postfx_shader_wgsl_parses() {
        let source = include_str!("shaders/postfx.wgsl");
        naga::front::wgsl::parse_str(source).expect("postfx.wgsl failed to parse");
    }

    #[test]
    fn resample_shader_wgsl_parses() {
        let source = include_str!("shaders/resample.wgsl");
        naga::front::wgsl::parse_str(source).expect("resample.wgsl failed to parse");
    }
}
