//! Simulation configuration: defaults, partial-update merge, range
//! validation, quality presets, and the reallocation diff.
//!
//! The config is an immutable snapshot per tick. Updates are produced by
//! merging a [`ConfigUpdate`] over the previous full config; the engine
//! diffs old vs. new to decide which GPU resources need reallocation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Sim grid size at which `curl` has its nominal strength; the effective
/// confinement force is scaled so turbulence looks the same at other sizes.
pub const REFERENCE_SIM_RESOLUTION: f32 = 128.0;

/// Smallest dye texture the auto-resolution policy will pick.
pub const DYE_RESOLUTION_FLOOR: u32 = 256;

/// Hue source for generated stroke colors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorTheme {
    /// "default": hue follows the motion angle plus a slow time cycle.
    Named(String),
    /// A single fixed hue in [0, 1].
    Fixed(f32),
    /// A random hue drawn from [min, max] per stroke.
    Range([f32; 2]),
}

impl Default for ColorTheme {
    fn default() -> Self {
        ColorTheme::Named("default".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub sim_resolution: u32,        // velocity/pressure grid size (32..256)
    pub dye_resolution: u32,        // dye texture size (256..2048)
    pub density_dissipation: f32,   // dye fade per tick, 1.0 = none (0.9..1)
    pub velocity_dissipation: f32,  // velocity fade per tick (0.9..1)
    pub pressure_iterations: u32,   // Jacobi iterations (10..60)
    pub curl: f32,                  // vorticity confinement strength (0..50)
    pub splat_radius: f32,          // dye splat radius, normalized (0.001..0.01)
    pub splat_force: f32,           // motion-delta multiplier (1000..10000)
    pub shading: bool,              // pseudo-3D gradient shading
    pub colorful: bool,             // generated stroke colors cycle hues
    pub color_theme: ColorTheme,
    pub back_color: [u8; 3],        // opaque background, 0..255 per channel
    pub transparent: bool,          // straight-alpha output instead of background
    pub aura: bool,                 // bloom effect
    pub aura_resolution: u32,
    pub aura_weight: f32,
    pub ray_aura: bool,             // volumetric light shafts
    pub ray_aura_resolution: u32,
    pub ray_aura_weight: f32,
    pub brightness: f32,            // global display multiplier (0.5..2.5)
    pub manual_filter: Option<bool>, // force shader-side bilinear on/off; None = probe
    pub simulate_no_float_linear: bool, // debug: pretend hardware filtering is absent
    pub bicubic: bool,              // bicubic upsample when manually filtering
    pub bicubic_upscale_only: bool, // restrict bicubic to actual upscaling
    pub dpr_cap: f32,               // max device-pixel-ratio honored for backing sizes
    pub eight_bit_fallback: bool,   // downsample + 8-bit display chain
    pub sharpen_amount: f32,        // unsharp mask in the 8-bit chain (0..1)
    pub auto_dye_resolution: bool,  // derive dye size from the surface size
    pub max_upscale: f32,           // max surface/dye ratio before dye is re-sized
    pub input_throttle: f32,        // seconds between input batch flushes
    pub min_input_delta: f32,       // per-axis motion below this is dropped
    pub max_splat_substeps: u32,    // cap on interpolated substeps per motion
    pub max_substep_length: f32,    // longest normalized step per substep
    pub debug_overlay: bool,
    /// Unrecognized option keys ride along untouched so callers can carry
    /// forward-compatible extensions through merges.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            density_dissipation: 1.0,
            velocity_dissipation: 0.99,
            pressure_iterations: 20,
            curl: 20.0,
            splat_radius: 0.0021,
            splat_force: 3500.0,
            shading: true,
            colorful: true,
            color_theme: ColorTheme::default(),
            back_color: [0, 0, 0],
            transparent: false,
            aura: false,
            aura_resolution: 196,
            aura_weight: 2.5,
            ray_aura: false,
            ray_aura_resolution: 196,
            ray_aura_weight: 0.5,
            brightness: 1.5,
            manual_filter: None,
            simulate_no_float_linear: false,
            bicubic: true,
            bicubic_upscale_only: true,
            dpr_cap: 2.0,
            eight_bit_fallback: false,
            sharpen_amount: 0.35,
            auto_dye_resolution: false,
            max_upscale: 2.0,
            input_throttle: 0.016,
            min_input_delta: 1e-4,
            max_splat_substeps: 8,
            max_substep_length: 0.035,
            debug_overlay: false,
            extra: BTreeMap::new(),
        }
    }
}

/// Partial configuration: every recognized key optional, unknown keys kept.
/// Deserializable from a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub sim_resolution: Option<u32>,
    pub dye_resolution: Option<u32>,
    pub density_dissipation: Option<f32>,
    pub velocity_dissipation: Option<f32>,
    pub pressure_iterations: Option<u32>,
    pub curl: Option<f32>,
    pub splat_radius: Option<f32>,
    pub splat_force: Option<f32>,
    pub shading: Option<bool>,
    pub colorful: Option<bool>,
    pub color_theme: Option<ColorTheme>,
    pub back_color: Option<[u8; 3]>,
    pub transparent: Option<bool>,
    pub aura: Option<bool>,
    pub aura_resolution: Option<u32>,
    pub aura_weight: Option<f32>,
    pub ray_aura: Option<bool>,
    pub ray_aura_resolution: Option<u32>,
    pub ray_aura_weight: Option<f32>,
    pub brightness: Option<f32>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub manual_filter: Option<Option<bool>>,
    pub simulate_no_float_linear: Option<bool>,
    pub bicubic: Option<bool>,
    pub bicubic_upscale_only: Option<bool>,
    pub dpr_cap: Option<f32>,
    pub eight_bit_fallback: Option<bool>,
    pub sharpen_amount: Option<f32>,
    pub auto_dye_resolution: Option<bool>,
    pub max_upscale: Option<f32>,
    pub input_throttle: Option<f32>,
    pub min_input_delta: Option<f32>,
    pub max_splat_substeps: Option<u32>,
    pub max_substep_length: Option<f32>,
    pub debug_overlay: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Serde shim so `"manual_filter": null` reads as an explicit `Some(None)`
/// (clear the override) while an absent key stays `None` (no change).
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Option<bool>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<bool>>, D::Error> {
        Option::<bool>::deserialize(deserializer).map(Some)
    }
}

impl ConfigUpdate {
    /// Parse from a JSON object; unknown keys land in `extra`.
    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Names of the recognized keys this update sets.
    pub fn explicit_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        macro_rules! record {
            ($($field:ident),+ $(,)?) => {
                $(if self.$field.is_some() {
                    keys.insert(stringify!($field).to_string());
                })+
            };
        }
        record!(
            sim_resolution,
            dye_resolution,
            density_dissipation,
            velocity_dissipation,
            pressure_iterations,
            curl,
            splat_radius,
            splat_force,
            shading,
            colorful,
            color_theme,
            back_color,
            transparent,
            aura,
            aura_resolution,
            aura_weight,
            ray_aura,
            ray_aura_resolution,
            ray_aura_weight,
            brightness,
            manual_filter,
            simulate_no_float_linear,
            bicubic,
            bicubic_upscale_only,
            dpr_cap,
            eight_bit_fallback,
            sharpen_amount,
            auto_dye_resolution,
            max_upscale,
            input_throttle,
            min_input_delta,
            max_splat_substeps,
            max_substep_length,
            debug_overlay,
        );
        keys
    }
}

/// Merge a partial update over a full config, producing a new snapshot.
/// Unknown keys from the update are folded into the snapshot's `extra` map.
pub fn merge(base: &SimulationConfig, update: &ConfigUpdate) -> SimulationConfig {
    let mut next = base.clone();
    macro_rules! apply {
        ($($field:ident),+ $(,)?) => {
            $(if let Some(value) = update.$field.clone() {
                next.$field = value;
            })+
        };
    }
    apply!(
        sim_resolution,
        dye_resolution,
        density_dissipation,
        velocity_dissipation,
        pressure_iterations,
        curl,
        splat_radius,
        splat_force,
        shading,
        colorful,
        color_theme,
        back_color,
        transparent,
        aura,
        aura_resolution,
        aura_weight,
        ray_aura,
        ray_aura_resolution,
        ray_aura_weight,
        brightness,
        manual_filter,
        simulate_no_float_linear,
        bicubic,
        bicubic_upscale_only,
        dpr_cap,
        eight_bit_fallback,
        sharpen_amount,
        auto_dye_resolution,
        max_upscale,
        input_throttle,
        min_input_delta,
        max_splat_substeps,
        max_substep_length,
        debug_overlay,
    );
    for (key, value) in &update.extra {
        next.extra.insert(key.clone(), value.clone());
    }
    next
}

/// A value that fell outside its recommended range and was clamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigWarning {
    pub key: &'static str,
    pub message: String,
}

/// Clamp out-of-range values in place and report what was adjusted.
/// Out-of-range input is never rejected; the effect keeps rendering.
pub fn validate(config: &mut SimulationConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    fn clamp_f32(
        value: &mut f32,
        lo: f32,
        hi: f32,
        key: &'static str,
        warnings: &mut Vec<ConfigWarning>,
    ) {
        if !value.is_finite() || *value < lo || *value > hi {
            let clamped = if value.is_finite() {
                value.clamp(lo, hi)
            } else {
                lo
            };
            warnings.push(ConfigWarning {
                key,
                message: format!("{key} = {value} out of range [{lo}, {hi}], clamped to {clamped}"),
            });
            *value = clamped;
        }
    }

    fn clamp_u32(
        value: &mut u32,
        lo: u32,
        hi: u32,
        key: &'static str,
        warnings: &mut Vec<ConfigWarning>,
    ) {
        if *value < lo || *value > hi {
            let clamped = (*value).clamp(lo, hi);
            warnings.push(ConfigWarning {
                key,
                message: format!("{key} = {value} out of range [{lo}, {hi}], clamped to {clamped}"),
            });
            *value = clamped;
        }
    }

    clamp_u32(&mut config.sim_resolution, 16, 2048, "sim_resolution", &mut warnings);
    clamp_u32(&mut config.dye_resolution, 16, 8192, "dye_resolution", &mut warnings);
    clamp_f32(&mut config.density_dissipation, 0.0, 1.0, "density_dissipation", &mut warnings);
    clamp_f32(&mut config.velocity_dissipation, 0.0, 1.0, "velocity_dissipation", &mut warnings);
    clamp_u32(&mut config.pressure_iterations, 1, 100, "pressure_iterations", &mut warnings);
    clamp_f32(&mut config.curl, 0.0, 100.0, "curl", &mut warnings);
    clamp_f32(&mut config.splat_radius, 1e-4, 0.1, "splat_radius", &mut warnings);
    clamp_f32(&mut config.splat_force, 0.0, 50_000.0, "splat_force", &mut warnings);
    clamp_u32(&mut config.aura_resolution, 16, 1024, "aura_resolution", &mut warnings);
    clamp_f32(&mut config.aura_weight, 0.0, 16.0, "aura_weight", &mut warnings);
    clamp_u32(&mut config.ray_aura_resolution, 16, 1024, "ray_aura_resolution", &mut warnings);
    clamp_f32(&mut config.ray_aura_weight, 0.0, 4.0, "ray_aura_weight", &mut warnings);
    clamp_f32(&mut config.brightness, 0.0, 4.0, "brightness", &mut warnings);
    clamp_f32(&mut config.dpr_cap, 0.5, 4.0, "dpr_cap", &mut warnings);
    clamp_f32(&mut config.sharpen_amount, 0.0, 1.0, "sharpen_amount", &mut warnings);
    clamp_f32(&mut config.max_upscale, 1.0, 8.0, "max_upscale", &mut warnings);
    clamp_f32(&mut config.input_throttle, 0.0, 1.0, "input_throttle", &mut warnings);
    clamp_f32(&mut config.min_input_delta, 0.0, 0.1, "min_input_delta", &mut warnings);
    clamp_u32(&mut config.max_splat_substeps, 1, 64, "max_splat_substeps", &mut warnings);
    clamp_f32(&mut config.max_substep_length, 1e-3, 1.0, "max_substep_length", &mut warnings);

    warnings
}

/// Which resource groups a config change invalidates. Reallocation happens
/// at the next tick boundary, never mid-pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceEffects {
    pub sim_grid: bool,
    pub dye: bool,
    pub aura: bool,
    pub ray_aura: bool,
    pub eight_bit: bool,
    pub clear_color: bool,
}

impl ResourceEffects {
    pub fn any_realloc(&self) -> bool {
        self.sim_grid || self.dye || self.aura || self.ray_aura || self.eight_bit
    }
}

pub fn diff(old: &SimulationConfig, new: &SimulationConfig) -> ResourceEffects {
    ResourceEffects {
        sim_grid: old.sim_resolution != new.sim_resolution,
        dye: old.dye_resolution != new.dye_resolution
            || old.auto_dye_resolution != new.auto_dye_resolution
            || old.max_upscale != new.max_upscale
            || old.dpr_cap != new.dpr_cap,
        aura: old.aura_resolution != new.aura_resolution || (!old.aura && new.aura),
        ray_aura: old.ray_aura_resolution != new.ray_aura_resolution
            || (!old.ray_aura && new.ray_aura),
        eight_bit: old.eight_bit_fallback != new.eight_bit_fallback
            || old.dpr_cap != new.dpr_cap,
        clear_color: old.back_color != new.back_color || old.transparent != new.transparent,
    }
}

/// A named bundle of resolution/iteration defaults. Applying one never
/// overrides a key the caller set explicitly at construction.
#[derive(Debug, Clone, Copy)]
pub struct QualityPreset {
    pub name: &'static str,
    pub sim_resolution: u32,
    pub dye_resolution: u32,
    pub pressure_iterations: u32,
    pub aura_resolution: u32,
    pub ray_aura_resolution: u32,
}

pub const QUALITY_PRESETS: [QualityPreset; 4] = [
    QualityPreset {
        name: "low",
        sim_resolution: 64,
        dye_resolution: 512,
        pressure_iterations: 12,
        aura_resolution: 128,
        ray_aura_resolution: 128,
    },
    QualityPreset {
        name: "medium",
        sim_resolution: 128,
        dye_resolution: 1024,
        pressure_iterations: 20,
        aura_resolution: 196,
        ray_aura_resolution: 196,
    },
    QualityPreset {
        name: "high",
        sim_resolution: 256,
        dye_resolution: 1024,
        pressure_iterations: 32,
        aura_resolution: 196,
        ray_aura_resolution: 196,
    },
    QualityPreset {
        name: "ultra",
        sim_resolution: 256,
        dye_resolution: 2048,
        pressure_iterations: 48,
        aura_resolution: 256,
        ray_aura_resolution: 256,
    },
];

pub fn find_preset(name: &str) -> Option<&'static QualityPreset> {
    QUALITY_PRESETS.iter().find(|p| p.name == name)
}

/// Apply a preset, skipping every key the caller supplied explicitly.
pub fn apply_preset(
    base: &SimulationConfig,
    preset: &QualityPreset,
    explicit: &BTreeSet<String>,
) -> SimulationConfig {
    let mut next = base.clone();
    if !explicit.contains("sim_resolution") {
        next.sim_resolution = preset.sim_resolution;
    }
    if !explicit.contains("dye_resolution") {
        next.dye_resolution = preset.dye_resolution;
    }
    if !explicit.contains("pressure_iterations") {
        next.pressure_iterations = preset.pressure_iterations;
    }
    if !explicit.contains("aura_resolution") {
        next.aura_resolution = preset.aura_resolution;
    }
    if !explicit.contains("ray_aura_resolution") {
        next.ray_aura_resolution = preset.ray_aura_resolution;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_applies_only_given_keys() {
        let base = SimulationConfig::default();
        let update = ConfigUpdate {
            curl: Some(42.0),
            aura: Some(true),
            ..Default::default()
        };
        let merged = merge(&base, &update);
        assert_eq!(merged.curl, 42.0);
        assert!(merged.aura);
        assert_eq!(merged.sim_resolution, base.sim_resolution);
        assert_eq!(merged.dye_resolution, base.dye_resolution);
        // merge is pure
        assert_eq!(base.curl, 20.0);
    }

    #[test]
    fn unknown_keys_pass_through_merges() {
        let update = ConfigUpdate::from_json(json!({
            "curl": 10.0,
            "FUTURE_OPTION": {"nested": true},
        }))
        .unwrap();
        assert_eq!(update.curl, Some(10.0));
        assert_eq!(update.extra.get("FUTURE_OPTION"), Some(&json!({"nested": true})));

        let merged = merge(&SimulationConfig::default(), &update);
        assert_eq!(merged.extra.get("FUTURE_OPTION"), Some(&json!({"nested": true})));
        // A later unrelated merge keeps the extension key around.
        let merged2 = merge(&merged, &ConfigUpdate::default());
        assert_eq!(merged2.extra.get("FUTURE_OPTION"), Some(&json!({"nested": true})));
    }

    #[test]
    fn explicit_keys_reflect_supplied_fields() {
        let update = ConfigUpdate {
            sim_resolution: Some(32),
            brightness: Some(1.0),
            ..Default::default()
        };
        let keys = update.explicit_keys();
        assert!(keys.contains("sim_resolution"));
        assert!(keys.contains("brightness"));
        assert!(!keys.contains("dye_resolution"));
    }

    #[test]
    fn validate_clamps_and_warns() {
        let mut config = SimulationConfig {
            density_dissipation: 1.7,
            pressure_iterations: 0,
            splat_radius: -2.0,
            ..Default::default()
        };
        let warnings = validate(&mut config);
        assert_eq!(config.density_dissipation, 1.0);
        assert_eq!(config.pressure_iterations, 1);
        assert_eq!(config.splat_radius, 1e-4);
        let keys: Vec<_> = warnings.iter().map(|w| w.key).collect();
        assert!(keys.contains(&"density_dissipation"));
        assert!(keys.contains(&"pressure_iterations"));
        assert!(keys.contains(&"splat_radius"));
    }

    #[test]
    fn validate_accepts_in_range_silently() {
        let mut config = SimulationConfig::default();
        assert!(validate(&mut config).is_empty());
    }

    #[test]
    fn preset_respects_explicit_resolution() {
        let explicit: BTreeSet<String> = ["sim_resolution".to_string()].into_iter().collect();
        let base = SimulationConfig {
            sim_resolution: 32,
            ..Default::default()
        };
        let ultra = find_preset("ultra").unwrap();
        let applied = apply_preset(&base, ultra, &explicit);
        assert_eq!(applied.sim_resolution, 32);
        assert_eq!(applied.dye_resolution, 2048);
        assert_eq!(applied.pressure_iterations, 48);
    }

    #[test]
    fn preset_raises_unset_resolutions() {
        let base = SimulationConfig::default();
        let ultra = find_preset("ultra").unwrap();
        let applied = apply_preset(&base, ultra, &BTreeSet::new());
        assert!(applied.sim_resolution > base.sim_resolution);
        assert!(applied.dye_resolution > base.dye_resolution);
    }

    #[test]
    fn unknown_preset_name_is_none() {
        assert!(find_preset("extreme").is_none());
    }

    #[test]
    fn diff_flags_resolution_changes() {
        let old = SimulationConfig::default();
        let mut new = old.clone();
        new.sim_resolution = 256;
        let effects = diff(&old, &new);
        assert!(effects.sim_grid);
        assert!(!effects.dye);
        assert!(effects.any_realloc());

        let mut new2 = old.clone();
        new2.back_color = [10, 20, 30];
        let effects2 = diff(&old, &new2);
        assert!(effects2.clear_color);
        assert!(!effects2.any_realloc());
    }

    #[test]
    fn manual_filter_override_survives_json_round_trip() {
        let update = ConfigUpdate::from_json(json!({"manual_filter": false})).unwrap();
        assert_eq!(update.manual_filter, Some(Some(false)));
        let merged = merge(&SimulationConfig::default(), &update);
        assert_eq!(merged.manual_filter, Some(false));
    }

    #[test]
    fn color_theme_json_forms() {
        let update = ConfigUpdate::from_json(json!({"color_theme": 0.5})).unwrap();
        assert_eq!(update.color_theme, Some(ColorTheme::Fixed(0.5)));
        let update = ConfigUpdate::from_json(json!({"color_theme": [0.2, 0.8]})).unwrap();
        assert_eq!(update.color_theme, Some(ColorTheme::Range([0.2, 0.8])));
        let update = ConfigUpdate::from_json(json!({"color_theme": "default"})).unwrap();
        assert_eq!(update.color_theme, Some(ColorTheme::default()));
    }
}
