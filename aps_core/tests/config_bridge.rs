//! TOML config → runtime config bridge.

use aps_core::config::MAX_HORIZON_TICKS;
use aps_core::{DosingEngine, EngineCfg, Mode};

const PROFILE: &str = r#"
[profile]
current_basal = 0.8
max_basal = 3.0
max_iob = 4.0
max_smb = 1.0
isf = 50.0
carb_ratio = 10.0
target_low = 100.0
target_high = 110.0
"#;

fn engine_cfg(extra: &str) -> EngineCfg {
    let cfg = aps_config::load_toml(&format!("{PROFILE}\n{extra}")).unwrap();
    cfg.validate().unwrap();
    EngineCfg::from(&cfg)
}

#[test]
fn omitted_sections_match_core_defaults() {
    let c = engine_cfg("");
    let d = EngineCfg::default();
    assert_eq!(c.forecast.horizon_ticks, d.forecast.horizon_ticks);
    assert_eq!(c.smb.interval_min, d.smb.interval_min);
    assert_eq!(c.safety.zero_basal_ceiling_min, d.safety.zero_basal_ceiling_min);
    assert_eq!(c.night_growth.decay_min, d.night_growth.decay_min);
    assert_eq!(c.basal.temp_duration_min, d.basal.temp_duration_min);
    for mode in Mode::ALL {
        assert_eq!(c.prebolus.phase1_units.get(mode), d.prebolus.phase1_units.get(mode), "{mode:?}");
        assert_eq!(c.smb.mode_factor.get(mode), d.smb.mode_factor.get(mode), "{mode:?}");
    }
}

#[test]
fn max_daily_basal_defaults_to_current_basal() {
    let c = engine_cfg("");
    assert_eq!(c.profile.max_daily_basal, 0.8);
    assert_eq!(c.profile.target(), 105.0);
}

#[test]
fn mode_overrides_replace_only_named_entries() {
    let c = engine_cfg(
        r#"
[sensitivity.mode_pct]
sport = 80.0

[prebolus.phase1_units]
lunch = 1.5
"#,
    );
    let d = EngineCfg::default();
    assert_eq!(c.sensitivity.mode_pct.get(Mode::Sport), 80.0);
    assert_eq!(c.sensitivity.mode_pct.get(Mode::Sleep), d.sensitivity.mode_pct.get(Mode::Sleep));
    assert_eq!(c.prebolus.phase1_units.get(Mode::Lunch), 1.5);
    assert_eq!(c.prebolus.phase1_units.get(Mode::Dinner), d.prebolus.phase1_units.get(Mode::Dinner));
}

#[test]
fn horizon_is_capped_at_max() {
    let c = engine_cfg("[forecast]\nhorizon_ticks = 48\n");
    assert_eq!(c.forecast.horizon_ticks, MAX_HORIZON_TICKS);
}

#[test]
fn sample_config_builds_an_engine() {
    let cfg = aps_config::load_toml(include_str!("../../etc/aps_config.toml")).unwrap();
    cfg.validate().unwrap();
    let engine = DosingEngine::builder().config(EngineCfg::from(&cfg)).build().unwrap();
    assert!(engine.config().night_growth.enabled);
    assert_eq!(engine.config().profile.utc_offset_min, 60);
}

#[test]
fn wrong_value_type_is_a_toml_error() {
    let err: toml::de::Error = aps_config::load_toml(&PROFILE.replace("isf = 50.0", "isf = \"fifty\"")).unwrap_err();
    assert!(err.to_string().contains("isf"), "{err}");
}
