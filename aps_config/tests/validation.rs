use aps_config::load_toml;
use rstest::rstest;

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

fn with_profile(extra: &str) -> String {
    format!("{PROFILE}\n{extra}")
}

#[test]
fn minimal_profile_validates_with_defaults() {
    let cfg = load_toml(PROFILE).expect("parse TOML");
    cfg.validate().expect("defaults should validate");
    assert_eq!(cfg.forecast.horizon_ticks, 24);
    assert!(cfg.forecast.enable_uam);
    assert!(!cfg.night_growth.enabled);
    assert_eq!(cfg.profile.age_years, 30);
    assert!((cfg.profile.insulin_peak_min - 75.0).abs() < 1e-9);
    assert!(cfg.logging.file.is_none());
}

#[test]
fn missing_profile_is_a_parse_error() {
    let toml = r#"
[forecast]
horizon_ticks = 12
"#;
    assert!(load_toml(toml).is_err());
}

#[rstest]
#[case("[forecast]\nhorizon_ticks = 0\n", "forecast.horizon_ticks must be in [1, 48]")]
#[case("[forecast]\nhorizon_ticks = 49\n", "forecast.horizon_ticks must be in [1, 48]")]
#[case("[trend]\nfresh_min = 0.0\n", "trend.fresh_min must be > 0")]
#[case(
    "[trend]\nweight_delta = 0.0\nweight_short = 0.0\nweight_long = 0.0\n",
    "trend weights must be >= 0 with a positive sum"
)]
#[case("[sensitivity]\ncache_capacity = 0\n", "sensitivity.cache_capacity must be >= 1")]
#[case("[sensitivity]\ncurve_weight = 1.5\n", "sensitivity.curve_weight must be in [0.0, 1.0]")]
#[case(
    "[sensitivity.mode_pct]\nsport = 5.0\n",
    "sensitivity.mode_pct.sport must be in [10, 300]"
)]
#[case(
    "[safety]\ndrop_rate_damp_mgdl_h = 50.0\ndrop_rate_stop_mgdl_h = 40.0\n",
    "safety drop-rate thresholds must satisfy 0 < damp <= stop"
)]
#[case("[safety]\nzero_basal_ceiling_min = 0.0\n", "safety.zero_basal_ceiling_min must be >= 1")]
#[case("[night_growth]\nstart_hour = 24\n", "night_growth hours must be in [0, 23]")]
#[case("[smb]\ndelivery_ratio = 0.0\n", "smb.delivery_ratio must be in (0.0, 1.0]")]
#[case("[smb.mode_factor]\nmeal = 4.0\n", "smb.mode_factor.meal must be in [0, 3]")]
#[case("[basal]\ntemp_duration_min = 0\n", "basal.temp_duration_min must be in [1, 120]")]
#[case(
    "[prebolus]\nphase2_start_min = 20.0\nphase2_end_min = 15.0\n",
    "prebolus.phase2_end_min must be > phase2_start_min"
)]
fn rejects_out_of_range_sections(#[case] section: &str, #[case] expected: &str) {
    let cfg = load_toml(&with_profile(section)).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(expected),
        "expected '{expected}' in '{err}'"
    );
}

#[rstest]
#[case("isf = 5.0", "profile.isf must be in [10, 300]")]
#[case("max_basal = 0.0", "profile.max_basal must be in (0.0, 20.0]")]
#[case("target_low = 60.0", "profile.target_low must be in [72, 180]")]
#[case("max_smb = 9.0", "profile.max_smb must be in [0.0, 5.0]")]
fn rejects_bad_profile_values(#[case] line: &str, #[case] expected: &str) {
    let key = line.split('=').next().unwrap_or_default().trim();
    let toml: String = PROFILE
        .lines()
        .map(|l| if l.starts_with(key) { line } else { l })
        .collect::<Vec<_>>()
        .join("\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(expected), "got: {err}");
}

#[test]
fn target_high_below_low_is_rejected() {
    let toml = PROFILE.replace("target_high = 110.0", "target_high = 90.0");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains("profile.target_high"));
}

#[test]
fn mode_overrides_parse_partially() {
    let cfg = load_toml(&with_profile(
        r#"
[smb.mode_factor]
sleep = 0.5
dinner = 1.2

[prebolus.phase1_units]
breakfast = 1.5
"#,
    ))
    .expect("parse TOML");
    cfg.validate().expect("valid overrides");
    assert_eq!(cfg.smb.mode_factor.sleep, Some(0.5));
    assert_eq!(cfg.smb.mode_factor.dinner, Some(1.2));
    assert_eq!(cfg.smb.mode_factor.sport, None);
    assert_eq!(cfg.prebolus.phase1_units.breakfast, Some(1.5));
}

#[test]
fn logging_section_is_optional_and_parsed() {
    let cfg = load_toml(&with_profile(
        r#"
[logging]
file = "/tmp/aps.log"
level = "debug"
rotation = "daily"
"#,
    ))
    .expect("parse TOML");
    assert_eq!(cfg.logging.level.as_deref(), Some("debug"));
    assert_eq!(cfg.logging.rotation.as_deref(), Some("daily"));
}
