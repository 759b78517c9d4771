use std::sync::Arc;

use aps_core::config::EngineCfg;
use aps_core::error::BuildError;
use aps_core::mocks::FixedClock;
use aps_core::{DosingEngine, Profile};
use chrono::{DateTime, Utc};
use rstest::rstest;

#[rstest]
fn builder_missing_profile_yields_typed_build_error() {
    let err = DosingEngine::builder()
        // missing profile()
        .with_clock(Arc::new(FixedClock::new(DateTime::<Utc>::UNIX_EPOCH)))
        .try_build()
        .expect_err("should fail with MissingProfile");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingProfile) => {}
        other => panic!("expected MissingProfile, got: {other:?}"),
    }
}

#[rstest]
#[case::zero_isf(Profile { isf: 0.0, ..Profile::default() }, "isf")]
#[case::negative_basal(Profile { max_basal: -1.0, ..Profile::default() }, "basal")]
#[case::negative_smb(Profile { max_smb: -0.1, ..Profile::default() }, "max_smb")]
#[case::inverted_targets(Profile { target_low: 150.0, target_high: 120.0, ..Profile::default() }, "target_low")]
fn invalid_profile_is_rejected(#[case] profile: Profile, #[case] needle: &str) {
    let err = DosingEngine::builder().profile(profile).build().unwrap_err();
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains(needle), "{msg}"),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}

#[test]
fn zero_horizon_is_rejected() {
    let mut cfg = EngineCfg::default();
    cfg.forecast.horizon_ticks = 0;
    let err = DosingEngine::builder().config(cfg).build().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[test]
fn config_carries_profile() {
    let cfg = EngineCfg {
        profile: Profile {
            isf: 42.0,
            ..Profile::default()
        },
        ..EngineCfg::default()
    };
    let engine = DosingEngine::builder().config(cfg).build().unwrap();
    assert_eq!(engine.config().profile.isf, 42.0);
}
