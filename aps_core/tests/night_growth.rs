use aps_core::NightGrowthPhase;
use aps_core::config::NightGrowthCfg;
use aps_core::night_growth::{Multipliers, NightGrowthInput, NightGrowthMonitor};
use chrono::{DateTime, Duration, Utc};
use rstest::rstest;

fn night(min: i64) -> DateTime<Utc> {
    // 2026-01-15 02:00 UTC
    DateTime::<Utc>::from_timestamp(1_768_442_400, 0).unwrap() + Duration::minutes(min)
}

fn enabled() -> NightGrowthCfg {
    NightGrowthCfg {
        enabled: true,
        ..NightGrowthCfg::default()
    }
}

fn rising(min: i64) -> NightGrowthInput {
    NightGrowthInput {
        now: night(min),
        bg: 140.0,
        delta: 0.2,
        short_avg_delta: 0.1,
        long_avg_delta: 0.1,
        eventual_bg: 165.0,
        target: 120.0,
        cob: 0.0,
        meal_active: false,
        low_signal: false,
    }
}

#[test]
fn sustained_night_rise_in_child_is_confirmed() {
    let mut m = NightGrowthMonitor::new(enabled(), 10, 0);
    let mut last = None;
    for k in 0..=4 {
        last = Some(m.update(&rising(k * 5)));
    }
    let out = last.unwrap();
    assert_eq!(out.phase, NightGrowthPhase::Confirmed);
    assert_ne!(out.multipliers, Multipliers::NEUTRAL);
    assert!(out.multipliers.smb > 1.0);
    assert!(out.multipliers.basal > 1.0);
    assert!(out.multipliers.extra_iob_headroom > 0.0);
    assert_eq!(m.entered_at(), Some(night(20)));
}

#[test]
fn short_rise_is_not_yet_suspected() {
    let mut m = NightGrowthMonitor::new(enabled(), 10, 0);
    for k in 0..4 {
        let out = m.update(&rising(k * 5));
        assert_eq!(out.phase, NightGrowthPhase::Inactive);
    }
}

#[rstest]
#[case::low_bg(NightGrowthInput { bg: 105.0, ..rising(20) })]
#[case::low_signal(NightGrowthInput { low_signal: true, ..rising(20) })]
#[case::eventual_at_target(NightGrowthInput { eventual_bg: 120.0, ..rising(20) })]
#[case::low_target(NightGrowthInput { target: 90.0, eventual_bg: 110.0, ..rising(20) })]
fn guards_block_activation(#[case] last: NightGrowthInput) {
    let mut m = NightGrowthMonitor::new(enabled(), 10, 0);
    for k in 0..4 {
        m.update(&rising(k * 5));
    }
    let out = m.update(&last);
    assert_eq!(out.phase, NightGrowthPhase::Inactive);
    assert_eq!(out.multipliers, Multipliers::NEUTRAL);
}

#[test]
fn daytime_or_disabled_stays_inactive() {
    let mut disabled = NightGrowthMonitor::new(NightGrowthCfg::default(), 10, 0);
    // UTC offset pushes local time to 14:00
    let mut daytime = NightGrowthMonitor::new(enabled(), 10, 12 * 60);
    for k in 0..=6 {
        assert_eq!(disabled.update(&rising(k * 5)).phase, NightGrowthPhase::Inactive);
        assert_eq!(daytime.update(&rising(k * 5)).phase, NightGrowthPhase::Inactive);
    }
}

#[test]
fn reset_clears_episode() {
    let mut m = NightGrowthMonitor::new(enabled(), 10, 0);
    for k in 0..=4 {
        m.update(&rising(k * 5));
    }
    m.reset();
    assert_eq!(m.phase(), NightGrowthPhase::Inactive);
    assert!(m.entered_at().is_none());
}
