//! Dosing decision engine and its type-state builder.
//!
//! The engine owns the only cross-cycle state (sensitivity cache and filter,
//! night-growth state machine) and is driven through `&mut self`, so a single
//! owner serializes cycles. Use [`crate::worker::CycleWorker`] when cycles may
//! be triggered from several places.

use std::marker::PhantomData;
use std::sync::Arc;

use aps_traits::{BolusModel, Clock, SystemClock};
use chrono::{DateTime, Duration, Timelike, Utc};
use eyre::WrapErr;

use crate::cascade::{self, BasalInput, Choice};
use crate::config::{EngineCfg, MAX_HORIZON_TICKS, Profile};
use crate::corrector;
use crate::error::{ApsError, BuildError, ForecastError, Result};
use crate::forecast::{self, Forecast, ForecastInput};
use crate::history;
use crate::modes;
use crate::night_growth::{Multipliers, NightGrowthInput, NightGrowthMonitor, NightGrowthPhase};
use crate::optimizer;
use crate::prebolus::{self, PrebolusInput};
use crate::safety::{self, SafetyInput, SafetyVerdict};
use crate::sensitivity::{SensitivityEstimate, SensitivityEstimator, SensitivityInput};
use crate::temp_basal::{self, BasalCommand};
use crate::trend;
use crate::types::{BasalAction, CycleContext, Diagnostics, DosingDecision, GlucoseTrend};
use crate::util::{floor_bolus, round_bolus};

pub struct DosingEngine {
    cfg: EngineCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    bolus_model: Option<Arc<dyn BolusModel + Send + Sync>>,
    sensitivity: SensitivityEstimator,
    night_growth: NightGrowthMonitor,
    /// Cycles held because the insulin activity input was not finite.
    degenerate_cycles: u64,
}

impl core::fmt::Debug for DosingEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DosingEngine")
            .field("profile", &self.cfg.profile)
            .field("bolus_model", &self.bolus_model.is_some())
            .field("night_growth", &self.night_growth.phase())
            .field("isf_cache_len", &self.sensitivity.cache_len())
            .finish_non_exhaustive()
    }
}

/// Per-cycle values shared by the bolus and basal paths.
struct Cycle<'a> {
    ctx: &'a CycleContext,
    trend: &'a GlucoseTrend,
    forecast: &'a Forecast,
    isf: f64,
    iob: f64,
    local_hour: u32,
    minutes_since_bolus: Option<f64>,
    verdict: &'a SafetyVerdict,
    ngr: Multipliers,
}

impl DosingEngine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder<Missing> {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineCfg {
        &self.cfg
    }

    pub fn night_growth_phase(&self) -> NightGrowthPhase {
        self.night_growth.phase()
    }

    /// NaN/∞ inputs seen so far: sensitivity inputs replaced by a fallback
    /// plus cycles held on a non-finite insulin activity series.
    pub fn degenerate_events(&self) -> u64 {
        self.sensitivity.degenerate_events() + self.degenerate_cycles
    }

    /// Drop the sensitivity cache, the filter state and any night-growth episode.
    pub fn reset(&mut self) {
        self.sensitivity.reset();
        self.night_growth.reset();
        tracing::debug!("engine state reset");
    }

    /// Compute one decision from an immutable input snapshot.
    ///
    /// A missing or stale trend yields a hold-basal, zero-bolus decision.
    /// A forecast failure is fatal for the cycle and returned as an error.
    pub fn run_cycle(&mut self, ctx: &CycleContext) -> Result<DosingDecision> {
        let now = self.clock.now();
        match trend::extract(&ctx.glucose, now, ctx.allow_stale, &self.cfg.trend) {
            Ok(t) => self.decide(ctx, &t, now),
            Err(e) => {
                tracing::warn!(error = %e, "no usable trend, holding basal");
                Ok(self.hold(ctx, now, format!("trend unavailable: {e}")))
            }
        }
    }

    fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        (now + Duration::minutes(i64::from(self.cfg.profile.utc_offset_min))).hour()
    }

    fn hold(&self, ctx: &CycleContext, now: DateTime<Utc>, reason: String) -> DosingDecision {
        let (rate, duration_min) = match &ctx.current_temp {
            Some(t) => (t.rate, t.remaining_min().max(0.0).round() as u32),
            None => (self.cfg.profile.current_basal, self.cfg.basal.temp_duration_min),
        };
        DosingDecision {
            basal_rate_uph: rate,
            basal_duration_min: duration_min,
            basal_action: BasalAction::Continue,
            bolus_units: 0.0,
            deliver_at: now,
            rationale: vec![reason, "holding current basal, bolus skipped".to_string()],
            safety_conditions: Vec::new(),
            diagnostics: Diagnostics {
                night_growth: self.night_growth.phase(),
                ..Diagnostics::default()
            },
        }
    }

    fn decide(&mut self, ctx: &CycleContext, trend: &GlucoseTrend, now: DateTime<Utc>) -> Result<DosingDecision> {
        let target = self.cfg.profile.target();
        let local_hour = self.local_hour(now);
        let mut rationale = vec![format!(
            "bg {:.0}, delta {:+.1}, short {:+.1}, long {:+.1}, accel {:.3}",
            trend.glucose, trend.delta, trend.short_avg_delta, trend.long_avg_delta, trend.acceleration
        )];

        let sens: SensitivityEstimate = self.sensitivity.estimate(
            &SensitivityInput {
                glucose: trend.glucose,
                delta: trend.delta,
                tdd: &ctx.tdd,
                modes: &ctx.modes,
                timestamp: trend.date,
                persisted: &ctx.persisted_isf,
            },
            now,
        );
        rationale.push(format!("isf {:.1} ({:?})", sens.value, sens.provenance));

        let predicted = forecast::predict(
            &ForecastInput {
                trend,
                iob: &ctx.iob,
                isf: sens.value,
                target,
                meal: &ctx.meal,
                insulin_peak_min: self.cfg.profile.insulin_peak_min,
                tdd: ctx.tdd.tdd_24h,
            },
            &self.cfg.forecast,
        );
        let fc = match predicted {
            Ok(fc) => fc,
            Err(e) if matches!(e, ForecastError::NonFiniteInput { .. }) => {
                self.degenerate_cycles += 1;
                tracing::warn!(error = %e, "degenerate insulin activity, holding basal");
                return Ok(self.hold(ctx, now, e.to_string()));
            }
            Err(e) => return Err(eyre::Report::new(ApsError::from(e))),
        };
        rationale.push(format!(
            "eventual {:.0}, min pred {:.0}, min guard {:.0}, zero-temp guard {:.0}",
            fc.eventual_bg, fc.min_pred_bg, fc.min_guard_bg, fc.min_zt_guard_bg
        ));

        let iob = ctx.iob.first().map_or(0.0, |t| t.iob);
        let minutes_since_bolus = history::minutes_since_last_bolus(&ctx.bolus_history, now);
        let verdict = safety::evaluate(
            &SafetyInput {
                bg: trend.glucose,
                delta: trend.delta,
                short_avg_delta: trend.short_avg_delta,
                long_avg_delta: trend.long_avg_delta,
                combined_delta: trend.combined_delta,
                acceleration: trend.acceleration,
                eventual_bg: fc.eventual_bg,
                min_pred_bg: fc.min_pred_bg,
                min_guard_bg: fc.min_guard_bg,
                target,
                iob,
                max_iob: self.cfg.profile.max_iob,
                max_smb: self.cfg.profile.max_smb,
                meal_active: ctx.modes.meal_active(),
                honeymoon: ctx.modes.honeymoon,
                minutes_since_bolus,
                drop_rate_mgdl_h: history::drop_rate_30min(&ctx.glucose),
                insulin_last_hour: history::insulin_last_hour(&ctx.bolus_history, &ctx.temp_basal_history, now),
                avg_hourly_tdd: ctx.tdd.avg_hourly(),
                hypo_pct: history::hypo_pct(&ctx.glucose),
                zero_basal_min: history::zero_basal_minutes(
                    &ctx.temp_basal_history,
                    now,
                    self.cfg.safety.zero_basal_lookback_min,
                ),
            },
            &self.cfg.safety,
        );
        if !verdict.rationale.is_empty() {
            rationale.push(verdict.rationale.clone());
        }

        let ngr = self.night_growth.update(&NightGrowthInput {
            now,
            bg: trend.glucose,
            delta: trend.delta,
            short_avg_delta: trend.short_avg_delta,
            long_avg_delta: trend.long_avg_delta,
            eventual_bg: fc.eventual_bg,
            target,
            cob: ctx.meal.cob,
            meal_active: ctx.modes.meal_active(),
            low_signal: ctx.low_signal,
        });
        if let Some(note) = &ngr.note {
            rationale.push(note.clone());
        }

        let mut diagnostics = Diagnostics {
            eventual_bg: Some(fc.eventual_bg),
            min_pred_bg: Some(fc.min_pred_bg),
            isf: Some(sens.value),
            isf_provenance: Some(sens.provenance),
            bolus_scale: verdict.bolus_scale,
            veto: verdict.veto,
            basal_floor_forced: verdict.basal_floor_forced,
            night_growth: ngr.phase,
            basal_rule: None,
            prebolus: None,
        };
        let cycle = Cycle {
            ctx,
            trend,
            forecast: &fc,
            isf: sens.value,
            iob,
            local_hour,
            minutes_since_bolus,
            verdict: &verdict,
            ngr: ngr.multipliers,
        };

        if !verdict.veto
            && let Some(p) = prebolus::evaluate(
                &PrebolusInput {
                    bg: trend.glucose,
                    delta: trend.delta,
                    acceleration: trend.acceleration,
                    iob,
                    minutes_since_bolus,
                    modes: &ctx.modes,
                    profile: &self.cfg.profile,
                },
                &self.cfg.prebolus,
                &self.cfg.basal,
                self.cfg.profile.max_iob + ngr.multipliers.extra_iob_headroom,
            )
        {
            rationale.push(p.rationale.clone());
            let cmd = temp_basal::finalize(
                p.basal_rate,
                &self.cfg.profile,
                ctx.current_temp.as_ref(),
                ngr.multipliers.basal,
                p.override_safety,
                &self.cfg.basal,
            );
            rationale.push(cmd.note.clone());
            diagnostics.prebolus = Some(p.trigger.to_string());
            return Ok(Self::decision(cmd, p.units, now, rationale, &verdict, diagnostics));
        }

        let bolus = self.micro_bolus(&cycle, &mut rationale);
        let choice = self.basal_choice(&cycle);
        tracing::info!(rule = choice.rule, rate = choice.rate, bolus, "cycle decision");
        rationale.push(format!(
            "basal rule {}: {} ({:.2} U/h)",
            choice.rule, choice.rationale, choice.rate
        ));
        diagnostics.basal_rule = Some(choice.rule.to_string());

        let cmd = temp_basal::finalize(
            choice.rate * ngr.multipliers.basal,
            &self.cfg.profile,
            ctx.current_temp.as_ref(),
            ngr.multipliers.basal,
            false,
            &self.cfg.basal,
        );
        rationale.push(cmd.note.clone());
        Ok(Self::decision(cmd, bolus, now, rationale, &verdict, diagnostics))
    }

    fn decision(
        cmd: BasalCommand,
        bolus_units: f64,
        now: DateTime<Utc>,
        rationale: Vec<String>,
        verdict: &SafetyVerdict,
        diagnostics: Diagnostics,
    ) -> DosingDecision {
        DosingDecision {
            basal_rate_uph: cmd.rate,
            basal_duration_min: cmd.duration_min,
            basal_action: cmd.action,
            bolus_units,
            deliver_at: now,
            rationale,
            safety_conditions: verdict.fired_conditions.clone(),
            diagnostics,
        }
    }

    fn basal_choice(&self, c: &Cycle<'_>) -> Choice {
        cascade::choose_basal(&BasalInput {
            bg: c.trend.glucose,
            delta: c.trend.delta,
            short_avg_delta: c.trend.short_avg_delta,
            combined_delta: c.trend.combined_delta,
            acceleration: c.trend.acceleration,
            eventual_bg: c.forecast.eventual_bg,
            min_pred_bg: c.forecast.min_pred_bg,
            iob: c.iob,
            local_hour: c.local_hour,
            stop_basal: c.verdict.stop_basal,
            basal_floor_forced: c.verdict.basal_floor_forced,
            active_steps_30min: self.cfg.smb.active_steps_30min,
            profile: &self.cfg.profile,
            modes: &c.ctx.modes,
            activity: &c.ctx.activity,
            cfg: &self.cfg.basal,
        })
    }

    /// Baseline from the injected model, then the context estimate, then the
    /// pre-model formula.
    fn baseline(&self, c: &Cycle<'_>, rationale: &mut Vec<String>) -> f64 {
        let target = self.cfg.profile.target();
        if let Some(model) = &self.bolus_model {
            let features = optimizer::model_features(c.trend, c.iob, &c.ctx.meal, c.isf, target, c.ctx.tdd.tdd_24h);
            match model.estimate(&features) {
                Ok(v) if v.is_finite() && v >= 0.0 => {
                    rationale.push(format!("model baseline {v:.2} U"));
                    return v;
                }
                Ok(v) => tracing::warn!(value = v, "bolus model returned an unusable estimate"),
                Err(e) => tracing::warn!(error = %e, "bolus model failed"),
            }
        }
        if let Some(v) = c.ctx.model_estimate
            && v.is_finite()
            && v >= 0.0
        {
            rationale.push(format!("supplied baseline {v:.2} U"));
            return v;
        }
        let v = optimizer::pre_model_baseline(c.forecast.eventual_bg, target, c.isf, &self.cfg.smb);
        rationale.push(format!("pre-model baseline {v:.2} U"));
        v
    }

    fn micro_bolus(&self, c: &Cycle<'_>, rationale: &mut Vec<String>) -> f64 {
        if c.verdict.veto {
            rationale.push(format!("bolus vetoed: {}", c.verdict.fired_conditions.join(", ")));
            return 0.0;
        }
        let smb = &self.cfg.smb;
        let profile = &self.cfg.profile;
        let target = profile.target();
        let interval = modes::smb_interval_min(
            &c.ctx.modes,
            &c.ctx.activity,
            c.local_hour,
            c.trend.delta,
            self.cfg.safety.rapid_rise_delta,
            smb,
        );
        if let Some(m) = c.minutes_since_bolus
            && m < interval
        {
            rationale.push(format!("last bolus {m:.0} min ago, interval {interval:.0} min"));
            return 0.0;
        }

        let baseline = self.baseline(c, rationale);
        let (refined, note) = corrector::refine(
            baseline,
            &c.ctx.log_history,
            c.trend.glucose,
            c.trend.delta,
            c.iob,
            c.ctx.meal.cob,
            target,
            c.isf,
            profile.max_smb,
            smb,
        );
        if let Some(n) = note {
            rationale.push(n);
        }

        let max_dose = profile.max_smb * c.ngr.smb;
        let integral = history::glucose_integral_mgdl_h(&c.ctx.glucose, target);
        let b = optimizer::blend(refined, c.trend, c.forecast.eventual_bg, target, c.isf, integral, max_dose, smb);
        let mode_scale = modes::bolus_mode_scale(&c.ctx.modes, c.local_hour, c.trend.glucose, smb);
        let raw = b.units * mode_scale * c.ngr.smb * c.verdict.bolus_scale;
        rationale.push(format!(
            "blend mpc {:.2} pi {:.2} conf {:.2} -> {:.2} U; x{mode_scale:.2} mode, x{:.2} night, x{:.2} safety",
            b.mpc, b.pi, b.confidence, b.units, c.ngr.smb, c.verdict.bolus_scale
        ));

        let headroom = profile.max_iob + c.ngr.extra_iob_headroom - c.iob;
        let limit = max_dose.min(headroom).max(0.0);
        let clamped = if raw.is_finite() { raw.clamp(0.0, limit) } else { 0.0 };
        let units = round_bolus(clamped).min(floor_bolus(limit));
        if units < clamped - 1e-9 || clamped < raw - 1e-9 {
            rationale.push(format!("bolus limited to {units:.2} U (max {max_dose:.2}, IOB headroom {headroom:.2})"));
        }
        tracing::debug!(raw, units, "micro-bolus");
        units
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for [`DosingEngine`]. A profile (directly or through
/// [`EngineBuilder::config`]) is required before `build()` is available.
pub struct EngineBuilder<P> {
    cfg: EngineCfg,
    profile: Option<Profile>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    bolus_model: Option<Arc<dyn BolusModel + Send + Sync>>,
    _p: PhantomData<P>,
}

impl Default for EngineBuilder<Missing> {
    fn default() -> Self {
        Self {
            cfg: EngineCfg::default(),
            profile: None,
            clock: None,
            bolus_model: None,
            _p: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn validate(cfg: &EngineCfg) -> Result<()> {
    let p = &cfg.profile;
    if !(p.isf.is_finite() && p.isf > 0.0) {
        return Err(invalid("profile isf must be > 0"));
    }
    if !(p.current_basal >= 0.0 && p.max_basal >= 0.0) {
        return Err(invalid("basal rates must be >= 0"));
    }
    if !(p.max_iob >= 0.0 && p.max_smb >= 0.0) {
        return Err(invalid("max_iob and max_smb must be >= 0"));
    }
    if p.target_low > p.target_high {
        return Err(invalid("target_low must not exceed target_high"));
    }
    if cfg.forecast.horizon_ticks == 0 || cfg.forecast.horizon_ticks > MAX_HORIZON_TICKS {
        return Err(invalid("forecast horizon out of range"));
    }
    if cfg.trend.fresh_min <= 0.0 {
        return Err(invalid("trend fresh_min must be > 0"));
    }
    if cfg.sensitivity.cache_capacity == 0 {
        return Err(invalid("sensitivity cache_capacity must be >= 1"));
    }
    if !(cfg.smb.delivery_ratio > 0.0 && cfg.smb.delivery_ratio <= 1.0) {
        return Err(invalid("smb delivery_ratio must be in (0, 1]"));
    }
    if cfg.night_growth.decay_min <= 0.0 {
        return Err(invalid("night growth decay_min must be > 0"));
    }
    Ok(())
}

impl<P> EngineBuilder<P> {
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_bolus_model(mut self, model: Arc<dyn BolusModel + Send + Sync>) -> Self {
        self.bolus_model = Some(model);
        self
    }

    /// Dynamic check: validates everything, including presence of a profile.
    pub fn try_build(self) -> Result<DosingEngine> {
        let mut cfg = self.cfg;
        cfg.profile = self
            .profile
            .ok_or_else(|| eyre::Report::new(BuildError::MissingProfile))?;
        validate(&cfg).wrap_err("building dosing engine")?;
        let sensitivity = SensitivityEstimator::new(cfg.sensitivity.clone(), cfg.profile.isf);
        let night_growth =
            NightGrowthMonitor::new(cfg.night_growth.clone(), cfg.profile.age_years, cfg.profile.utc_offset_min);
        Ok(DosingEngine {
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            bolus_model: self.bolus_model,
            sensitivity,
            night_growth,
            degenerate_cycles: 0,
            cfg,
        })
    }

    fn into_set(self) -> EngineBuilder<Set> {
        EngineBuilder {
            cfg: self.cfg,
            profile: self.profile,
            clock: self.clock,
            bolus_model: self.bolus_model,
            _p: PhantomData,
        }
    }

    /// Replace the whole configuration, profile included.
    pub fn config(mut self, cfg: EngineCfg) -> EngineBuilder<Set> {
        self.profile = Some(cfg.profile.clone());
        self.cfg = cfg;
        self.into_set()
    }

    /// Set the patient profile, keeping the other sections.
    pub fn profile(mut self, profile: Profile) -> EngineBuilder<Set> {
        self.profile = Some(profile);
        self.into_set()
    }
}

impl EngineBuilder<Set> {
    pub fn build(self) -> Result<DosingEngine> {
        self.try_build()
    }
}
