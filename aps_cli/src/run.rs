//! Command execution: config loading, snapshot replay, engine assembly and output.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aps_core::forecast::{self, ForecastInput};
use aps_core::mocks::FixedClock;
use aps_core::{ApsError, CycleContext, CycleWorker, DosingDecision, DosingEngine, EngineCfg, GlucoseSample};
use aps_traits::{Clock, PumpDriver, SystemClock};
use eyre::{Result, WrapErr};

use crate::cli::SnapshotArgs;

/// Read, parse and validate the TOML config.
pub fn load_config(path: &Path) -> Result<aps_config::Config> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = aps_config::load_toml(&text)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Load the snapshot JSON, optionally swapping in CGM history from a CSV.
pub fn load_snapshot(args: &SnapshotArgs) -> Result<CycleContext> {
    let text = std::fs::read_to_string(&args.snapshot)
        .wrap_err_with(|| format!("read snapshot {}", args.snapshot.display()))?;
    let mut ctx: CycleContext = serde_json::from_str(&text)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("parse snapshot {}", args.snapshot.display()))?;
    if let Some(csv) = &args.glucose {
        let rows = aps_config::load_glucose_csv(csv)?;
        ctx.glucose = rows.iter().map(GlucoseSample::from).collect();
        tracing::debug!(rows = ctx.glucose.len(), "glucose history replaced from CSV");
    }
    Ok(ctx)
}

fn clock_for(args: &SnapshotArgs) -> Arc<dyn Clock + Send + Sync> {
    match args.now {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    }
}

fn build_engine(cfg: &aps_config::Config, clock: Arc<dyn Clock + Send + Sync>) -> Result<DosingEngine> {
    DosingEngine::builder()
        .config(EngineCfg::from(cfg))
        .with_clock(clock)
        .build()
}

/// Pump driver that only reports what it would have done.
#[derive(Debug, Default)]
pub struct LoggingPump;

impl PumpDriver for LoggingPump {
    fn set_temp_basal(&mut self, rate_uph: f64, duration_min: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(rate_uph, duration_min, "set temp basal");
        Ok(())
    }

    fn cancel_temp_basal(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("cancel temp basal");
        Ok(())
    }

    fn deliver_bolus(&mut self, units: f64) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(units, "deliver bolus");
        Ok(())
    }
}

pub fn run_cycle(cfg: &aps_config::Config, input: &SnapshotArgs, deliver: bool, deadline_ms: u64, json: bool) -> Result<()> {
    let ctx = load_snapshot(input)?;
    let engine = build_engine(cfg, clock_for(input))?;
    let mut worker = CycleWorker::spawn(engine)?;
    let decision = worker.run(ctx, Duration::from_millis(deadline_ms))?;
    tracing::info!(
        rate = decision.basal_rate_uph,
        bolus = decision.bolus_units,
        action = ?decision.basal_action,
        "cycle complete"
    );
    if deliver {
        aps_core::apply_decision(&mut LoggingPump, &decision)?;
    }
    print_decision(&decision, json)
}

fn print_decision(d: &DosingDecision, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(d).wrap_err("serialize decision")?;
        println!("{line}");
        return Ok(());
    }
    println!(
        "basal: {:?} {:.2} U/h for {} min",
        d.basal_action, d.basal_rate_uph, d.basal_duration_min
    );
    println!("bolus: {:.2} U", d.bolus_units);
    if !d.safety_conditions.is_empty() {
        println!("safety: {}", d.safety_conditions.join(", "));
    }
    for line in &d.rationale {
        println!("  - {line}");
    }
    Ok(())
}

/// Trend and forecast only, using the profile ISF.
pub fn run_forecast(cfg: &aps_config::Config, input: &SnapshotArgs, json: bool) -> Result<()> {
    let ctx = load_snapshot(input)?;
    let engine_cfg = EngineCfg::from(cfg);
    let now = clock_for(input).now();
    let trend = aps_core::trend::extract(&ctx.glucose, now, ctx.allow_stale, &engine_cfg.trend)
        .map_err(|e| eyre::Report::new(ApsError::from(e)))
        .wrap_err("extracting glucose trend")?;
    let fc = forecast::predict(
        &ForecastInput {
            trend: &trend,
            iob: &ctx.iob,
            isf: engine_cfg.profile.isf,
            target: engine_cfg.profile.target(),
            meal: &ctx.meal,
            insulin_peak_min: engine_cfg.profile.insulin_peak_min,
            tdd: ctx.tdd.tdd_24h,
        },
        &engine_cfg.forecast,
    )
    .map_err(|e| eyre::Report::new(ApsError::from(e)))
    .wrap_err("forecasting glucose")?;

    if json {
        let v = serde_json::json!({
            "bg": trend.glucose,
            "delta": trend.delta,
            "eventual_bg": fc.eventual_bg,
            "naive_eventual_bg": fc.naive_eventual_bg,
            "min_pred_bg": fc.min_pred_bg,
            "min_guard_bg": fc.min_guard_bg,
            "min_zt_guard_bg": fc.min_zt_guard_bg,
            "deviation": fc.deviation,
            "ci": fc.ci,
            "uam_duration_hours": fc.uam_duration_hours,
            "iob_pred": fc.iob_pred,
            "uam_pred": fc.uam_pred,
            "zt_pred": fc.zt_pred,
        });
        println!("{v}");
        return Ok(());
    }
    println!("bg {:.0} (delta {:+.1})", trend.glucose, trend.delta);
    println!(
        "eventual {:.0}, min pred {:.0}, min guard {:.0}, zero-temp guard {:.0}",
        fc.eventual_bg, fc.min_pred_bg, fc.min_guard_bg, fc.min_zt_guard_bg
    );
    println!("iob: {}", join_series(&fc.iob_pred));
    println!("uam: {}", join_series(&fc.uam_pred));
    println!("zt:  {}", join_series(&fc.zt_pred));
    Ok(())
}

fn join_series(s: &[f64]) -> String {
    s.iter().map(|v| format!("{v:.0}")).collect::<Vec<_>>().join(" ")
}

pub fn run_self_check(cfg: &aps_config::Config, json: bool) -> Result<()> {
    let engine = build_engine(cfg, Arc::new(SystemClock))?;
    let p = &engine.config().profile;
    if json {
        println!(
            "{}",
            serde_json::json!({ "status": "ok", "target": p.target(), "horizon": engine.config().forecast.horizon_ticks })
        );
    } else {
        println!(
            "ok: target {:.0} mg/dL, forecast horizon {} ticks",
            p.target(),
            engine.config().forecast.horizon_ticks
        );
    }
    Ok(())
}
