//! Single-writer cycle worker.
//!
//! Owns the engine on a dedicated thread and accepts one cycle at a time over
//! a bounded channel. A result that misses the caller's deadline is discarded;
//! the next cycle starts from a fresh snapshot, and a queued cycle whose
//! deadline already passed is never run. The thread exits on drop.
use crossbeam_channel as xch;
use eyre::WrapErr;
use std::time::{Duration, Instant};

use crate::engine::DosingEngine;
use crate::error::{ApsError, Result};
use crate::types::{CycleContext, DosingDecision};

struct Job {
    seq: u64,
    ctx: CycleContext,
    until: Instant,
}

type Reply = (u64, Result<DosingDecision>);

pub struct CycleWorker {
    tx: Option<xch::Sender<Job>>,
    /// Owner-side handle on the job queue, used to drop stale jobs.
    queued: xch::Receiver<Job>,
    rx: xch::Receiver<Reply>,
    seq: u64,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl CycleWorker {
    pub fn spawn(mut engine: DosingEngine) -> Result<Self> {
        let (tx, job_rx) = xch::bounded::<Job>(1);
        let (reply_tx, rx) = xch::bounded::<Reply>(1);
        let queued = job_rx.clone();

        let join_handle = std::thread::Builder::new()
            .name("aps-cycle".to_string())
            .spawn(move || {
                for job in job_rx.iter() {
                    if Instant::now() >= job.until {
                        tracing::debug!(seq = job.seq, "skipping cycle past its deadline");
                        continue;
                    }
                    let out = engine.run_cycle(&job.ctx);
                    // If send fails, the owner is gone; exit gracefully
                    if reply_tx.send((job.seq, out)).is_err() {
                        tracing::debug!("cycle worker owner disconnected, exiting thread");
                        break;
                    }
                }
                tracing::trace!("cycle worker thread exiting cleanly");
            })
            .wrap_err("spawning cycle worker")?;

        Ok(Self {
            tx: Some(tx),
            queued,
            rx,
            seq: 0,
            join_handle: Some(join_handle),
        })
    }

    /// Run one cycle and wait at most `deadline` for its decision.
    pub fn run(&mut self, ctx: CycleContext, deadline: Duration) -> Result<DosingDecision> {
        self.seq += 1;
        let seq = self.seq;
        let until = Instant::now() + deadline;
        let timed_out = || {
            let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(seq, deadline_ms, "cycle missed its deadline");
            eyre::Report::new(ApsError::CycleTimeout { deadline_ms })
        };

        while let Ok(stale) = self.queued.try_recv() {
            tracing::debug!(seq = stale.seq, "dropping queued stale cycle");
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| eyre::Report::new(ApsError::WorkerGone))?;
        match tx.send_timeout(Job { seq, ctx, until }, until.saturating_duration_since(Instant::now())) {
            Ok(()) => {}
            Err(xch::SendTimeoutError::Timeout(_)) => return Err(timed_out()),
            Err(xch::SendTimeoutError::Disconnected(_)) => return Err(eyre::Report::new(ApsError::WorkerGone)),
        }

        loop {
            let left = until.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok((s, out)) if s == seq => return out,
                Ok((s, _)) => tracing::debug!(seq = s, "discarding late cycle result"),
                Err(xch::RecvTimeoutError::Timeout) => return Err(timed_out()),
                Err(xch::RecvTimeoutError::Disconnected) => {
                    return Err(eyre::Report::new(ApsError::WorkerGone));
                }
            }
        }
    }
}

impl Drop for CycleWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the loop; closing the reply channel
        // unblocks a worker stuck sending a late result.
        self.tx.take();
        let (_, closed) = xch::bounded(0);
        drop(std::mem::replace(&mut self.rx, closed));
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("cycle worker joined successfully"),
                Err(e) => tracing::warn!(?e, "cycle worker panicked during shutdown"),
            }
        }
    }
}
