//! Headless trial loop: fixation, strobe reversals, then a jittered ISI.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use shared::domain::RunParameters;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{hooks::TrialHooks, TriggerRelay};

/// Timings derived from frozen run parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialPlan {
    params: RunParameters,
    fixation: Duration,
    reversals: u32,
    reversal_period: Duration,
}

impl TrialPlan {
    pub fn new(params: RunParameters) -> Self {
        let fixation_ms = (params.trial_dur() * 1000.0).floor() as u64;
        let reversals = (params.trial_dur() * params.strobe_freq()).floor() as u32;
        let reversal_period_ms = (1000.0 / params.strobe_freq()).floor() as u64;
        Self {
            params,
            fixation: Duration::from_millis(fixation_ms),
            reversals,
            reversal_period: Duration::from_millis(reversal_period_ms),
        }
    }

    pub fn params(&self) -> RunParameters {
        self.params
    }

    pub fn fixation(&self) -> Duration {
        self.fixation
    }

    /// Checkerboard reversals per trial.
    pub fn reversals(&self) -> u32 {
        self.reversals
    }

    pub fn reversal_period(&self) -> Duration {
        self.reversal_period
    }

    /// Draws an inter-trial interval uniformly from `[0, isi_jitter)` ms.
    pub fn draw_isi<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let unit: f64 = rng.gen();
        let ms = (unit * f64::from(self.params.isi_jitter())).floor() as u64;
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shade {
    Black,
    White,
}

impl Shade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::White => "white",
        }
    }
}

/// What the strobe screen shows on a given reversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckerFrame {
    pub reversal: u32,
    /// Centre square and fixation dot.
    pub shade: Shade,
    /// Checkerboard rotation in degrees.
    pub rotation_deg: f64,
}

impl CheckerFrame {
    pub fn for_reversal(reversal: u32) -> Self {
        if reversal % 2 == 1 {
            Self {
                reversal,
                shade: Shade::White,
                rotation_deg: 0.0,
            }
        } else {
            Self {
                reversal,
                shade: Shade::Black,
                rotation_deg: 7.5,
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub trials: u32,
    pub reversals: u64,
    pub intervals: Vec<Duration>,
}

pub struct Sequencer<'a> {
    relay: &'a TriggerRelay,
    plan: TrialPlan,
}

impl<'a> Sequencer<'a> {
    pub fn new(relay: &'a TriggerRelay, plan: TrialPlan) -> Self {
        Self { relay, plan }
    }

    /// Runs every trial in order, committing state at the end of each screen.
    pub async fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> RunSummary {
        let hooks = TrialHooks::new(self.relay, self.plan.params());
        let mut summary = RunSummary::default();

        for trial in 0..self.plan.params().trials() {
            info!(trial, "trial started");

            hooks.fixation_started();
            sleep(self.plan.fixation()).await;
            self.end_screen("Fixation", trial, self.plan.fixation(), Vec::new())
                .await;
            hooks.fixation_ended();

            for reversal in 0..self.plan.reversals() {
                let frame = CheckerFrame::for_reversal(reversal);
                sleep(self.plan.reversal_period()).await;
                self.end_screen(
                    "Checker",
                    trial,
                    self.plan.reversal_period(),
                    vec![
                        ("reversal", Value::from(frame.reversal)),
                        ("shade", Value::from(frame.shade.as_str())),
                        ("rotation_deg", Value::from(frame.rotation_deg)),
                    ],
                )
                .await;
                summary.reversals += 1;
            }

            let isi = self.plan.draw_isi(rng);
            debug!(trial, isi_ms = isi.as_millis() as u64, "inter-trial interval");
            sleep(isi).await;
            self.end_screen("ISI", trial, isi, Vec::new()).await;

            summary.intervals.push(isi);
            summary.trials += 1;
        }

        info!(
            trials = summary.trials,
            reversals = summary.reversals,
            "run finished"
        );
        summary
    }

    async fn end_screen(
        &self,
        sender: &str,
        trial: u32,
        duration: Duration,
        extra: Vec<(&str, Value)>,
    ) {
        self.relay
            .commit_with(|store| {
                store.set("sender", sender);
                store.set("trial", trial);
                store.set("duration_ms", duration.as_millis() as u64);
                for (key, value) in extra {
                    store.set(key, value);
                }
            })
            .await;
    }
}
