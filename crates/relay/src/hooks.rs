use shared::domain::RunParameters;

use crate::TriggerRelay;

/// Event value marking the start of a trial.
pub const TRIAL_START_EVENT: &str = "0";

/// Instrumentation fired around each fixation screen.
pub struct TrialHooks<'a> {
    relay: &'a TriggerRelay,
    params: RunParameters,
}

impl<'a> TrialHooks<'a> {
    pub fn new(relay: &'a TriggerRelay, params: RunParameters) -> Self {
        Self { relay, params }
    }

    pub fn fixation_started(&self) {
        self.relay.send_event(TRIAL_START_EVENT);
    }

    /// Labels the trial with its frequency and marks a window of one trial
    /// duration on each side of the boundary.
    pub fn fixation_ended(&self) {
        let label = self.params.label();
        let trial_dur = self.params.trial_dur();
        self.relay.send_event(&label);
        self.relay.send_trigger(&label, -trial_dur, trial_dur);
    }
}
