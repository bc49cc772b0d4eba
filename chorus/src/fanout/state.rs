use std::fmt;

use crate::error::ChorusError;
use crate::provider::TextDelta;

/// Identifies one invocation of `generate`. Ids increase monotonically per
/// controller; `RunId::NONE` means no run has started yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl RunId {
    pub const NONE: RunId = RunId(0);
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Progress of one provider within one run.
///
/// Text only ever grows by appending deltas, except on failure where it is
/// replaced by the error message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRunState {
    text: String,
    complete: bool,
    failed: bool,
}

impl ProviderRunState {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn append(&mut self, delta: &TextDelta) {
        self.text.push_str(delta.as_str());
    }

    pub(crate) fn fail(&mut self, provider: &str, error: &ChorusError) {
        self.text = format!("{provider} error: {error}");
        self.failed = true;
        self.complete = true;
    }

    pub(crate) fn finish(&mut self) {
        self.complete = true;
    }
}

/// One registered provider as seen by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSlot {
    pub name: String,
    /// Run that last reset this slot; stays on an older run while the
    /// provider is disabled.
    pub run_id: RunId,
    pub state: ProviderRunState,
}

/// Read-only picture of the current run, published to subscribers after
/// every change.
///
/// `processing` stays set while any `generate` call, current or
/// superseded, still has providers streaming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunView {
    pub run_id: RunId,
    pub processing: bool,
    pub providers: Vec<ProviderSlot>,
    live_runs: usize,
}

impl RunView {
    pub(crate) fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            run_id: RunId::NONE,
            processing: false,
            providers: names
                .into_iter()
                .map(|name| ProviderSlot {
                    name: name.to_string(),
                    run_id: RunId::NONE,
                    state: ProviderRunState::default(),
                })
                .collect(),
            live_runs: 0,
        }
    }

    pub(crate) fn enter_run(&mut self) {
        self.live_runs += 1;
        self.processing = true;
    }

    pub(crate) fn leave_run(&mut self) {
        self.live_runs = self.live_runs.saturating_sub(1);
        self.processing = self.live_runs > 0;
    }

    pub fn get(&self, name: &str) -> Option<&ProviderRunState> {
        self.slot(name).map(|slot| &slot.state)
    }

    pub fn slot(&self, name: &str) -> Option<&ProviderSlot> {
        self.providers.iter().find(|slot| slot.name == name)
    }

    pub(crate) fn slot_mut(&mut self, name: &str) -> Option<&mut ProviderSlot> {
        self.providers.iter_mut().find(|slot| slot.name == name)
    }
}

/// Final per-provider states of a run, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub results: Vec<(String, ProviderRunState)>,
}

impl RunOutcome {
    pub fn get(&self, name: &str) -> Option<&ProviderRunState> {
        self.results
            .iter()
            .find(|(provider, _)| provider == name)
            .map(|(_, state)| state)
    }

    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|(_, state)| state.is_failed())
            .map(|(name, _)| name.as_str())
    }
}
