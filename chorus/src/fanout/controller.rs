use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::watch;

use super::state::{ProviderRunState, RunId, RunOutcome, RunView};
use crate::provider::{ProviderConfig, StreamOptions};

/// Names of the providers to run for one `generate` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledSet(BTreeSet<String>);

impl EnabledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.insert(name);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for EnabledSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Runs one prompt against several providers at once and exposes their
/// progress through a [`watch`] channel.
///
/// Every run is tagged with a fresh [`RunId`] and stamps it on the slots it
/// resets. A write lands only while its run still owns the slot, so a slow
/// stale stream can never overwrite a newer run's text, while providers the
/// newer run did not select keep receiving their own run's output. A
/// superseded run still completes and returns its own [`RunOutcome`].
pub struct FanOutController {
    providers: Vec<ProviderConfig>,
    options: StreamOptions,
    last_run: AtomicU64,
    view: watch::Sender<RunView>,
}

impl FanOutController {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        let view = RunView::new(providers.iter().map(|p| p.name.as_str()));
        let (view, _) = watch::channel(view);
        Self {
            providers,
            options: StreamOptions::default(),
            last_run: AtomicU64::new(RunId::NONE.0),
            view,
        }
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// The providers whose configured toggle is on.
    pub fn enabled(&self) -> EnabledSet {
        self.providers
            .iter()
            .filter(|provider| provider.enabled)
            .map(|provider| provider.name.clone())
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunView> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> RunView {
        self.view.borrow().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.view.borrow().processing
    }

    /// Start a run and wait until every selected provider has settled,
    /// successfully or not. One provider failing never cuts another short.
    ///
    /// The prompt is copied up front; later edits by the caller do not
    /// affect requests already dispatched.
    pub async fn generate(&self, prompt: &str, enabled: &EnabledSet) -> RunOutcome {
        let prompt = prompt.to_owned();
        let run_id = RunId(self.last_run.fetch_add(1, Ordering::SeqCst) + 1);

        for name in enabled.iter() {
            if !self.providers.iter().any(|provider| provider.name == name) {
                tracing::warn!(run_id = %run_id, provider = %name, "Unknown provider, ignoring");
            }
        }

        let selected: Vec<&ProviderConfig> = self
            .providers
            .iter()
            .filter(|provider| enabled.contains(&provider.name))
            .collect();

        self.begin(run_id, &selected);
        let _guard = RunGuard {
            view: &self.view,
            run_id,
        };

        tracing::info!(run_id = %run_id, providers = selected.len(), "Starting generation run");

        let results = join_all(
            selected
                .iter()
                .map(|provider| self.drive(run_id, provider, &prompt)),
        )
        .await;

        let failed = results.iter().filter(|(_, state)| state.is_failed()).count();
        tracing::info!(run_id = %run_id, failed, "Generation run settled");

        RunOutcome { run_id, results }
    }

    /// Register `run_id` as live and hand it the selected providers' slots.
    fn begin(&self, run_id: RunId, selected: &[&ProviderConfig]) {
        self.view.send_modify(|view| {
            view.enter_run();
            view.run_id = view.run_id.max(run_id);
            for provider in selected {
                if let Some(slot) = view.slot_mut(&provider.name) {
                    // A newer run may already have claimed this slot on another task.
                    if slot.run_id < run_id {
                        slot.run_id = run_id;
                        slot.state = ProviderRunState::default();
                    }
                }
            }
        });
    }

    async fn drive(
        &self,
        run_id: RunId,
        provider: &ProviderConfig,
        prompt: &str,
    ) -> (String, ProviderRunState) {
        let name = provider.name.as_str();
        let mut state = ProviderRunState::default();
        let mut stream = provider.adapter.stream(prompt, &self.options);

        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => {
                    state.append(&delta);
                    self.publish(run_id, name, |slot| slot.append(&delta));
                }
                Err(error) => {
                    tracing::warn!(run_id = %run_id, provider = %name, "Provider stream failed: {}", error);
                    state.fail(name, &error);
                    let failed = state.clone();
                    self.publish(run_id, name, move |slot| *slot = failed);
                    break;
                }
            }
        }

        state.finish();
        self.publish(run_id, name, ProviderRunState::finish);
        tracing::debug!(
            run_id = %run_id,
            provider = %name,
            chars = state.text().chars().count(),
            "Provider settled"
        );

        (provider.name.clone(), state)
    }

    /// Apply a change to a provider's published state if `run_id` still
    /// owns that provider's slot.
    fn publish(&self, run_id: RunId, name: &str, apply: impl FnOnce(&mut ProviderRunState)) {
        self.view.send_if_modified(|view| match view.slot_mut(name) {
            Some(slot) if slot.run_id == run_id => {
                apply(&mut slot.state);
                true
            }
            Some(_) => {
                tracing::trace!(run_id = %run_id, provider = %name, "Discarding write from superseded run");
                false
            }
            None => false,
        });
    }
}

/// Takes a run out of the live count when it ends, including when the
/// `generate` future is dropped before it settles. Slots the run still owns
/// are marked complete so no provider is left looking in flight.
struct RunGuard<'a> {
    view: &'a watch::Sender<RunView>,
    run_id: RunId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let run_id = self.run_id;
        self.view.send_modify(|view| {
            for slot in &mut view.providers {
                if slot.run_id == run_id && !slot.state.is_complete() {
                    slot.state.finish();
                }
            }
            view.leave_run();
        });
    }
}
