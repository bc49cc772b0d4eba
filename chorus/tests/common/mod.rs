#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_stream::try_stream;
use futures::StreamExt;
use tokio::sync::Notify;

use chorus::error::ChorusError;
use chorus::fanout::FanOutController;
use chorus::provider::{
    ProviderAdapter, ProviderConfig, StreamOptions, TextDelta, TextDeltaStream,
};

/// One scripted action of a fake provider stream.
#[derive(Clone)]
pub enum Step {
    Delta(&'static str),
    Fail(&'static str),
    /// Park until the gate is notified.
    Wait(Arc<Notify>),
}

/// Adapter that plays back a fixed script per call. Call `n` uses script
/// `n`; the last script repeats for any further calls.
pub struct ScriptedAdapter {
    scripts: Vec<Vec<Step>>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::per_call(vec![steps])
    }

    pub fn per_call(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn stream(&self, prompt: &str, _options: &StreamOptions) -> TextDeltaStream {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let steps = self
            .scripts
            .get(call)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default();

        Box::pin(try_stream! {
            for step in steps {
                match step {
                    Step::Delta(text) => {
                        yield TextDelta::new(text);
                    }
                    Step::Fail(message) => Err::<(), _>(ChorusError::Backend {
                        status: 500,
                        message: message.to_string(),
                    })?,
                    Step::Wait(gate) => gate.notified().await,
                }
            }
        })
    }
}

pub fn provider(name: &str, adapter: ScriptedAdapter) -> ProviderConfig {
    ProviderConfig::new(name, true, Arc::new(adapter))
}

pub fn controller(providers: Vec<ProviderConfig>) -> Arc<FanOutController> {
    Arc::new(FanOutController::new(providers))
}

/// Drain a delta stream into its text and the error that ended it, if any.
pub async fn collect(mut stream: TextDeltaStream) -> (String, Option<ChorusError>) {
    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(delta) => text.push_str(delta.as_str()),
            Err(error) => return (text, Some(error)),
        }
    }
    (text, None)
}

pub fn sse(events: &[&str]) -> String {
    events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect()
}
