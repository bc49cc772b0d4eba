mod controller;
mod state;

pub use controller::{EnabledSet, FanOutController};
pub use state::{ProviderRunState, ProviderSlot, RunId, RunOutcome, RunView};
