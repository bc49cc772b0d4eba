//! Server-side relay that forwards Anthropic Messages requests using a
//! credential only the server holds.

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::RelayState;
