//! Multi-device gateway: session registry, event routing, webhook relay and
//! the REST surface in front of them.

pub mod auth;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod registry;
pub mod router;
pub mod routes;
pub mod server;
pub mod state;
pub mod webhook;

pub use registry::SessionRegistry;
pub use server::{serve_with_shutdown, start_gateway};
pub use state::AppState;
pub use webhook::WebhookDispatcher;
