//! Admission webhook that refuses pods when the cluster is oversubscribed
//! or the namespace's own CPU quota has no room.

pub mod gate;
pub mod request_id;
pub mod server;
pub mod tls;
pub mod usage;

pub use gate::{AdmissionGate, GateConfig};
pub use server::{WebhookConfig, WebhookState, router, start_webhook};
