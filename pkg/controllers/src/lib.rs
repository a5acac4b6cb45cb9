pub mod config;
pub mod quota;

pub use config::ControllerConfig;
pub use quota::{QuotaController, TickOutcome};
