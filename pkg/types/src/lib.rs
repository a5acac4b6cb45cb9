//! Semantic records shared by the controller and the admission webhook.

pub mod admission;
pub mod config;
pub mod directory;
pub mod meta;
pub mod namespace;
pub mod node;
pub mod pod;
pub mod quantity;
pub mod quota;
