//! Centralized constants for the throttle project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod admission;
pub mod network;
pub mod quota;
pub mod resources;
