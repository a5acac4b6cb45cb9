//! Who hears about a quota change, and what they are told.

pub mod directory;
pub mod mail;
pub mod message;
pub mod recipients;

pub use directory::{HttpDirectory, OwnerDirectory};
pub use mail::{LogNotifier, Notifier, RelayNotifier, SmtpConfig, SmtpNotifier};
pub use message::{MessageContext, render};
pub use recipients::recipient_set;
