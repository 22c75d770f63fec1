//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::{Address, parse_address_list};
pub use extension::{AuthMechanism, Extension};
pub use reply::{Reply, ReplyCode};
