pub mod parse;
pub mod serialize;
mod types;
pub mod varint;

pub use parse::{SubscribeKind, MAX_SUBS_PER_PACKET};
pub use types::*;
