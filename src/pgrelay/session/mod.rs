mod builder;
mod slot;

pub use builder::{build_session, try_build_session};
pub use slot::SessionSlot;
