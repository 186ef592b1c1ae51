pub mod auth;
pub mod message_builder;
pub mod tag;

pub use auth::{authenticate, await_ready_for_query, hash_md5_password, AuthType};
pub use message_builder::{build_startup, build_terminate, FrameError, FrameField, StartupPacket};
pub use tag::Tag;
