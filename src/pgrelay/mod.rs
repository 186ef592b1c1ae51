//! The backend-connection and load-balancing core: establishing
//! authenticated sessions against cluster nodes, choosing which node a
//! client session should use, and memoizing the server version probe they
//! all share.
//!
//! What lives above this (client-facing listener, query routing, pooling
//! policy, connection recycling) is a different layer built on top of these
//! primitives; see each module's doc comment for the boundary.

pub mod balance;
pub mod cluster;
pub mod common;
pub mod config;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod version;
