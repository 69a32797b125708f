//! Test harness: a real server over HTTP plus programmatic fixtures.

pub mod fixtures;
pub mod server;

pub use server::{PositoryTestServer, PositoryTestServerConfig};
