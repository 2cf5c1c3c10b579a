//! Network side of the interception layer.
//!
//! The engine only ever talks to the network through the [`Network`] trait, so
//! the host adapter decides what "the network" is (a real HTTP client, an
//! always-offline stub, or a scripted mock in tests).

mod client;
mod types;

pub use client::{HttpNetwork, Network, NetworkError, OfflineNetwork};
pub use types::{is_safe_method, Request, Response};
