//! Offline-resilience layer between an application and the network.
//!
//! Every outbound request from an application session goes through
//! [`worker::Registration::handle_fetch`], which classifies it and answers from
//! the current cache namespace, the network, or both. Namespaces are versioned:
//! installing a new version populates a fresh namespace from the manifest, and
//! activating it deletes every other one.

pub mod cache;
pub mod config;
pub mod logging;
pub mod net;
pub mod worker;
