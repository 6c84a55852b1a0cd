//! Reference implementation of the Moltrouter Protocol (MRP).
//!
//! A caller states an intent and constraints; the registry is queried for
//! candidate providers, candidates are ranked deterministically against the
//! requested capability/policy, and the winner is engaged through a
//! DISCOVER → EXECUTE exchange whose result is recorded as an evidence bundle.
//!
//! The crate also ships the `summarize_url` reference provider and the
//! protocol-layer handlers that serve it over HTTP.

pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod protocol;
pub mod provider;
pub mod publish;
pub mod registry;
pub mod router;
pub mod scoring;
pub mod server;
pub mod store;

pub mod schema;
