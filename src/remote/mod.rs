//! HTTP access to the hishtory sync server.
//!
//! [`SyncClient`] exposes the generic `get`/`post` primitives plus typed
//! endpoint calls (device registration, bootstrap, submit, pending query).
//! Nothing here retries: every caller treats a failed call as fatal to the
//! operation it is part of, or logs and moves on.

mod client;
mod devices;
pub mod http;

pub use client::SyncClient;
