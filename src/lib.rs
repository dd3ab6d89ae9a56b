//! Peer rendezvous service plus the mesh chat peer that uses it.
//!
//! A fixed-address coordinator records each peer's (address, listening port)
//! in registration order and tells every newcomer about all prior peers; the
//! newcomer dials each of them, and its own listener picks up everyone who
//! registers later, yielding a full mesh. Each module covers one piece:
//!
//! - [`cli`] parses the coordinator and peer subcommands.
//! - [`wire`] is the newline-delimited text framing and the typed
//!   registration notifications.
//! - [`registry`] is the coordinator's ordered, append-only peer registry.
//! - [`coordinator`] accepts registrations and relays the prior-peer list.
//! - [`peer`] registers, keeps the live connection set, and multiplexes
//!   stdin input against inbound peer traffic.
//!
//! Integration tests drive the coordinator and peer through this crate
//! directly; `tests/e2e.rs` exercises the shipped binary.

pub mod cli;
pub mod coordinator;
pub mod peer;
pub mod registry;
pub mod wire;
