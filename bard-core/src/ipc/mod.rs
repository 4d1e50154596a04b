//! Event types published to hosts.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them to a UI process unchanged.

pub mod events;
