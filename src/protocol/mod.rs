//! Wire protocol between this client and the cluster master.
//!
//! # Submodules
//!
//! * [`codec`] - envelope encoding and validated decoding
//! * [`commands`] - the closed set of outbound commands
//! * [`events`] - the closed set of inbound events
//! * [`slave`] - hyphenated wire shapes of node reports
//!
//! Everything the master sends is untrusted input. Decoding yields either a
//! typed [`Event`] or an error; a bad frame never reaches the registry.

pub mod codec;
pub mod commands;
pub mod events;
pub mod slave;

pub use codec::Codec;
pub use commands::{Command, CommandKind, Position};
pub use events::{Event, EventKind};

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::Result;

/// Parses and logs a JSON document.
///
/// # Errors
///
/// Returns `MalformedEnvelope` if `body` is not JSON or does not match `T`.
///
/// # Logging
///
/// * Success: parsed structure at TRACE level
/// * Shape mismatch: the JSON value at TRACE level
/// * Invalid JSON: the parser error at DEBUG level, raw text at TRACE level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                debug!("{origin}: failed parsing ({e})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
