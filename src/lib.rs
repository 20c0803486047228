//! Client-side synchronization engine for a spotnet cluster.
//!
//! A spotnet master coordinates a fleet of slave playback nodes. This crate
//! keeps a faithful local mirror of what the master reports about them and
//! turns user intents into commands:
//!
//! * [`transport`] - one websocket channel to the master
//! * [`protocol`] - the wire envelope, commands, events and their codec
//! * [`registry`] - the mirrored nodes and cluster configuration
//! * [`controller`] - channel lifecycle and event routing
//! * [`remote`] - the command façade
//! * [`session`] - the event loop tying it all together
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

#[macro_use]
extern crate log;

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod session;
pub mod transport;
