#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Core of the telemetry feeder: ingests the framed beast byte stream from
//! a Mode-S receiver and forwards it to the collection service over a
//! single long-lived TCP session.
//!
//! Data path: input parser -> filter -> frame buffer -> relay -> network.
//! Control path: network -> talkback -> filter / serial store.

pub mod beast;
pub mod buffer;
pub mod ctl;
pub mod filter;
pub mod gps;
pub mod input;
pub mod login;
pub mod net;
pub mod recv;
pub mod relay;
pub mod serial;
pub mod tb;
pub mod types;
