//! Compile-time configuration.
//!
//! The constants in this module are generated by `build.rs` and can be
//! overridden with `TRICKLE_MCAST_*` environment variables at build time.

#![allow(unused)]

include!(concat!(env!("OUT_DIR"), "/config.rs"));
