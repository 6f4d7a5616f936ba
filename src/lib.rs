//! Wiring for the `sekia` server binary: configuration loading on top of the
//! `sekia-*` library crates.

pub mod config;
