//! Network join for the device under test
//!
//! This module handles:
//! - The ordered join sequence (scan, add credentials, connect, persist)
//! - Link-state validation once the sequence has gone through

mod manager;

pub use manager::{ConnectivityManager, WifiCredentials};
