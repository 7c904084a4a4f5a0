//! Shared setup for the twsync binaries

pub mod common;
