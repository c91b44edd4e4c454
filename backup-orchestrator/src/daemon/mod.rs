//! Process lifecycle helpers for the binary.

pub mod shutdown;
