//! Configuration constants and defaults

pub mod defaults;
