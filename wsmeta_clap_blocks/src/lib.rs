//! Building blocks for [`clap`]-driven configurations.

pub mod logging;
pub mod service;
