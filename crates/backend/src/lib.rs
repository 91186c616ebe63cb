mod domain;
pub use domain::{artifacts, config};

pub mod dirs;
pub mod ipc;
pub mod pipeline;
pub mod progress;
pub mod worker;
