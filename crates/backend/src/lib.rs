pub mod app;
pub mod dirs;
pub mod engine;
pub mod jobs;
pub mod monitor;
pub mod pipeline;

mod domain;
pub use domain::{config, document, job};

pub use app::{App, AppError};
