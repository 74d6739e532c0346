pub mod config;
pub mod errors;
pub mod gates;
pub mod lifecycle;
pub mod lock;
pub mod pipeline;
pub mod profile;
pub mod settings;
pub mod stages;
pub mod ui;
pub mod util;
