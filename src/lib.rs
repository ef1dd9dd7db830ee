pub mod cfg;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod reasoning;
pub mod sandbox;
pub mod source;
pub mod trace;
pub mod ui;
pub mod util;
