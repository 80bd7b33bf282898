pub mod app_config;
pub mod gateway;
pub mod listener;
pub mod logging;
pub mod notification;

pub use app_config::*;
pub use gateway::*;
pub use listener::*;
pub use logging::*;
pub use notification::*;
