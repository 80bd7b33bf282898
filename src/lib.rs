pub mod app;
pub mod common;
pub mod notification;
pub mod shutdown;
