// Library root: re-exports the server modules so the binary and integration
// tests share the same code.

pub mod app;
pub mod config;
pub mod ws_server;
