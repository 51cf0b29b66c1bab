pub mod analysis;
pub mod config;
pub mod gemini;
pub mod server;
