pub mod bootstrap;
pub mod commands;
pub mod http;
pub mod ticker;
