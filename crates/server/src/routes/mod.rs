//! HTTP route modules, one per service binary (spec §6 "HTTP surface").

pub mod command;
pub mod governance;
pub mod inference;
pub mod missions;
