//! The Command Service (spec §4.2): propose -> validate -> approve ->
//! execute -> audit lifecycle for hardware commands.

pub mod gates;
pub mod service;

pub use roast_schema::CommandError;
pub use service::CommandService;
