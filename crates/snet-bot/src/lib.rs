//! Matrix bot that calls paid SingularityNET services.
//!
//! A user names a service method in chat, pays for it, answers one prompt
//! per input field, and gets the service's response back in the room.

pub mod catalog;
pub mod config;
pub mod error;
pub mod messenger;
pub mod orchestrator;

pub use catalog::{CatalogEntry, FileCatalog, ServiceCatalog};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use messenger::Messenger;
pub use orchestrator::{Orchestrator, OrchestratorConfig, Services};
