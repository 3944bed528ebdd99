//! netbuffer-ctl: lifecycle commands for the netbuffer container service.
//!
//! ## Architecture
//!
//! - **Descriptor**: static build and runtime parameters, loaded once
//! - **Recipe**: image build recipe and compose project generated from it
//! - **Backend**: one call-through per lifecycle verb against `docker compose`
//! - **Dispatcher**: closed command set mapped onto backend operations

pub mod backend;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod recipe;

pub use backend::{Backend, ComposeBackend, ContainerStatus, LogOptions, Runtime};
pub use descriptor::Descriptor;
pub use dispatcher::{Command, Outcome, dispatch};
pub use error::{BackendError, ConfigError, Error, Result};
pub use recipe::ComposeProject;
