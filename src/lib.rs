//! Session-aware task manager client for a hosted auth + record service.
//!
//! [`store::SessionStore`] owns "who is signed in"; [`tasks`] and [`profile`]
//! act on behalf of that session; [`remote`] is the service boundary.

pub mod config;
pub mod guard;
pub mod profile;
pub mod remote;
pub mod session_file;
pub mod store;
pub mod tasks;

pub use config::{ConfigError, RemoteConfig};
pub use remote::{HttpRemote, RemoteError, RemoteService};
pub use store::{Phase, Session, SessionStore, StoreError, StoreState};
