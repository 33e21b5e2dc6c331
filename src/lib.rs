//! Persistence and synchronization for pentest checklist flow graphs.
//!
//! A flow is a titled graph of checklist steps (nodes) joined by edges. The
//! [`flows::loader::GraphLoader`] reads a flow from a [`store::RecordStore`],
//! the [`flows::reconciler::SaveEngine`] writes an edited draft back with the
//! minimum set of creates, updates and deletes, and the
//! [`flows::registry::FlowRegistry`] lists and creates flows. All three share
//! one TTL cache, bundled by [`session::FlowSession`].

pub mod cache;
pub mod config;
pub mod error;
pub mod flows;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::FlowError;
pub use session::FlowSession;
