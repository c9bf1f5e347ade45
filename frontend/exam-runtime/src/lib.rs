//! Client-side runtime of the IELTS mock-exam player.
//!
//! The host feeds browser events through an [`browser::EventBus`] and reads
//! state back from an [`ExamSession`]; nothing here renders UI.

pub mod browser;
pub mod config;
pub mod dom;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RuntimeError, RuntimeResult};
pub use services::{ExamSession, SessionDeps};
