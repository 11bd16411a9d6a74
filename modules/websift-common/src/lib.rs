pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::Config;
pub use error::WebsiftError;
pub use events::StreamFrame;
pub use types::{DedupMode, ItemRecord, ItemStatus, Job, JobStatus, RejectionReason};
