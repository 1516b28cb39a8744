// Branchflow Engine - Core module structure
pub mod backend;
pub mod branch_types;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod state;
pub mod status;
pub mod sync;
pub mod workflow;

pub use backend::{GitBackend, GitCli, MemoryBackend};
pub use config::Config;
pub use context::{Context, ContextDetector, NotesContextStore};
pub use error::{BranchError, Result};
pub use state::{BranchState, StateMutator, StateResolver};
pub use status::StatusReport;
pub use sync::{Reconciler, SyncReport};
pub use workflow::{BranchWorkflow, CreateOptions};
