//! Function discovery and the background analysis scheduler.
//!
//! `FunctionStore` holds what analysis found; `AnalysisScheduler` decides
//! when `SpaceAnalysisPass` runs and reports its progress.

pub mod completion;
pub mod functions;
pub mod pass;
pub mod scheduler;
pub mod state;

pub use completion::CompletionEvent;
pub use functions::FunctionStore;
pub use pass::SpaceAnalysisPass;
pub use scheduler::{AnalysisPass, AnalysisScheduler, PassContext};
pub use state::{ActiveAnalysisInfo, AnalysisInfo, AnalysisProgress, AnalysisState};
