//! The six launch stages, in execution order

mod build;
mod check_status;
mod claim;
mod launch;
mod load_shed;
mod mutex;

pub use build::{BuildConfig, BuildStage};
pub use check_status::CheckStatusStage;
pub use claim::ClaimStage;
pub use launch::LaunchStage;
pub use load_shed::LoadShedStage;
pub use mutex::{MutexPolicy, MutexStage};
