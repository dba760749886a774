//! Task model and registry.

pub mod registry;
pub mod types;

pub use registry::TaskRegistry;
pub use types::{
    Category, Check, Difficulty, EnvironmentRequirements, IncompleteStep, Task, VerificationStep,
    VerificationType, DEFAULT_BASE_IMAGE, DEFAULT_STEP_TIMEOUT_SECS,
};
