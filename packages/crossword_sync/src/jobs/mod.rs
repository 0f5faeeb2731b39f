//! Explanation generation: the generator seam and the background runner.

pub mod explainer;
pub mod runner;

pub use explainer::{Explainer, ExplanationInput};
pub use runner::{JobOrigin, JobRequest, JobRunner};
