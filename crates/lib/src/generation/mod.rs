//! Multi-pass streaming generation of a claimed guide.

pub mod assembler;
pub mod coordinator;
pub mod plan;

pub use assembler::SectionAssembler;
pub use coordinator::{Claim, GenerationCoordinator, GenerationOutcome};
pub use plan::{plan_for, FieldShape, FieldSpec, PassPlan};
