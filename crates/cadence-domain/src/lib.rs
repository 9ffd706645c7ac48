// cadence-domain library entry point
pub mod cadence;
pub mod contact;
pub mod enrollment;
pub mod errors;
pub mod step;

pub use cadence::CadenceDefinition;
pub use contact::Contact;
pub use enrollment::Enrollment;
pub use errors::DomainError;
pub use step::{Step, StepSequence};
