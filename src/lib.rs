pub mod cli;
pub mod decoder;
pub mod error;
pub mod machine;
pub mod memory;
pub mod pipe;
pub mod program;
pub mod topology;

// Re-export main types
pub use error::MachineError;
pub use machine::Machine;
pub use pipe::Pipe;
pub use program::Program;
pub use topology::{Cluster, MachineHandle, RunOutcome};
