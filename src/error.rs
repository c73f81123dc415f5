use thiserror::Error;

/// Fatal conditions that abort a machine's run.
///
/// Every variant is terminal for the machine that raised it: the run loop
/// returns immediately and the machine stays in whatever state it had reached
/// before the faulting instruction. Nothing here is retried or swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    /// Program text contained a token that is not a base-10 integer.
    #[error("invalid integer {token:?} in program text")]
    InvalidProgramText { token: String },

    /// The instruction pointer ran past readable memory.
    ///
    /// Instruction fetch never auto-extends memory, so this is always a
    /// malformed program or an engine bug, never a valid halt.
    #[error("cannot fetch a full instruction at address {ptr} (memory holds {len} words)")]
    MalformedProgram { ptr: usize, len: usize },

    /// The decoded opcode is not in the instruction table.
    #[error("unknown opcode {opcode} at address {addr}")]
    UnknownOpcode { opcode: i64, addr: usize },

    /// An instruction tried to write through an immediate-mode parameter.
    #[error("instruction at address {addr} uses an immediate parameter as its write target")]
    InvalidWriteTarget { addr: usize },

    /// A parameter mode digit outside {0, 1, 2}.
    #[error("illegal parameter mode {mode} at address {addr}")]
    IllegalAddressMode { mode: i64, addr: usize },

    /// Position or relative addressing resolved to a negative address.
    #[error("resolved negative memory address {addr}")]
    NegativeAddress { addr: i64 },

    /// An Input instruction executed on a machine with no input pipe wired.
    #[error("input requested but no input pipe is wired")]
    NoInputWired,
}
