//! The machine
//!
//! One machine executes one program against its own memory. It owns the
//! memory exclusively and borrows shared references to its pipes; Input and
//! Output are the only suspension points, so a machine runs as one
//! cooperative task alongside other machines and drivers.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::decoder::{self, Mode, Opcode, Parameter};
use crate::error::MachineError;
use crate::memory::Memory;
use crate::pipe::Pipe;
use crate::program::Program;

/// One virtual machine instance.
pub struct Machine {
    program: Program,
    memory: Memory,
    ptr: usize,
    relative_base: i64,
    ended: bool,
    input: Option<Arc<Pipe>>,
    output: Option<Arc<Pipe>>,
}

impl Machine {
    /// Create a machine from a program and optional pipe wiring. Memory
    /// starts as a copy of the program; the pointer, relative base and ended
    /// flag start zeroed.
    pub fn new(program: Program, input: Option<Arc<Pipe>>, output: Option<Arc<Pipe>>) -> Self {
        let memory = Memory::from_program(&program);
        Self {
            program,
            memory,
            ptr: 0,
            relative_base: 0,
            ended: false,
            input,
            output,
        }
    }

    /// Reinitialize memory, pointer, relative base and ended flag from the
    /// loaded program. Pipe wiring is left untouched.
    pub fn reset(&mut self) {
        self.memory = Memory::from_program(&self.program);
        self.ptr = 0;
        self.relative_base = 0;
        self.ended = false;
    }

    /// Poke a value directly into memory, used to patch a program before a
    /// run (e.g. overriding the first two data words or flipping an
    /// operating-mode flag).
    pub fn set_memory(&mut self, addr: usize, value: i64) {
        self.memory.store(addr, value);
    }

    pub fn memory(&self) -> &[i64] {
        self.memory.as_slice()
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn input(&self) -> Option<&Arc<Pipe>> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Arc<Pipe>> {
        self.output.as_ref()
    }

    /// Rewire the input end. Takes `&mut self`, so wiring can only change
    /// between runs — never while a run borrows the machine.
    pub fn set_input(&mut self, pipe: Option<Arc<Pipe>>) {
        self.input = pipe;
    }

    /// Rewire the output end. Same discipline as `set_input`.
    pub fn set_output(&mut self, pipe: Option<Arc<Pipe>>) {
        self.output = pipe;
    }

    /// Drive the machine to completion as a cooperative task.
    pub async fn run_async(&mut self) -> Result<(), MachineError> {
        debug!(words = self.memory.len(), "machine running");
        while !self.ended {
            self.step().await?;
        }
        debug!(words = self.memory.len(), "machine halted");
        Ok(())
    }

    /// Synchronous convenience for standalone runs: drives `run_async` on a
    /// private current-thread runtime and returns the final memory contents.
    /// Must not be called from inside an async context.
    pub fn run(&mut self) -> Result<&[i64], MachineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("failed to build current-thread runtime");
        runtime.block_on(self.run_async())?;
        Ok(self.memory.as_slice())
    }

    /* ===================== Execution ===================== */

    /// Fetch, decode and execute the instruction at the pointer.
    ///
    /// The pointer advances by the instruction's size unless a taken jump set
    /// it explicitly. Write targets are resolved before any operand is
    /// loaded, so a faulting instruction leaves memory untouched.
    async fn step(&mut self) -> Result<(), MachineError> {
        let instruction = decoder::decode(&self.memory, self.ptr)?;
        trace!(
            ptr = self.ptr,
            op = instruction.opcode.name(),
            "executing instruction"
        );

        let mut next_ptr = self.ptr + instruction.opcode.size();
        match instruction.opcode {
            Opcode::Add => {
                let dest = self.write_target(instruction.params[2])?;
                let value = self.load_operand(instruction.params[0])?
                    + self.load_operand(instruction.params[1])?;
                self.memory.store(dest, value);
            }

            Opcode::Multiply => {
                let dest = self.write_target(instruction.params[2])?;
                let value = self.load_operand(instruction.params[0])?
                    * self.load_operand(instruction.params[1])?;
                self.memory.store(dest, value);
            }

            Opcode::Input => {
                let dest = self.write_target(instruction.params[0])?;
                let value = match &self.input {
                    Some(pipe) => pipe.dequeue().await,
                    None => return Err(MachineError::NoInputWired),
                };
                self.memory.store(dest, value);
            }

            Opcode::Output => {
                let value = self.load_operand(instruction.params[0])?;
                match &self.output {
                    Some(pipe) => {
                        pipe.enqueue(value);
                        // Hand control back so cooperating tasks see the
                        // value before this machine produces the next one.
                        tokio::task::yield_now().await;
                    }
                    None => info!(value, "output with no pipe wired"),
                }
            }

            Opcode::JumpIfTrue => {
                if self.load_operand(instruction.params[0])? != 0 {
                    next_ptr = as_pointer(self.load_operand(instruction.params[1])?)?;
                }
            }

            Opcode::JumpIfFalse => {
                if self.load_operand(instruction.params[0])? == 0 {
                    next_ptr = as_pointer(self.load_operand(instruction.params[1])?)?;
                }
            }

            Opcode::LessThan => {
                let dest = self.write_target(instruction.params[2])?;
                let value = if self.load_operand(instruction.params[0])?
                    < self.load_operand(instruction.params[1])?
                {
                    1
                } else {
                    0
                };
                self.memory.store(dest, value);
            }

            Opcode::Equals => {
                let dest = self.write_target(instruction.params[2])?;
                let value = if self.load_operand(instruction.params[0])?
                    == self.load_operand(instruction.params[1])?
                {
                    1
                } else {
                    0
                };
                self.memory.store(dest, value);
            }

            Opcode::AdjustRelativeBase => {
                self.relative_base += self.load_operand(instruction.params[0])?;
            }

            Opcode::Halt => {
                self.ended = true;
            }
        }

        self.ptr = next_ptr;
        Ok(())
    }

    /// Load a readable operand: the literal for immediate mode, otherwise
    /// the word at the resolved address (extending memory as needed).
    fn load_operand(&mut self, param: Parameter) -> Result<i64, MachineError> {
        match param.mode {
            Mode::Immediate => Ok(param.raw),
            Mode::Position => {
                let addr = as_pointer(param.raw)?;
                Ok(self.memory.load(addr))
            }
            Mode::Relative => {
                let addr = as_pointer(self.relative_base + param.raw)?;
                Ok(self.memory.load(addr))
            }
        }
    }

    /// Resolve a write target. Immediate parameters denote literals, not
    /// storage locations, so writing through one is a contract violation.
    fn write_target(&self, param: Parameter) -> Result<usize, MachineError> {
        match param.mode {
            Mode::Immediate => Err(MachineError::InvalidWriteTarget { addr: self.ptr }),
            Mode::Position => as_pointer(param.raw),
            Mode::Relative => as_pointer(self.relative_base + param.raw),
        }
    }
}

fn as_pointer(value: i64) -> Result<usize, MachineError> {
    usize::try_from(value).map_err(|_| MachineError::NegativeAddress { addr: value })
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
