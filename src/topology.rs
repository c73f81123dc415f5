//! Orchestration and wiring
//!
//! External wiring that assembles machines and pipes into topologies and runs
//! them concurrently to mutual completion:
//! - `Cluster::pipeline`: stage *i*'s output pipe is stage *i+1*'s input pipe
//! - `Cluster::feedback_loop`: as pipeline, but the last stage's output pipe
//!   is also the first stage's input pipe
//! - `spawn`: one machine as a cancellable task, for scenarios where an
//!   external driver owns the other end of its pipes
//!
//! The cluster holds the only mutable handles to its machines, so rewiring,
//! clearing and resetting can only happen between runs.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::MachineError;
use crate::machine::Machine;
use crate::pipe::Pipe;
use crate::program::Program;

/* ===================== Cluster ===================== */

/// A set of machines running one shared program, wired in a chain or a loop.
pub struct Cluster {
    program: Program,
    machines: Vec<Machine>,
    pipes: Vec<Arc<Pipe>>,
    feedback: bool,
}

impl Cluster {
    /// Chain `stages` machines so each stage's output pipe feeds the next
    /// stage's input pipe. The first input and last output pipe are the
    /// caller's to drive and observe.
    pub fn pipeline(program: Program, stages: usize) -> Self {
        assert!(stages > 0, "a cluster needs at least one stage");
        let pipes = (0..=stages).map(|_| Arc::new(Pipe::new())).collect();
        let mut cluster = Self {
            program,
            machines: Vec::new(),
            pipes,
            feedback: false,
        };
        let machines = (0..stages).map(|index| cluster.build_stage(index)).collect();
        cluster.machines = machines;
        cluster
    }

    /// Like `pipeline`, but the last stage's output pipe *is* the first
    /// stage's input pipe, closing the cycle. Seed the cycle before running.
    pub fn feedback_loop(program: Program, stages: usize) -> Self {
        assert!(stages > 0, "a cluster needs at least one stage");
        let pipes = (0..stages).map(|_| Arc::new(Pipe::new())).collect();
        let mut cluster = Self {
            program,
            machines: Vec::new(),
            pipes,
            feedback: true,
        };
        let machines = (0..stages).map(|index| cluster.build_stage(index)).collect();
        cluster.machines = machines;
        cluster
    }

    /// The first stage's input pipe.
    pub fn input(&self) -> &Arc<Pipe> {
        &self.pipes[0]
    }

    /// The last stage's output pipe. In a feedback loop this is the same
    /// pipe as `input`.
    pub fn output(&self) -> &Arc<Pipe> {
        if self.feedback {
            &self.pipes[0]
        } else {
            &self.pipes[self.pipes.len() - 1]
        }
    }

    /// Input pipe of one stage, for seeding per-stage values.
    pub fn stage_input(&self, index: usize) -> &Arc<Pipe> {
        &self.pipes[index]
    }

    pub fn stages(&self) -> usize {
        if self.feedback {
            self.pipes.len()
        } else {
            self.pipes.len() - 1
        }
    }

    /// One stage's machine, e.g. for poking memory before a run.
    pub fn machine_mut(&mut self, index: usize) -> &mut Machine {
        &mut self.machines[index]
    }

    /// Re-run discipline, in order: clear every pipe, then reset every
    /// machine. Callers may then poke memory and seed pipes for the next
    /// scenario.
    pub fn reset(&mut self) {
        for pipe in &self.pipes {
            pipe.clear();
        }
        for machine in &mut self.machines {
            machine.reset();
        }
    }

    /// Run every stage concurrently until all have halted.
    ///
    /// Cooperating machines are mutually dependent on dataflow completion,
    /// so the first failure aborts the remaining stages and is returned.
    /// Aborted stages are rebuilt from the program afterwards, leaving the
    /// cluster reusable after `reset`.
    pub async fn run(&mut self) -> Result<(), MachineError> {
        let stages = self.stages();
        debug!(stages, feedback = self.feedback, "cluster running");

        let mut tasks = JoinSet::new();
        for (index, mut machine) in self.machines.drain(..).enumerate() {
            tasks.spawn(async move {
                let outcome = machine.run_async().await;
                (index, machine, outcome)
            });
        }

        let mut finished: Vec<Option<Machine>> = (0..stages).map(|_| None).collect();
        let mut failure: Option<MachineError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, machine, outcome)) => {
                    finished[index] = Some(machine);
                    if let Err(err) = outcome {
                        if failure.is_none() {
                            failure = Some(err);
                        }
                        tasks.abort_all();
                    }
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        std::panic::resume_unwind(join_error.into_panic());
                    }
                    // Aborted stage; its machine is rebuilt below.
                }
            }
        }

        let machines = finished
            .into_iter()
            .enumerate()
            .map(|(index, machine)| machine.unwrap_or_else(|| self.build_stage(index)))
            .collect();
        self.machines = machines;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn build_stage(&self, index: usize) -> Machine {
        let stages = self.stages();
        let input = Arc::clone(&self.pipes[index]);
        let output = if self.feedback {
            Arc::clone(&self.pipes[(index + 1) % stages])
        } else {
            Arc::clone(&self.pipes[index + 1])
        };
        Machine::new(self.program.clone(), Some(input), Some(output))
    }
}

/* ===================== Driver-attached machines ===================== */

/// How a spawned machine's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program executed its halt instruction.
    Halted,
    /// The orchestrator cancelled the task before it halted.
    Cancelled,
    /// A fatal condition aborted the run.
    Failed(MachineError),
}

/// Handle to a machine running as its own task, with an external driver on
/// the other end of its pipes. The driver cancels the machine once its own
/// termination condition is met.
pub struct MachineHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<(Machine, RunOutcome)>,
}

/// Start a machine as a cancellable background task.
pub fn spawn(mut machine: Machine) -> MachineHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let outcome = tokio::select! {
            result = machine.run_async() => match result {
                Ok(()) => RunOutcome::Halted,
                Err(err) => RunOutcome::Failed(err),
            },
            _ = token.cancelled() => RunOutcome::Cancelled,
        };
        (machine, outcome)
    });
    MachineHandle { cancel, task }
}

impl MachineHandle {
    /// Ask the machine task to stop at its next suspension point.
    /// Cancellation never corrupts the shared pipes: a cancelled waiter
    /// consumes neither a wakeup signal nor a value.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task and take the machine back with its outcome.
    pub async fn join(self) -> (Machine, RunOutcome) {
        self.task.await.expect("machine task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRUST_PROGRAM: &str = "3,15,3,16,1002,16,10,16,1,16,15,15,4,15,99,0,0";
    const FEEDBACK_PROGRAM_A: &str = "3,26,1001,26,-4,26,3,27,1002,27,2,27,1,27,26,\
                                      27,4,27,1001,28,-1,28,1005,28,6,99,0,0,5";
    const FEEDBACK_PROGRAM_B: &str = "3,52,1001,52,-5,52,3,53,1,52,56,54,1007,54,5,55,\
                                      1005,55,26,1001,54,-5,54,1105,1,12,1,53,54,53,\
                                      1008,54,0,55,1001,55,1,55,2,53,55,53,4,53,\
                                      1001,56,-1,56,1005,56,6,99,0,0,0,0,10";

    /// Heap's algorithm; small inputs only.
    fn permutations(values: &mut Vec<i64>, k: usize, out: &mut Vec<Vec<i64>>) {
        if k <= 1 {
            out.push(values.clone());
            return;
        }
        for i in 0..k {
            permutations(values, k - 1, out);
            if k % 2 == 0 {
                values.swap(i, k - 1);
            } else {
                values.swap(0, k - 1);
            }
        }
    }

    fn phase_permutations(range: std::ops::Range<i64>) -> Vec<Vec<i64>> {
        let mut values: Vec<i64> = range.collect();
        let count = values.len();
        let mut out = Vec::new();
        permutations(&mut values, count, &mut out);
        out
    }

    /// Seed the phase settings and initial signal, run to mutual completion,
    /// read back the final signal.
    async fn amplify(cluster: &mut Cluster, phases: &[i64]) -> i64 {
        cluster.reset();
        for (index, &phase) in phases.iter().enumerate() {
            cluster.stage_input(index).enqueue(phase);
        }
        cluster.input().enqueue(0);
        cluster.run().await.unwrap();
        cluster.output().peek().expect("no final signal produced")
    }

    #[tokio::test]
    async fn pipeline_amplifies_a_signal() {
        let program = Program::parse(THRUST_PROGRAM).unwrap();
        let mut cluster = Cluster::pipeline(program, 5);
        assert_eq!(amplify(&mut cluster, &[4, 3, 2, 1, 0]).await, 43210);
    }

    #[tokio::test]
    async fn pipeline_maximum_over_all_phase_permutations() {
        let program = Program::parse(THRUST_PROGRAM).unwrap();
        let mut cluster = Cluster::pipeline(program, 5);
        let mut best = 0;
        for phases in phase_permutations(0..5) {
            best = best.max(amplify(&mut cluster, &phases).await);
        }
        assert_eq!(best, 43210);
    }

    #[tokio::test]
    async fn feedback_loop_runs_to_mutual_completion() {
        let program = Program::parse(FEEDBACK_PROGRAM_A).unwrap();
        let mut cluster = Cluster::feedback_loop(program, 5);
        assert_eq!(amplify(&mut cluster, &[9, 8, 7, 6, 5]).await, 139_629_729);
    }

    #[tokio::test]
    async fn feedback_maximum_over_all_phase_permutations() {
        let program = Program::parse(FEEDBACK_PROGRAM_A).unwrap();
        let mut cluster = Cluster::feedback_loop(program, 5);
        let mut best = 0;
        for phases in phase_permutations(5..10) {
            best = best.max(amplify(&mut cluster, &phases).await);
        }
        assert_eq!(best, 139_629_729);

        let program = Program::parse(FEEDBACK_PROGRAM_B).unwrap();
        let mut cluster = Cluster::feedback_loop(program, 5);
        let mut best = 0;
        for phases in phase_permutations(5..10) {
            best = best.max(amplify(&mut cluster, &phases).await);
        }
        assert_eq!(best, 18_216);
    }

    #[tokio::test]
    async fn cluster_is_reusable_across_resets() {
        let program = Program::parse(THRUST_PROGRAM).unwrap();
        let mut cluster = Cluster::pipeline(program, 5);
        let first = amplify(&mut cluster, &[4, 3, 2, 1, 0]).await;
        let second = amplify(&mut cluster, &[4, 3, 2, 1, 0]).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn one_failing_stage_aborts_the_topology() {
        let program = Program::parse("77").unwrap();
        let mut cluster = Cluster::pipeline(program, 2);
        let err = cluster.run().await.unwrap_err();
        assert_eq!(err, MachineError::UnknownOpcode { opcode: 77, addr: 0 });

        // The cluster stays whole and reusable.
        assert_eq!(cluster.stages(), 2);
        cluster.reset();
    }

    #[tokio::test]
    async fn driver_cancels_a_machine_mid_run() {
        // Counts up forever: increments a cell, outputs it, jumps back.
        let program = Program::parse("1001,9,1,9,4,9,1105,1,0,0").unwrap();
        let output = Arc::new(Pipe::new());
        let machine = Machine::new(program, None, Some(Arc::clone(&output)));
        let handle = spawn(machine);

        // Driver's termination condition: five values observed.
        for expected in 1..=5 {
            assert_eq!(output.dequeue().await, expected);
        }
        handle.cancel();
        let (machine, outcome) = handle.join().await;
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(!machine.ended());

        // The shared pipe survives cancellation intact.
        for value in output.drain() {
            assert!(value > 5);
        }
    }

    #[tokio::test]
    async fn spawned_machine_halts_on_its_own() {
        let program = Program::parse("3,9,101,1,9,9,4,9,99,0").unwrap();
        let input = Arc::new(Pipe::new());
        let output = Arc::new(Pipe::new());
        let machine = Machine::new(
            program,
            Some(Arc::clone(&input)),
            Some(Arc::clone(&output)),
        );
        let handle = spawn(machine);

        input.enqueue(41);
        assert_eq!(output.dequeue().await, 42);

        let (machine, outcome) = handle.join().await;
        assert_eq!(outcome, RunOutcome::Halted);
        assert!(machine.ended());
    }
}
