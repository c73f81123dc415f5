use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::machine::Machine;
use crate::pipe::Pipe;
use crate::program::Program;
use crate::topology::Cluster;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "Run integer-machine programs standalone or wired into pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one machine to completion and print its outputs
    Run {
        /// Path to the program file (one line of comma-separated integers)
        program: PathBuf,

        /// Values queued on the input pipe before the run, in order
        #[arg(short = 'i', long = "input")]
        inputs: Vec<i64>,

        /// Memory patches applied before the run, as ADDR=VALUE
        #[arg(short = 'p', long = "patch")]
        patches: Vec<String>,

        /// Also print the final value of memory address 0
        #[arg(long)]
        print_zero: bool,
    },

    /// Run copies of one program chained stage-to-stage
    Pipeline {
        /// Path to the program file (one line of comma-separated integers)
        program: PathBuf,

        /// Number of machine stages
        #[arg(short = 's', long = "stages", default_value = "5")]
        stages: usize,

        /// One value seeded to each stage's input pipe, in stage order
        #[arg(long = "seed")]
        seeds: Vec<i64>,

        /// Initial value fed to the first stage
        #[arg(long = "initial", default_value = "0")]
        initial: i64,

        /// Wire the last stage's output back to the first stage's input
        #[arg(long)]
        feedback: bool,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            program,
            inputs,
            patches,
            print_zero,
        } => run_single(&program, &inputs, &patches, print_zero).await,

        Commands::Pipeline {
            program,
            stages,
            seeds,
            initial,
            feedback,
        } => run_cluster(&program, stages, &seeds, initial, feedback).await,
    }
}

async fn run_single(
    path: &Path,
    inputs: &[i64],
    patches: &[String],
    print_zero: bool,
) -> Result<()> {
    let program = load_program(path)?;

    // Only wire an input pipe when there is something to feed it, so a
    // program that wants more input fails fast instead of blocking.
    let input = if inputs.is_empty() {
        None
    } else {
        let pipe = Arc::new(Pipe::new());
        for &value in inputs {
            pipe.enqueue(value);
        }
        Some(pipe)
    };
    let output = Arc::new(Pipe::new());

    let mut machine = Machine::new(program, input, Some(Arc::clone(&output)));
    for patch in patches {
        let (addr, value) = parse_patch(patch)?;
        machine.set_memory(addr, value);
    }

    machine
        .run_async()
        .await
        .with_context(|| format!("program {} aborted", path.display()))?;

    for value in output.drain() {
        println!("{value}");
    }
    if print_zero {
        println!("{}", machine.memory()[0]);
    }

    Ok(())
}

async fn run_cluster(
    path: &Path,
    stages: usize,
    seeds: &[i64],
    initial: i64,
    feedback: bool,
) -> Result<()> {
    anyhow::ensure!(
        seeds.is_empty() || seeds.len() == stages,
        "expected one --seed per stage ({} stages, {} seeds)",
        stages,
        seeds.len()
    );

    let program = load_program(path)?;
    let mut cluster = if feedback {
        Cluster::feedback_loop(program, stages)
    } else {
        Cluster::pipeline(program, stages)
    };

    for (index, &seed) in seeds.iter().enumerate() {
        cluster.stage_input(index).enqueue(seed);
    }
    cluster.input().enqueue(initial);

    cluster
        .run()
        .await
        .with_context(|| format!("cluster for {} aborted", path.display()))?;

    for value in cluster.output().drain() {
        println!("{value}");
    }

    Ok(())
}

fn load_program(path: &Path) -> Result<Program> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read program file {}", path.display()))?;
    let program = Program::parse(&text)
        .with_context(|| format!("failed to parse program file {}", path.display()))?;
    Ok(program)
}

fn parse_patch(patch: &str) -> Result<(usize, i64)> {
    let (addr, value) = patch
        .split_once('=')
        .with_context(|| format!("patch {patch:?} must look like ADDR=VALUE"))?;
    let addr = addr
        .trim()
        .parse::<usize>()
        .with_context(|| format!("invalid patch address {addr:?}"))?;
    let value = value
        .trim()
        .parse::<i64>()
        .with_context(|| format!("invalid patch value {value:?}"))?;
    Ok((addr, value))
}
