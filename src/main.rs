//! treevm - loads a JSON document, runs the `main` program over it and saves
//! the resulting document.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use treevm::bytecode::disasm::print_program;
use treevm::{Instruction, Program, ProgramBuilder, Value, Vm, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "treevm")]
#[command(about = "Run a bytecode program over a JSON document")]
struct Cli {
    /// JSON document to load
    input: PathBuf,

    /// Where the document is written after the run
    #[arg(short, long, default_value = "save.json")]
    output: PathBuf,

    /// Write strict JSON instead of the dump layout
    #[arg(long)]
    json: bool,

    /// Print the disassembly of every program before running
    #[arg(long)]
    disasm: bool,

    /// TOML file with VM limits
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instruction budget per run
    #[arg(long)]
    max_steps: Option<usize>,

    /// Deepest nesting the dump descends to
    #[arg(long)]
    max_depth: Option<usize>,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treevm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    info!("Loading document from: {}", cli.input.display());
    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", cli.input.display()))?;

    let mut vm = Vm::with_config(Value::from(json), config);

    let main = sample_program();
    if cli.disasm {
        print_program(&mut io::stdout().lock(), "main", &main)?;
    }
    vm.register_program("main", main)?;

    vm.run("main")?;
    info!("Run finished, {} value(s) left on the stack", vm.stack().len());

    save(&vm, &cli.output, cli.json)?;
    info!("Document written to: {}", cli.output.display());
    Ok(())
}

fn load_config(cli: &Cli) -> Result<VmConfig> {
    let mut config = match &cli.config {
        Some(path) => VmConfig::load(path)?,
        None => VmConfig::default(),
    };
    if let Some(steps) = cli.max_steps {
        config.max_steps = Some(steps);
    }
    if let Some(depth) = cli.max_depth {
        config.max_nesting_depth = depth;
    }
    Ok(config)
}

/// `INT 10, INT 20, ADD, PRINT, EXIT`
fn sample_program() -> Program {
    let mut b = ProgramBuilder::new();
    b.int(10)
        .int(20)
        .op(Instruction::Add)
        .op(Instruction::Print)
        .op(Instruction::Exit);
    b.build()
}

fn save<W: Write>(vm: &Vm<W>, path: &Path, json: bool) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    if json {
        vm.dump_json(&mut out)?;
    } else {
        vm.dump(&mut out)?;
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
