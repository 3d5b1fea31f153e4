use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use miniscript_vm::diagnostic::{ansi::AnsiRenderer, json, Diagnostic};
use miniscript_vm::{bytecode, Program, Vm, VmConfig, VmState};

#[derive(Parser)]
#[command(name = "msvm")]
#[command(about = "Run MiniScript 2 bytecode programs")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Report errors as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a program's @main function and print its result
    Run(RunArgs),
    /// Print every function's code as text
    Disasm { file: PathBuf },
}

#[derive(Args)]
struct RunArgs {
    file: PathBuf,
    /// Stop after this many instructions (0 = no limit)
    #[arg(long, default_value_t = 0)]
    max_cycles: u32,
    /// Print each instruction before executing it
    #[arg(long)]
    step: bool,
    /// Registers in the value stack
    #[arg(long)]
    stack_size: Option<usize>,
    /// Maximum call depth
    #[arg(long)]
    call_depth: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match &cli.command {
        Commands::Run(args) => run(args),
        Commands::Disasm { file } => disasm(file),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            report(&d, cli.json);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn report(d: &Diagnostic, as_json: bool) {
    if as_json {
        eprintln!("{}", json::render(d));
    } else {
        let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
        eprint!("{}", renderer.render(d));
    }
}

fn load(path: &Path) -> Result<Program, Diagnostic> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Diagnostic::error(format!("can't read {}: {e}", path.display())))?;
    Program::from_json(&text).map_err(|e| Diagnostic::from(&e))
}

fn run(args: &RunArgs) -> Result<(), Diagnostic> {
    let program = load(&args.file)?;

    let mut config = VmConfig::default();
    if let Some(n) = args.stack_size {
        config = config.with_stack_size(n);
    }
    if let Some(n) = args.call_depth {
        config = config.with_call_stack_size(n);
    }
    let mut vm = Vm::new(config);
    let functions = program.into_funcdefs(vm.heap_mut()).map_err(|e| Diagnostic::from(&e))?;
    vm.reset(functions).map_err(|e| Diagnostic::from(&e))?;

    let result = if args.step {
        loop {
            if let Some(line) = vm.describe_next() {
                eprintln!("{line}");
            }
            let result = vm.run(1);
            if vm.state() == VmState::Halted {
                break result;
            }
        }
    } else {
        vm.run(args.max_cycles)
    };

    if let Some(d) = Diagnostic::from_vm(&vm) {
        return Err(d);
    }
    if vm.state() == VmState::Suspended {
        return Err(Diagnostic::error(format!("stopped after {} instructions", args.max_cycles))
            .at(vm.function_name(vm.current_function_index()), vm.pc())
            .with_suggestion("raise --max-cycles or pass 0 for no limit"));
    }
    println!("{}", vm.display(result));
    Ok(())
}

fn disasm(path: &Path) -> Result<(), Diagnostic> {
    let program = load(path)?;
    for record in &program.functions {
        let words = record.words().map_err(|e| Diagnostic::from(&e))?;
        let params: Vec<&str> = record.params.iter().map(|p| p.name.as_str()).collect();
        println!("{}({}):", record.name, params.join(", "));
        for (pc, word) in words.iter().enumerate() {
            println!("  {pc:04}: {}", bytecode::disassemble(*word));
        }
    }
    Ok(())
}
