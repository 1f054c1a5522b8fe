//! Somiré compiler and VM driver.
//!
//! `somirec parse|compile|list|run|interpret <path>` -- exit code 0 on
//! success, 1 on any parse, compile, or execution error.

use clap::{Parser as ClapParser, Subcommand};
use somire_core::{Chunk, Heap};
use somire_runtime::{stdlib, Vm};
use somirec::FrontendError;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "somirec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Somiré compiler and virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a source file and report syntax errors without compiling it
    Parse { path: PathBuf },
    /// Compile a source file to a sibling .sbf bytecode file
    Compile { path: PathBuf },
    /// Disassemble a compiled .sbf file
    List { path: PathBuf },
    /// Run a compiled .sbf file
    Run { path: PathBuf },
    /// Parse, compile, and run a source file in one step
    Interpret { path: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::Parse { path } => run_parse(&path),
        Commands::Compile { path } => run_compile(&path),
        Commands::List { path } => run_list(&path),
        Commands::Run { path } => run_run(&path),
        Commands::Interpret { path } => run_interpret(&path),
    };
    if !ok {
        process::exit(1);
    }
}

fn read_source(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            None
        }
    }
}

fn sbf_sibling(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.rfind('.') {
        Some(dot) => PathBuf::from(format!("{}.sbf", &s[..dot])),
        None => PathBuf::from(format!("{s}.sbf")),
    }
}

fn run_parse(path: &Path) -> bool {
    let Some(source) = read_source(path) else { return false };
    match somirec::parse_source(&source) {
        Ok(_) => true,
        Err(e) => {
            eprintln!("{e}");
            false
        }
    }
}

fn run_compile(path: &Path) -> bool {
    let Some(source) = read_source(path) else { return false };
    let heap = Heap::new();
    let chunk = match somirec::compile_source(&source, &heap) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return false;
        }
    };
    let out_path = sbf_sibling(path);
    let mut file = match std::fs::File::create(&out_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: {e}", out_path.display());
            return false;
        }
    };
    if let Err(e) = chunk.write_to(&heap, &mut file) {
        eprintln!("{}: {e}", out_path.display());
        return false;
    }
    true
}

fn load_chunk(path: &Path, heap: &Heap) -> Option<Chunk> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            return None;
        }
    };
    match Chunk::read_from(heap, &mut file) {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            None
        }
    }
}

fn run_list(path: &Path) -> bool {
    let heap = Heap::new();
    let Some(chunk) = load_chunk(path, &heap) else { return false };
    for (i, f) in chunk.functions.iter().enumerate() {
        println!("function {i}:");
        print!("{}", f.disassemble(&chunk, &heap));
    }
    true
}

fn run_run(path: &Path) -> bool {
    let heap = Heap::new();
    let Some(chunk) = load_chunk(path, &heap) else { return false };
    execute(chunk, heap)
}

fn run_interpret(path: &Path) -> bool {
    let Some(source) = read_source(path) else { return false };
    let heap = Heap::new();
    let chunk = match somirec::compile_source(&source, &heap) {
        Ok(c) => c,
        Err(e) => {
            report_frontend_error(&e);
            return false;
        }
    };
    execute(chunk, heap)
}

fn report_frontend_error(e: &FrontendError) {
    eprintln!("{e}");
}

fn execute(chunk: Chunk, heap: Heap) -> bool {
    let mut vm = Vm::new(heap);
    stdlib::install(&vm);
    match vm.run(&chunk) {
        Ok(_) => true,
        Err(e) => {
            eprintln!("{e}");
            false
        }
    }
}
