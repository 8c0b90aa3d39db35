//! Glipt CLI
//!
//! Command-line driver: run scripts, start the REPL, and expose the
//! check/disasm/ast/tokens debug verbs. Exit codes follow the sysexits
//! convention the interpreter uses throughout: 0 on success, 65 on a
//! compile error, 70 on a runtime error.

mod repl;

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use bumpalo::Bump;
use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::EnvFilter;

use glipt_runtime::{InterpretError, Vm};

const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;

#[derive(ClapParser)]
#[command(name = "glipt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Glipt - process orchestration scripting language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a .glipt script
    Run {
        /// Script path
        script: PathBuf,

        /// Grant every capability up front
        #[arg(long)]
        allow_all: bool,

        /// Arguments passed through to the script (sys.args)
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Interactive REPL (all permissions granted)
    Repl,

    /// Syntax-check a script without running it
    Check {
        /// Script path
        script: PathBuf,
    },

    /// Show bytecode disassembly
    Disasm {
        /// Script path
        script: PathBuf,
    },

    /// Show the parse tree
    Ast {
        /// Script path
        script: PathBuf,
    },

    /// Show the token stream
    Tokens {
        /// Script path
        script: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Repl) => repl::run_repl(),
        Some(Commands::Run {
            script,
            allow_all,
            args,
        }) => run_script(&script, allow_all, args),
        Some(Commands::Check { script }) => run_check(&script),
        Some(Commands::Disasm { script }) => run_disasm(&script),
        Some(Commands::Ast { script }) => run_ast(&script),
        Some(Commands::Tokens { script }) => run_tokens(&script),
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "glipt", &mut io::stdout());
        }
        Some(Commands::Version) => {
            println!("Glipt {}", env!("CARGO_PKG_VERSION"));
            println!("A process orchestration scripting language");
        }
    }
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: Could not open file '{}': {err}", path.display());
            process::exit(1);
        }
    }
}

fn run_script(script: &Path, allow_all: bool, args: Vec<String>) {
    let source = read_source(script);

    let mut vm = Vm::new();
    vm.script_path = Some(script.to_path_buf());
    vm.script_args = args;
    if allow_all {
        vm.permissions.allow_all = true;
    }
    if std::env::var_os("GLIPT_STRESS_GC").is_some() {
        vm.set_gc_stress(true);
    }

    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::Compile(message)) => {
            eprintln!("{message}");
            process::exit(EXIT_COMPILE_ERROR);
        }
        Err(InterpretError::Runtime(message)) => {
            eprint!("{message}");
            process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn run_check(script: &Path) {
    let source = read_source(script);
    let arena = Bump::new();
    match gliptc::parse(&source, &arena) {
        Ok(program) => {
            println!("OK: {} top-level statements parsed.", program.len());
        }
        Err(message) => {
            eprintln!("{message}");
            eprintln!("Syntax errors found.");
            process::exit(EXIT_COMPILE_ERROR);
        }
    }
}

fn run_disasm(script: &Path) {
    let source = read_source(script);
    let mut heap = glipt_core::Heap::new();
    match gliptc::compile(&mut heap, &source) {
        Ok(function) => {
            print!(
                "{}",
                glipt_runtime::disasm::disassemble_function(&heap, function, "<script>")
            );
        }
        Err(message) => {
            eprintln!("{message}");
            eprintln!("Compilation failed.");
            process::exit(EXIT_COMPILE_ERROR);
        }
    }
}

fn run_ast(script: &Path) {
    let source = read_source(script);
    let arena = Bump::new();
    match gliptc::parse(&source, &arena) {
        Ok(program) => {
            print!("{}", gliptc::ast::dump_program(program));
        }
        Err(message) => {
            eprintln!("{message}");
            eprintln!("Parse failed.");
            process::exit(EXIT_COMPILE_ERROR);
        }
    }
}

fn run_tokens(script: &Path) {
    let source = read_source(script);
    let mut scanner = gliptc::Scanner::new(&source);
    let mut last_line = 0;
    loop {
        let token = scanner.scan_token();
        if token.line != last_line {
            print!("{:4} ", token.line);
            last_line = token.line;
        } else {
            print!("   | ");
        }
        println!("{:<16} '{}'", token.kind.name(), token.text.escape_debug());

        if token.kind == gliptc::TokenKind::Eof {
            break;
        }
    }
}
