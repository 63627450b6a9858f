use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lingo::bytecode::disasm::print_bc;
use lingo::bytecode::compile_error::CompileError;
use lingo::bytecode::{Compiler, ScriptBytecode};
use lingo::frontend::lexer::Lexer;
use lingo::frontend::token_dumper::TokenDumper;
use lingo::runtime::{MemoryHost, Vm};

#[derive(Parser)]
#[command(name = "lingo", about = "Single-pass Lingo compiler and bytecode VM")]
struct Cli {
    /// Script to run: Lingo source, or a compiled `.lbc` file
    file: PathBuf,

    /// Show tokens only
    #[arg(long)]
    tokens: bool,

    /// Plain token output (with --tokens)
    #[arg(long)]
    no_color: bool,

    /// One token per line (with --tokens)
    #[arg(long)]
    pretty: bool,

    /// Print the disassembly before running
    #[arg(long, alias = "bytecode")]
    bc: bool,

    /// Write the compiled script to this file instead of running it
    #[arg(long, value_name = "OUT")]
    emit: Option<PathBuf>,

    /// Compile and report diagnostics without running
    #[arg(long)]
    check: bool,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "lingo=debug",
            _ => "lingo=trace",
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let script = if is_compiled(&cli.file) {
        match fs::read(&cli.file) {
            Ok(bytes) => match ScriptBytecode::from_bytes(&bytes) {
                Ok(script) => script,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                eprintln!("Failed to read '{}': {}", cli.file.display(), e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        let source = match fs::read_to_string(&cli.file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Failed to read '{}': {}", cli.file.display(), e);
                return ExitCode::FAILURE;
            }
        };
        if cli.tokens {
            return dump_tokens(&source, cli.no_color, cli.pretty);
        }
        match compile_source(&source, &cli.file) {
            Some(script) => script,
            None => return ExitCode::FAILURE,
        }
    };

    if cli.bc {
        print_bc(&script);
    }

    if let Some(out) = &cli.emit {
        let written = script
            .to_bytes()
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(out, bytes).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Failed to write '{}': {}", out.display(), e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    if cli.check {
        return ExitCode::SUCCESS;
    }

    let mut host = MemoryHost::new().echo();
    let mut vm = Vm::new();
    if let Err(e) = vm.run(&script, &mut host) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn is_compiled(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("lbc")
}

/// Compiles a source file, printing every diagnostic as it is reported.
fn compile_source(source: &str, path: &Path) -> Option<ScriptBytecode> {
    let name = path.display().to_string();
    let mut compiler = Compiler::new().on_diagnostic(move |d| eprintln!("{}:{}", name, d));

    let compilation = match compiler.compile(source) {
        Ok(compilation) => compilation,
        // already printed by the reporter
        Err(CompileError::Lexer(_)) => return None,
        Err(e) => {
            eprintln!("{}", e);
            return None;
        }
    };
    match compilation.into_script() {
        Ok(script) => Some(script),
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    }
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) -> ExitCode {
    let mut lexer = Lexer::new(source);

    match lexer.tokenize() {
        Ok(tokens) => {
            let mut dumper = TokenDumper::new();

            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }

            dumper.dump(&tokens);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            ExitCode::FAILURE
        }
    }
}
