//! qstep CLI - コマンドラインインターフェース
//!
//! エミュレータ上の32ビットバイナリを対話的にデバッグするREPL

use anyhow::Result;
use clap::Parser;
use qstep_core::{
    EmulatorConfig, InputMarker, InputPrompt, Outcome, RemoteHost, Session, SessionConfig,
    StdoutConsole, DEFAULT_PORT,
};
use qstep_elf::SymbolTable;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// qstep - step debugger for emulated 32-bit binaries
#[derive(Parser)]
#[command(name = "qstep")]
#[command(version = "0.1.0")]
#[command(about = "Debug a 32-bit binary running under a user-mode emulator", long_about = None)]
struct Cli {
    /// Path to the binary to debug
    binary: PathBuf,

    /// Port of the emulator's remote debugging stub
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Emulator executable
    #[arg(long, default_value = "qemu-i386-static")]
    emulator: String,

    /// Extra argument passed to the emulator (repeatable)
    #[arg(long = "emulator-arg", default_value = "-one-insn-per-tb", allow_hyphen_values = true)]
    emulator_args: Vec<String>,

    /// Symbol prefix marking input routines
    #[arg(long, default_value = "in")]
    input_prefix: String,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.binary.clone());
        config.port = self.port;
        config.emulator = EmulatorConfig::qemu(self.emulator.clone(), &self.emulator_args);
        config.input_marker = InputMarker::new(self.input_prefix.clone());
        config
    }
}

/// 端末から入力ルーチン向けの1行を受け取るプロンプト
struct RustylinePrompt {
    editor: DefaultEditor,
}

impl RustylinePrompt {
    fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl InputPrompt for RustylinePrompt {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(line),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                Err(anyhow::anyhow!("End of input"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("qstep - Emulated Binary Step Debugger");
    println!("Version 0.1.0");
    println!();

    let cli = Cli::parse();
    let mut session = init_session(&cli)?;
    run_repl(&mut session)?;

    Ok(())
}

/// シンボルを読み込み、リモートホストとセッションを構築する
fn init_session(cli: &Cli) -> Result<Session<RemoteHost>> {
    println!("Loading binary: {}", cli.binary.display());

    // シンボルがなくてもアドレス指定でデバッグできる
    let symbols = match SymbolTable::load(&cli.binary) {
        Ok(symbols) => {
            println!("Loaded {} symbols", symbols.len());
            symbols
        }
        Err(e) => {
            tracing::warn!("failed to load symbols from {}: {}", cli.binary.display(), e);
            SymbolTable::default()
        }
    };
    println!();

    let host = RemoteHost::new(symbols)?;
    let session = Session::new(
        host,
        cli.session_config(),
        Arc::new(StdoutConsole),
        Box::new(RustylinePrompt::new()?),
    )?;
    Ok(session)
}

/// REPLループを実行する
fn run_repl(session: &mut Session<RemoteHost>) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(qstep) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if line == "help" || line == "h" {
                    print_help();
                    continue;
                }

                match session.dispatch(line) {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::Exit) => std::process::exit(0),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help              - Show this help message");
    println!("  run (r)           - Launch the emulator, connect and continue");
    println!("  start             - Launch the emulator, connect and stop at entry");
    println!("  quit/exit/q       - Stop the emulator and exit");
    println!();
    println!("Stepping (input routines are prompted before the call):");
    println!("  stepi (si)        - Execute one instruction, entering calls");
    println!("  nexti (ni)        - Execute one instruction, stepping over calls");
    println!("  step (s)/next (n) - Same as stepi/nexti");
    println!("  continue (c)      - Continue execution");
    println!();
    println!("Inspection:");
    println!("  x/<N>i <loc>      - Disassemble N instructions");
    println!("  x/<N>xw <loc>     - Dump N 32-bit words");
    println!("  info registers [reg]");
    println!("  break (b) <loc>   - Set breakpoint at symbol or address");
    println!("  delete            - Delete all breakpoints");
    println!();
    println!("Examples:");
    println!("  start");
    println!("  x/5i $pc");
    println!("  break *0x8049000");
}
