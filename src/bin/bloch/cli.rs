//! CLI argument parsing for the interpreter driver.

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The path to the bloch source file.
    #[arg(index = 1)]
    pub file: std::path::PathBuf,

    /// Number of shots to run; overridden by @shots(N) on main.
    #[arg(long)]
    pub shots: Option<u64>,

    /// Whether echo statements produce output.
    #[arg(long, value_enum, default_value_t = EchoMode::On)]
    pub echo: EchoMode,

    /// Write the OpenQASM 2 trace next to the input file.
    #[arg(long)]
    pub emit_qasm: bool,

    /// Dump the merged AST as JSON (for debugging).
    #[arg(long)]
    pub dump_ast: bool,

    /// Suppress end-of-run warnings about unmeasured qubits.
    #[arg(long)]
    pub no_warn: bool,

    /// Specify the log level of the interpreter.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EchoMode {
    On,
    Off,
}

/// Log level of the interpreter, mapped onto the `log` crate's levels.
#[derive(ValueEnum, Clone, Copy, Default, Debug)]
pub enum LogLevel {
    /// Only critical errors.
    Error,

    /// Also warnings (shot-count conflicts, unmeasured qubits).
    #[default]
    Warn,

    /// General progress information.
    Info,

    /// Everything that happens internally.
    Debug,

    /// Extra-precise debug output.
    Trace,
}

impl From<LogLevel> for log::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
