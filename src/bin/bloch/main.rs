//! # Bloch
//!
//! Interpreter driver: loads a source file, runs the pipeline, executes the
//! configured number of shots, prints the tracked-outcome table, and writes
//! the OpenQASM 2 sidecar.

mod cli;

use cli::{Cli, EchoMode};

use std::{error::Error, fs};

use log::{error, info, warn};

use bloch::interpreter::{run, ExecutionReport, RunConfig};
use bloch::loader::load_program;
use bloch::semantic::analyse;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level(args.verbosity.into()).unwrap();

    let mut program = match load_program(&args.file) {
        Ok(program) => program,
        Err(load_error) => {
            error!("{load_error}");
            std::process::exit(1);
        }
    };

    if args.dump_ast {
        info!("Merged AST:\n{}", serde_json::to_string_pretty(&program)?);
    }

    let analysis = match analyse(&mut program) {
        Ok(analysis) => analysis,
        Err(semantic_error) => {
            error!("{semantic_error}");
            std::process::exit(1);
        }
    };

    if args.shots.is_some() {
        warn!("--shots is deprecated; prefer @shots(N) on main");
    }

    // @shots(N) wins over the CLI flag
    let shots = if program.shots.annotated {
        if let Some(flag) = args.shots {
            if flag != program.shots.count {
                warn!(
                    "--shots={flag} conflicts with @shots({}); using the annotation",
                    program.shots.count
                );
            }
        }
        program.shots.count
    } else {
        args.shots.unwrap_or(1)
    };

    let config = RunConfig {
        shots,
        echo: args.echo == EchoMode::On,
        warn_on_exit: !args.no_warn,
        seed: None,
    };

    let report = match run(&program, &analysis, config) {
        Ok(report) => report,
        Err(runtime_error) => {
            error!("{runtime_error}");
            std::process::exit(1);
        }
    };

    print!("{}", report.stdout);
    print_tracked_table(&report);

    if args.emit_qasm {
        let qasm_path = args.file.with_extension("qasm");
        fs::write(&qasm_path, &report.qasm)?;
        info!("wrote {}", qasm_path.display());
    }

    Ok(())
}

fn print_tracked_table(report: &ExecutionReport) {
    if report.tracked.is_empty() {
        return;
    }
    for name in report.tracked.names() {
        println!("{name}:");
        for (outcome, count) in report.tracked.sorted_outcomes(name) {
            println!("  {outcome} -> {count}");
        }
    }
}
