use std::path::PathBuf;

use sable::{check_file, emit_diagnostics, trace_lines};
use sable_infer::CheckOptions;

fn main() {
    if let Err(message) = run() {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = std::env::args().collect::<Vec<_>>();
    let command = parse_cli(&args)?;

    match command {
        Command::Help => {
            println!("{}", usage());
            Ok(())
        }
        Command::Check {
            input,
            show_types,
            trace,
            jobs,
        } => {
            let report = check_file(&input, &CheckOptions { trace, jobs })?;
            if show_types {
                print!("{}", report.render());
            }
            if trace {
                for line in trace_lines(&report)? {
                    eprintln!("{line}");
                }
            }
            emit_diagnostics(&report.diagnostics);
            let errors = report.diagnostics.iter().filter(|d| d.is_error()).count();
            if errors > 0 {
                return Err(format!(
                    "check failed: {errors} error{}",
                    if errors == 1 { "" } else { "s" }
                ));
            }
            Ok(())
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Check {
        input: PathBuf,
        show_types: bool,
        trace: bool,
        jobs: usize,
    },
}

fn parse_cli(args: &[String]) -> Result<Command, String> {
    let mut input = None;
    let mut show_types = false;
    let mut trace = false;
    let mut jobs = 1;

    let mut idx = 1;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            // Checking is the only pipeline.
            "--check" => {}
            "--show-types" => show_types = true,
            "--trace" => trace = true,
            "-j" | "--jobs" => {
                let Some(value) = args.get(idx + 1) else {
                    return Err("missing value for --jobs".to_string());
                };
                jobs = match value.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("invalid value for --jobs: `{value}`")),
                };
                idx += 1;
            }
            flag if flag.starts_with('-') => {
                return Err(format!("unknown argument `{flag}`\n{}", usage()));
            }
            path => {
                if input.is_some() {
                    return Err(format!("unexpected argument `{path}`\n{}", usage()));
                }
                input = Some(PathBuf::from(path));
            }
        }
        idx += 1;
    }

    let input = input.ok_or_else(usage)?;
    Ok(Command::Check {
        input,
        show_types,
        trace,
        jobs,
    })
}

fn usage() -> String {
    "usage:\n  sable [--check] [--show-types] [--trace] [--jobs N] <module.json>".to_string()
}
