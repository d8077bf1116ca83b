use std::fs;
use std::path::Path;

use sable_ast::Module;
use sable_diag::Diagnostic;
use sable_infer::{CheckOptions, CheckReport, check_module};

/// Deserialize a module from its JSON declaration tree.
pub fn load_module(source: &str) -> Result<Module, String> {
    serde_json::from_str(source).map_err(|err| format!("invalid module: {err}"))
}

/// Read, deserialize and check one module file.
pub fn check_file(input: &Path, options: &CheckOptions) -> Result<CheckReport, String> {
    let source = fs::read_to_string(input)
        .map_err(|err| format!("failed to read `{}`: {err}", input.display()))?;
    let module = load_module(&source)
        .map_err(|err| format!("failed to load `{}`: {err}", input.display()))?;
    Ok(check_module(&module, options))
}

pub fn emit_diagnostics(diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("{diag}");
    }
}

/// One JSON object per recorded binding trace.
pub fn trace_lines(report: &CheckReport) -> Result<Vec<String>, String> {
    report
        .traces
        .iter()
        .map(|trace| {
            serde_json::to_string(trace).map_err(|err| format!("failed to encode trace: {err}"))
        })
        .collect()
}
