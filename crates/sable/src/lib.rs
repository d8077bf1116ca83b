mod driver;

pub use driver::{check_file, emit_diagnostics, load_module, trace_lines};
