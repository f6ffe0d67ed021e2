//! Standard command-line interface for compiling and running modules.
//!
//! This is thin glue around the library: all file I/O of the toolchain lives here, outside
//! the compilation pipeline itself.

use std::fs;
use std::io::stdout;

use clap::Parser;

use crate::bytecode::Module;

macro_rules! crash {
    ($ret:literal : $($tt:tt)*) => {{
        eprintln!($($tt)*);
        std::process::exit($ret);
    }}
}

/// Standard slate compiler actions that can be performed
#[derive(Parser, Debug)]
pub enum Mode {
    /// Compiles a single source file into a module container
    Build {
        /// Path to the source file
        src: String,

        /// Output path (default: the source path with the .svm extension)
        #[clap(long)]
        out: Option<String>,
    },
    /// Compiles a single source file and dumps its disassembly and constant table to stdout
    Dump {
        /// Path to the source file
        src: String,
    },
    /// Compiles a single source file and runs one of its methods
    Run {
        /// Path to the source file
        src: String,

        /// The method to execute
        #[clap(long, default_value_t = String::from("main"))]
        method: String,
    },
}

fn build(src: &str) -> Module {
    let content = match fs::read_to_string(src) {
        Ok(x) => x,
        Err(e) => crash!(1: "failed to open '{src}' for reading:\n{e:?}"),
    };
    match Module::compile(&content) {
        Ok(x) => x,
        Err(e) => crash!(2: "failed to compile '{src}':\n{e:?}"),
    }
}

/// Performs one standard CLI action.
pub fn run_with(mode: Mode) {
    match mode {
        Mode::Build { src, out } => {
            let module = build(&src);
            let out = out.unwrap_or_else(|| match src.rsplit_once('.') {
                Some((stem, _)) => format!("{stem}.svm"),
                None => format!("{src}.svm"),
            });
            let bytes = module.to_bytes();
            if let Err(e) = fs::write(&out, &bytes) {
                crash!(3: "failed to write '{out}':\n{e:?}");
            }
            println!("wrote {out} ({} bytes)", bytes.len());
        }
        Mode::Dump { src } => {
            let module = build(&src);
            module.dump_code(&mut stdout()).unwrap();
            module.dump_pool(&mut stdout()).unwrap();
        }
        Mode::Run { src, method } => {
            let module = build(&src);
            match module.execute(&method) {
                Ok(locals) => for (slot, value) in locals.iter().enumerate() {
                    if let Some(value) = value {
                        println!("{slot:>4}: {value:?}");
                    }
                }
                Err(e) => crash!(4: "runtime error in '{method}':\n{e:?}"),
            }
        }
    }
}
