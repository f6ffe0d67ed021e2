use clap::Parser;

use slate_vm::cli::{run_with, Mode};

fn main() {
    run_with(Mode::parse());
}
