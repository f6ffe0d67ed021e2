use crate::bytecode::Module;

mod compile;
mod process;

fn build(src: &str) -> Module {
    match Module::compile(src) {
        Ok(x) => x,
        Err(e) => panic!("failed to compile test unit: {e:?}\n{src}"),
    }
}
