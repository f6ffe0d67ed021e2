use crate::bytecode::Module;
use crate::process::*;

use super::build;

#[test]
fn test_proc_sub_semantics() {
    // the subtract statement computes literal - existing, not existing - literal
    let module = build("void main():\n\tx = 10\n\tx - 3\n");
    let locals = module.execute("main").unwrap();
    assert_eq!(locals, vec![Some(Value::Int(-7))]);
}

#[test]
fn test_proc_arith_ops() {
    let module = build("void main():\n\tx = 10\n\tx + 5\n");
    assert_eq!(module.execute("main").unwrap()[0], Some(Value::Int(15)));

    let module = build("void main():\n\tx = 10\n\tx * 3\n");
    assert_eq!(module.execute("main").unwrap()[0], Some(Value::Int(30)));

    // division keeps the same operand order as subtraction: literal / existing
    let module = build("void main():\n\tx = 10\n\tx / 40\n");
    assert_eq!(module.execute("main").unwrap()[0], Some(Value::Int(4)));
}

#[test]
fn test_proc_typed_values() {
    let module = build("void main():\n\tx = 10L\n\tx - 3\n");
    assert_eq!(module.execute("main").unwrap(), vec![Some(Value::Long(-7))]);

    let module = build("void main():\n\tf = 2.5\n\tf * 4\n");
    assert_eq!(module.execute("main").unwrap(), vec![Some(Value::Float(10.0))]);
}

#[test]
fn test_proc_divide_by_zero() {
    let module = build("void main():\n\tx = 0\n\tx / 5\n");
    assert_eq!(module.execute("main").unwrap_err(), ExecError::DivideByZero);

    // float division by zero is not an error
    let module = build("void main():\n\tf = 0.0\n\tf / 5\n");
    assert_eq!(module.execute("main").unwrap(), vec![Some(Value::Float(f64::INFINITY))]);
}

#[test]
fn test_proc_calls() {
    // callee frames get their own locals; only the entry frame's state is observable
    let src = "void main():\n\tx = 1\n\thelper()\n\tx + 1\n\nvoid helper():\n\ty = 5\n\ty * 9\n";
    let module = build(src);
    let locals = module.execute("main").unwrap();
    assert_eq!(locals, vec![Some(Value::Int(2))]);

    let locals = module.execute("helper").unwrap();
    assert_eq!(locals, vec![Some(Value::Int(45))]);

    let module = build("void main():\n\tnope()\n");
    assert_eq!(module.execute("main").unwrap_err(), ExecError::UnknownMethod { name: "nope".into() });
}

#[test]
fn test_proc_uninitialized_param() {
    // parameters reserve slots but nothing fills them without a caller
    let module = build("void main(int a):\n\ta + 1\n");
    assert_eq!(module.execute("main").unwrap_err(), ExecError::UninitializedLocal { slot: 0 });
}

#[test]
fn test_proc_entry_lookup() {
    let module = build("void main():\n\tx = 1\n");
    assert_eq!(Process::new(&module, "nope").err(), Some(ExecError::UnknownMethod { name: "nope".into() }));

    let mut proc = Process::new(&module, "main").unwrap();
    let mut steps = 0;
    let locals = loop {
        match proc.step().unwrap() {
            StepResult::Normal => steps += 1,
            StepResult::Terminate { locals } => break locals,
        }
    };
    assert_eq!(steps, 2); // push + store, then the terminating return
    assert_eq!(locals, vec![Some(Value::Int(1))]);
}

#[test]
fn test_proc_runs_deserialized_module() {
    let bytes = build("void main():\n\tx = 10\n\tx - 3\n").to_bytes();
    let module = Module::from_bytes(&bytes).unwrap();
    assert_eq!(module.execute("main").unwrap(), vec![Some(Value::Int(-7))]);
}
