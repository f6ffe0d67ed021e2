use crate::ast::*;
use crate::bytecode::*;
use crate::parser::*;
use crate::lexer::LexError;

use super::build;

#[test]
fn test_block_scope_codegen() {
    let mut tree = BlockTree::new();
    let method = tree.add_child(tree.root(), Block::method("main", vec![])).unwrap();
    tree.add_child(method, Block::declare("x", Type::Int, "10")).unwrap();
    tree.add_child(method, Block::arith("x", ArithOp::Sub, "3")).unwrap();
    tree.allocate_slots().unwrap();

    let ins = generate(&tree, method).unwrap();
    assert_eq!(ins, &[
        Instruction::PushInt { value: 10 },
        Instruction::StoreInt { slot: 0 },
        Instruction::PushInt { value: 3 },
        Instruction::LoadInt { slot: 0 },
        Instruction::IntOp { op: ArithOp::Sub },
        Instruction::StoreInt { slot: 0 },
        Instruction::Return,
    ]);
}

#[test]
fn test_parse_unit_structure() {
    let src = "void main():\n\tx = 10\n\tx - 3\n\nvoid helper():\n\ty = 2.5\n";
    let tree = ParserRegistry::default().parse_unit(src).unwrap();

    let methods = tree.children(tree.root()).to_vec();
    assert_eq!(methods.len(), 2);
    assert_eq!(tree.get(methods[0]).name, "main");
    assert_eq!(tree.get(methods[1]).name, "helper");
    assert!(tree.get(methods[0]).is_container());

    let stmts = tree.children(methods[0]).to_vec();
    assert_eq!(stmts.len(), 2);
    assert_eq!(tree.get(stmts[0]).kind, BlockKind::Declare);
    assert_eq!(tree.get(stmts[0]).value.as_deref(), Some("10"));
    assert_eq!(tree.get(stmts[1]).kind, BlockKind::Arith { op: ArithOp::Sub });
    assert!(!tree.get(stmts[1]).is_container());
    assert!(!tree.get(stmts[1]).is_variable());

    assert_eq!(tree.ancestor_chain(stmts[1]), vec![tree.root(), methods[0], stmts[1]]);
    assert_eq!(tree.parent(methods[0]), Some(tree.root()));
    assert_eq!(tree.parent(tree.root()), None);
}

#[test]
fn test_parser_precedence() {
    // `x = 10` matches the int, long and float rules; registration order decides
    let src = "void main():\n\tx = 10\n";

    let tree = ParserRegistry::default().parse_unit(src).unwrap();
    let method = tree.children(tree.root())[0];
    let decl = tree.children(method)[0];
    assert_eq!(tree.get(decl).kind, BlockKind::Declare);
    assert_eq!(tree.get(decl).ty, Type::Int);

    let reordered = ParserRegistry::with(vec![
        Box::new(MethodParser),
        Box::new(FloatParser),
        Box::new(IntParser),
    ]);
    let tree = reordered.parse_unit(src).unwrap();
    let method = tree.children(tree.root())[0];
    let decl = tree.children(method)[0];
    assert_eq!(tree.get(decl).ty, Type::Float);
}

#[test]
fn test_declare_suffixes() {
    let src = "void main():\n\ta = 10\n\tb = 10L\n\tc = 2.5\n\td = 2f\n";
    let tree = ParserRegistry::default().parse_unit(src).unwrap();
    let method = tree.children(tree.root())[0];

    let types: Vec<_> = tree.children(method).iter().map(|&id| tree.get(id).ty).collect();
    assert_eq!(types, vec![Type::Int, Type::Long, Type::Float, Type::Float]);
    let values: Vec<_> = tree.children(method).iter().map(|&id| tree.get(id).value.clone().unwrap()).collect();
    assert_eq!(values, vec!["10", "10", "2.5", "2"]);
}

#[test]
fn test_slot_allocation_order() {
    let src = "void main(int a):\n\tx = 10\n\ty = 2\n\tz = 3L\n\tx - 1\n";
    let mut tree = ParserRegistry::default().parse_unit(src).unwrap();
    tree.allocate_slots().unwrap();

    let method = tree.children(tree.root())[0];
    let stmts = tree.children(method).to_vec();

    // declarations take strictly increasing slots starting after the reserved parameter slot
    let slots: Vec<_> = stmts[..3].iter().map(|&id| tree.get(id).slot.unwrap()).collect();
    assert_eq!(slots, vec![1, 2, 3]);

    // the arithmetic statement resolves to its target's slot and type
    assert_eq!(tree.get(stmts[3]).slot, Some(1));
    assert_eq!(tree.get(stmts[3]).ty, Type::Int);

    // re-running allocation over an identical tree yields identical numbering
    let mut again = ParserRegistry::default().parse_unit(src).unwrap();
    again.allocate_slots().unwrap();
    let method = again.children(again.root())[0];
    let slots2: Vec<_> = again.children(method)[..3].iter().map(|&id| again.get(id).slot.unwrap()).collect();
    assert_eq!(slots, slots2);
}

#[test]
fn test_slot_shadowing_resolves_most_recent() {
    let src = "void main():\n\tx = 1\n\tx = 2\n\tx - 3\n";
    let mut tree = ParserRegistry::default().parse_unit(src).unwrap();
    tree.allocate_slots().unwrap();

    let method = tree.children(tree.root())[0];
    let stmts = tree.children(method).to_vec();
    assert_eq!(tree.get(stmts[0]).slot, Some(0));
    assert_eq!(tree.get(stmts[1]).slot, Some(1));
    assert_eq!(tree.get(stmts[2]).slot, Some(1));
}

#[test]
fn test_assign_slot_rejects_non_variable() {
    let mut tree = BlockTree::new();
    let method = tree.add_child(tree.root(), Block::method("main", vec![])).unwrap();
    let arith = tree.add_child(method, Block::arith("x", ArithOp::Add, "1")).unwrap();

    assert_eq!(tree.assign_slot(arith, 0), Err(AllocationError::NotAVariable { name: "x".into() }));
    assert_eq!(tree.assign_slot(method, 0), Err(AllocationError::NotAVariable { name: "main".into() }));
}

#[test]
fn test_unknown_arith_target() {
    let src = "void main():\n\ty - 3\n";
    match Module::compile(src) {
        Err(CompileError::Allocation { error: AllocationError::UnknownTarget { method, name } }) => {
            assert_eq!(method, "main");
            assert_eq!(name, "y");
        }
        x => panic!("{x:?}"),
    }
}

#[test]
fn test_add_child_contract() {
    let mut tree = BlockTree::new();
    let method = tree.add_child(tree.root(), Block::method("main", vec![])).unwrap();
    let decl = tree.add_child(method, Block::declare("x", Type::Int, "1")).unwrap();

    assert_eq!(tree.add_child(decl, Block::call("f")).unwrap_err(), TreeError::NotAContainer { parent: decl });
    assert_eq!(tree.children(decl).len(), 0);
}

#[test]
fn test_error_locality() {
    let src = "void main():\n\tx = 10\n\twat wat wat\n\tx - 3\n";
    match Module::compile(src) {
        Err(CompileError::Parse { error: ParseError::UnmatchedLine { line } }) => assert_eq!(line, 3),
        x => panic!("{x:?}"),
    }

    let src = "void main():\n\tx = #\n";
    match Module::compile(src) {
        Err(CompileError::Parse { error: ParseError::Lex { line, error } }) => {
            assert_eq!(line, 2);
            assert_eq!(error, LexError::UnknownSymbol { symbol: '#', column: 4 });
        }
        x => panic!("{x:?}"),
    }
}

#[test]
fn test_placement_errors() {
    match Module::compile("x = 10\n") {
        Err(CompileError::Parse { error: ParseError::StatementOutsideMethod { line: 1 } }) => (),
        x => panic!("{x:?}"),
    }
    match Module::compile("void main():\n\tvoid inner():\n") {
        Err(CompileError::Parse { error: ParseError::NestedMethod { line: 2 } }) => (),
        x => panic!("{x:?}"),
    }
    match Module::compile("void main():\n\t\t\tx = 1\n") {
        Err(CompileError::Parse { error: ParseError::BadIndent { line: 2 } }) => (),
        x => panic!("{x:?}"),
    }
    match Module::compile("void main():\n\tx = 1\n\t\ty = 2\n") {
        Err(CompileError::Parse { error: ParseError::BadIndent { line: 3 } }) => (),
        x => panic!("{x:?}"),
    }
}

#[test]
fn test_type_mismatch() {
    let mut tree = BlockTree::new();
    let method = tree.add_child(tree.root(), Block::method("main", vec![])).unwrap();
    tree.add_child(method, Block::declare("x", Type::Int, "2.5")).unwrap();

    match Module::compile_tree(tree) {
        Err(CompileError::TypeMismatch { name, declared, literal }) => {
            assert_eq!(name, "x");
            assert_eq!(declared, Type::Int);
            assert_eq!(literal, "2.5");
        }
        x => panic!("{x:?}"),
    }
}

#[test]
fn test_unresolved_slot_is_fatal() {
    let mut tree = BlockTree::new();
    let method = tree.add_child(tree.root(), Block::method("main", vec![])).unwrap();
    tree.add_child(method, Block::declare("x", Type::Int, "10")).unwrap();

    // code generation without the allocator pass is a pipeline-ordering bug
    match generate(&tree, method) {
        Err(CompileError::UnresolvedSlot { name }) => assert_eq!(name, "x"),
        x => panic!("{x:?}"),
    }
}

const RICH_SRC: &str = "\
void main(int seed):
\tx = 10
\tx - 3
\ty = 5L
\ty * 2
\tf = 2.5
\tf + 1
\thelper()
\thelper()

void helper():
\tz = 10
\tz / 40
";

#[test]
fn test_determinism() {
    let a = build(RICH_SRC).to_bytes();
    let b = build(RICH_SRC).to_bytes();
    assert_eq!(a, b);
}

#[test]
fn test_instruction_round_trip() {
    let registry = ParserRegistry::default();
    let mut tree = registry.parse_unit(RICH_SRC).unwrap();
    tree.allocate_slots().unwrap();

    let module = build(RICH_SRC);
    let methods = tree.children(tree.root()).to_vec();
    assert_eq!(methods.len(), module.methods().len());
    for (i, &m) in methods.iter().enumerate() {
        assert_eq!(module.disassemble(i), generate(&tree, m).unwrap(), "method {}", module.method_name(i));
    }
}

#[test]
fn test_container_round_trip() {
    let module = build(RICH_SRC);
    let bytes = module.to_bytes();

    let back = Module::from_bytes(&bytes).unwrap();
    assert_eq!(back.to_bytes(), bytes);
    assert_eq!(back.constants(), module.constants());
    assert_eq!(back.methods().len(), module.methods().len());
    for i in 0..module.methods().len() {
        assert_eq!(back.method_name(i), module.method_name(i));
        assert_eq!(back.method_descriptor(i), module.method_descriptor(i));
        assert_eq!(back.methods()[i].max_stack(), module.methods()[i].max_stack());
        assert_eq!(back.methods()[i].max_locals(), module.methods()[i].max_locals());
        assert_eq!(back.disassemble(i), module.disassemble(i));
    }
}

#[test]
fn test_load_errors() {
    let bytes = build(RICH_SRC).to_bytes();

    let mut bad = bytes.clone();
    bad[0] ^= 0xff;
    assert_eq!(Module::from_bytes(&bad).unwrap_err(), LoadError::WrongFingerprint);

    // the version varint sits directly after the 16-byte tag
    let mut bad = bytes.clone();
    bad[16] = 0x02;
    assert_eq!(Module::from_bytes(&bad).unwrap_err(), LoadError::UnsupportedVersion { found: 2 });

    assert_eq!(Module::from_bytes(&bytes[..10]).unwrap_err(), LoadError::Truncated);
    assert_eq!(Module::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err(), LoadError::Truncated);
}

#[test]
fn test_constant_dedup() {
    // 10 is declared in two methods, helper is referenced twice and declared once
    let module = build(RICH_SRC);

    let ints = module.constants().iter().filter(|c| matches!(c, Constant::Int(10))).count();
    assert_eq!(ints, 1);

    let helpers = (0..module.constants().len())
        .filter(|&i| matches!(module.constants()[i], Constant::Utf8 { .. }) && module.utf8(i) == "helper")
        .count();
    assert_eq!(helpers, 1);

    let call_descriptors = (0..module.constants().len())
        .filter(|&i| matches!(module.constants()[i], Constant::Utf8 { .. }) && module.utf8(i) == "()V")
        .count();
    assert_eq!(call_descriptors, 1);

    let refs = module.constants().iter().filter(|c| matches!(c, Constant::MethodRef { .. })).count();
    assert_eq!(refs, 1);
}

#[test]
fn test_method_table() {
    let module = build(RICH_SRC);

    assert_eq!(module.methods().len(), 2);
    assert_eq!(module.method_name(0), "main");
    assert_eq!(module.method_descriptor(0), "(I)V");
    assert_eq!(module.method_name(1), "helper");
    assert_eq!(module.method_descriptor(1), "()V");
    assert_eq!(module.method_index("helper"), Some(1));
    assert_eq!(module.method_index("nope"), None);

    // main: parameter slot + x, y, f; deepest stack is literal + loaded slot value
    assert_eq!(module.methods()[0].max_locals(), 4);
    assert_eq!(module.methods()[0].max_stack(), 2);
    assert_eq!(module.methods()[1].max_locals(), 1);
    assert_eq!(module.methods()[1].max_stack(), 2);
}

#[test]
fn test_typed_codegen() {
    let src = "void main():\n\tx = 5L\n\tx * 3\n\tf = 1.5\n\tf + 2\n";
    let registry = ParserRegistry::default();
    let mut tree = registry.parse_unit(src).unwrap();
    tree.allocate_slots().unwrap();

    let method = tree.children(tree.root())[0];
    let ins = generate(&tree, method).unwrap();
    assert_eq!(ins, &[
        Instruction::PushLong { value: 5 },
        Instruction::StoreLong { slot: 0 },
        Instruction::PushLong { value: 3 },
        Instruction::LoadLong { slot: 0 },
        Instruction::LongOp { op: ArithOp::Mul },
        Instruction::StoreLong { slot: 0 },
        Instruction::PushFloat { value: 1.5 },
        Instruction::StoreFloat { slot: 1 },
        Instruction::PushFloat { value: 2.0 },
        Instruction::LoadFloat { slot: 1 },
        Instruction::FloatOp { op: ArithOp::Add },
        Instruction::StoreFloat { slot: 1 },
        Instruction::Return,
    ]);
}

#[test]
fn test_dumps_render() {
    let module = build(RICH_SRC);
    let mut code = vec![];
    let mut pool = vec![];
    module.dump_code(&mut code).unwrap();
    module.dump_pool(&mut pool).unwrap();

    let code = String::from_utf8(code).unwrap();
    let pool = String::from_utf8(pool).unwrap();
    assert!(code.contains("main(I)V"));
    assert!(code.contains("Return"));
    assert!(pool.contains("Utf8(\"helper\")"));
    assert!(pool.contains("Int(10)"));
}
