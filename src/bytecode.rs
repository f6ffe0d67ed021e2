//! Tools for compiling source text into an executable [`Module`].
//!
//! Compilation is strictly staged: [`crate::parser`] builds the block tree, the tree
//! allocates local slots, [`generate`] flattens each method into an ordered instruction
//! list, and the assembler packs those lists plus a deduplicated constant table into the
//! final container. No stage begins before the prior stage completes, and no stage revisits
//! an earlier stage's output.
//!
//! To compile a source unit, you can use [`Module::compile`].

use std::collections::BTreeMap;
use std::io::{self, Write};

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

use bin_pool::BinPool;
use monostate::MustBeU128;
use num_traits::FromPrimitive;

use crate::ast::*;
use crate::parser::{ParserRegistry, ParseError};
use crate::meta::*;

/// Number of bytes to display on each line of a hex dump
const BYTES_PER_LINE: usize = 10;

/// Error type produced while compiling one unit.
///
/// Any of these aborts the entire unit; a unit either fully compiles or produces nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Parse { error: ParseError },
    Allocation { error: AllocationError },
    /// A literal's text does not parse as the declared type of its block.
    /// This is the only compile-time type check the pipeline performs.
    TypeMismatch { name: String, declared: Type, literal: String },
    /// A slot-consuming block reached code generation without an assigned slot,
    /// meaning the allocator was skipped or the tree was mutated after allocation.
    UnresolvedSlot { name: String },
}
impl From<ParseError> for CompileError { fn from(error: ParseError) -> Self { Self::Parse { error } } }
impl From<AllocationError> for CompileError { fn from(error: AllocationError) -> Self { Self::Allocation { error } } }

/// Error type produced when deserializing a [`Module`] container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The header tag is not [`FINGERPRINT`].
    WrongFingerprint,
    UnsupportedVersion { found: u32 },
    BadConstantKind { kind: u8 },
    /// A constant or method header referenced a pool or data range that does not exist.
    BadReference { index: usize },
    Truncated,
}

/// One instruction of the target stack machine.
///
/// Instructions are typed: the int, long and float forms of a push, load, store or
/// arithmetic operation are distinct opcodes, never interchangeable. Emission order is
/// execution order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction<'a> {
    /// Pushes 1 int constant onto the value stack.
    PushInt { value: i32 },
    /// Pushes 1 long constant onto the value stack.
    PushLong { value: i64 },
    /// Pushes 1 float constant onto the value stack.
    PushFloat { value: f64 },

    /// Pushes the int held in the given local slot onto the value stack.
    LoadInt { slot: usize },
    /// Pushes the long held in the given local slot onto the value stack.
    LoadLong { slot: usize },
    /// Pushes the float held in the given local slot onto the value stack.
    LoadFloat { slot: usize },

    /// Consumes 1 int from the value stack and stores it into the given local slot.
    StoreInt { slot: usize },
    /// Consumes 1 long from the value stack and stores it into the given local slot.
    StoreLong { slot: usize },
    /// Consumes 1 float from the value stack and stores it into the given local slot.
    StoreFloat { slot: usize },

    /// Consumes 2 ints, `b` and then `a`, from the value stack and pushes `a op b`.
    IntOp { op: ArithOp },
    /// Consumes 2 longs, `b` and then `a`, from the value stack and pushes `a op b`.
    LongOp { op: ArithOp },
    /// Consumes 2 floats, `b` and then `a`, from the value stack and pushes `a op b`.
    FloatOp { op: ArithOp },

    /// Transfers control to the start of the named method of the same module.
    /// Arguments, if any, are already materialized on the value stack.
    Call { method: &'a str },
    /// Returns from the current method.
    Return,
}
impl Instruction<'_> {
    /// The instruction's `(pops, pushes)` effect on the operand stack.
    fn stack_effect(&self) -> (usize, usize) {
        match self {
            Instruction::PushInt { .. } | Instruction::PushLong { .. } | Instruction::PushFloat { .. } => (0, 1),
            Instruction::LoadInt { .. } | Instruction::LoadLong { .. } | Instruction::LoadFloat { .. } => (0, 1),
            Instruction::StoreInt { .. } | Instruction::StoreLong { .. } | Instruction::StoreFloat { .. } => (1, 0),
            Instruction::IntOp { .. } | Instruction::LongOp { .. } | Instruction::FloatOp { .. } => (2, 1),
            Instruction::Call { .. } | Instruction::Return => (0, 0),
        }
    }
    /// The local slot the instruction touches, if any.
    fn slot(&self) -> Option<usize> {
        match self {
            Instruction::LoadInt { slot } | Instruction::LoadLong { slot } | Instruction::LoadFloat { slot }
            | Instruction::StoreInt { slot } | Instruction::StoreLong { slot } | Instruction::StoreFloat { slot } => Some(*slot),
            _ => None,
        }
    }
}

// encodes values as a sequence of bytes of form [1: next][7: bits] in little-endian order.
fn encode_u64(mut val: u64, out: &mut Vec<u8>) {
    loop {
        let b = (val & 0x7f) as u8;
        val >>= 7;
        if val == 0 {
            out.push(b);
            return;
        }
        out.push(b | 0x80);
    }
}
fn decode_u64(data: &[u8], start: usize) -> (u64, usize) {
    let (mut val, mut aft) = (0, start);
    for &b in &data[start..] {
        aft += 1;
        if b & 0x80 == 0 { break }
    }
    for &b in data[start..aft].iter().rev() {
        val = (val << 7) | (b & 0x7f) as u64;
    }
    (val, aft)
}

// stores the value shifted up by one bit with a bitwise-not flag in the low order bit,
// so that small magnitudes of either sign encode small.
fn encode_i64(val: i64, out: &mut Vec<u8>) {
    let v = (val as u64) << 1;
    encode_u64(if val >= 0 { v } else { !v }, out)
}
fn decode_i64(data: &[u8], start: usize) -> (i64, usize) {
    let (raw, aft) = decode_u64(data, start);
    let v = raw >> 1;
    (if raw & 1 == 0 { v as i64 } else { !v as i64 }, aft)
}

// byte-swapped so that the payload of common values lands in the low bytes and encodes small.
fn encode_f64(val: f64, out: &mut Vec<u8>) {
    encode_u64(val.to_bits().swap_bytes(), out)
}
fn decode_f64(data: &[u8], start: usize) -> (f64, usize) {
    let (v, aft) = decode_u64(data, start);
    (f64::from_bits(v.swap_bytes()), aft)
}

#[test]
fn test_varint_u64() {
    let mut buf = vec![];
    let tests = [
        (0u64,   [0x00].as_slice()),
        (1,      [0x01].as_slice()),
        (0x53,   [0x53].as_slice()),
        (0x7f,   [0x7f].as_slice()),
        (0x80,   [0x80, 0x01].as_slice()),
        (0xff,   [0xff, 0x01].as_slice()),
        (0x3fff, [0xff, 0x7f].as_slice()),
        (0x4000, [0x80, 0x80, 0x01].as_slice()),
    ];
    for (v, expect) in tests {
        buf.clear();
        encode_u64(v, &mut buf);
        assert_eq!(buf, expect, "value: {v:#x}");
        assert_eq!(decode_u64(&buf, 0), (v, expect.len()));
    }
    for v in [0, 1, 0x7f, 0x80, 0x12345, u64::MAX >> 1, u64::MAX] {
        buf.clear();
        encode_u64(v, &mut buf);
        assert_eq!(decode_u64(&buf, 0), (v, buf.len()));
    }
}

#[test]
fn test_varint_i64() {
    let mut buf = vec![];
    let tests = [
        (0i64, [0x00].as_slice()),
        (-1,   [0x01].as_slice()),
        (1,    [0x02].as_slice()),
        (-2,   [0x03].as_slice()),
        (2,    [0x04].as_slice()),
    ];
    for (v, expect) in tests {
        buf.clear();
        encode_i64(v, &mut buf);
        assert_eq!(buf, expect, "value: {v}");
    }
    for v in [0, 1, -1, 10, -7, 0x543245, -0x376224, i64::MAX, i64::MIN, i32::MAX as i64, i32::MIN as i64] {
        buf.clear();
        encode_i64(v, &mut buf);
        assert_eq!(decode_i64(&buf, 0), (v, buf.len()));
    }
}

#[test]
fn test_varint_f64() {
    let mut buf = vec![];
    for v in [0.0, 1.0, -1.0, 2.5, -0.125, 1e300, f64::MIN_POSITIVE, f64::INFINITY] {
        buf.clear();
        encode_f64(v, &mut buf);
        assert_eq!(decode_f64(&buf, 0), (v, buf.len()));
    }
}

/// One deduplicated constant-table entry.
///
/// No two entries of one [`Module`] hold an identical kind and payload.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f64),
    /// A name or type-descriptor string, addressed as a range of the module's data segment.
    Utf8 { pos: usize, len: usize },
    /// A symbolic reference to a method, by name and type descriptor.
    MethodRef { name: usize, descriptor: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PoolKey {
    Int(i32),
    Long(i64),
    Float(u64),
    Utf8(String),
    MethodRef(usize, usize),
}
enum PoolEntry {
    Int(i32),
    Long(i64),
    Float(f64),
    Utf8 { slice: usize, len: usize },
    MethodRef { name: usize, descriptor: usize },
}

/// The constant table under construction. Interning a value that is already present
/// returns the existing index rather than inserting a duplicate.
#[derive(Default)]
struct ConstPoolBuilder {
    entries: Vec<PoolEntry>,
    lookup: BTreeMap<PoolKey, usize>,
    strings: BinPool,
}
impl ConstPoolBuilder {
    fn intern(&mut self, key: PoolKey, entry: impl FnOnce(&mut BinPool) -> PoolEntry) -> usize {
        if let Some(&idx) = self.lookup.get(&key) {
            return idx;
        }
        let idx = self.entries.len();
        self.entries.push(entry(&mut self.strings));
        self.lookup.insert(key, idx);
        idx
    }
    fn int(&mut self, value: i32) -> usize {
        self.intern(PoolKey::Int(value), |_| PoolEntry::Int(value))
    }
    fn long(&mut self, value: i64) -> usize {
        self.intern(PoolKey::Long(value), |_| PoolEntry::Long(value))
    }
    fn float(&mut self, value: f64) -> usize {
        self.intern(PoolKey::Float(value.to_bits()), |_| PoolEntry::Float(value))
    }
    fn utf8(&mut self, value: &str) -> usize {
        self.intern(PoolKey::Utf8(value.to_owned()), |strings| PoolEntry::Utf8 { slice: strings.add(value.as_bytes()), len: value.len() })
    }
    fn method_ref(&mut self, name: &str, descriptor: &str) -> usize {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.intern(PoolKey::MethodRef(name, descriptor), |_| PoolEntry::MethodRef { name, descriptor })
    }
    /// Bakes the table: flattens the string pool into one data segment and rewrites
    /// string entries as ranges of it.
    fn finish(self) -> (Box<[Constant]>, Box<[u8]>) {
        let backing = self.strings.into_backing();
        let mut data = Vec::with_capacity(backing.0.iter().map(Vec::len).sum());
        let mut backing_pos = Vec::with_capacity(backing.0.len());
        for src in backing.0.iter() {
            backing_pos.push(data.len());
            data.extend_from_slice(src);
        }
        let pool = self.entries.into_iter().map(|entry| match entry {
            PoolEntry::Int(v) => Constant::Int(v),
            PoolEntry::Long(v) => Constant::Long(v),
            PoolEntry::Float(v) => Constant::Float(v),
            PoolEntry::Utf8 { slice, len } => {
                let slice = &backing.1[slice];
                Constant::Utf8 { pos: backing_pos[slice.src] + slice.start, len }
            }
            PoolEntry::MethodRef { name, descriptor } => Constant::MethodRef { name, descriptor },
        }).collect();
        (pool, data.into_boxed_slice())
    }
}

impl<'a> Instruction<'a> {
    /// Appends the instruction's binary form to `code`, interning operands into the pool.
    fn append(&self, code: &mut Vec<u8>, pool: &mut ConstPoolBuilder) {
        macro_rules! append_prefixed {
            ($op:literal) => { code.push($op) };
            ($op:literal : idx $idx:expr) => {{ code.push($op); encode_u64($idx as u64, code); }};
            ($op:literal : op $val:expr) => {{ code.push($op); code.push($val as u8); }};
        }
        match self {
            Instruction::PushInt { value } => { let idx = pool.int(*value); append_prefixed!(0: idx idx) }
            Instruction::PushLong { value } => { let idx = pool.long(*value); append_prefixed!(1: idx idx) }
            Instruction::PushFloat { value } => { let idx = pool.float(*value); append_prefixed!(2: idx idx) }

            Instruction::LoadInt { slot } => append_prefixed!(3: idx *slot),
            Instruction::LoadLong { slot } => append_prefixed!(4: idx *slot),
            Instruction::LoadFloat { slot } => append_prefixed!(5: idx *slot),

            Instruction::StoreInt { slot } => append_prefixed!(6: idx *slot),
            Instruction::StoreLong { slot } => append_prefixed!(7: idx *slot),
            Instruction::StoreFloat { slot } => append_prefixed!(8: idx *slot),

            Instruction::IntOp { op } => append_prefixed!(9: op *op),
            Instruction::LongOp { op } => append_prefixed!(10: op *op),
            Instruction::FloatOp { op } => append_prefixed!(11: op *op),

            Instruction::Call { method } => { let idx = pool.method_ref(method, "()V"); append_prefixed!(12: idx idx) }
            Instruction::Return => append_prefixed!(13),
        }
    }
    /// Reads one instruction from `code` starting at `start`.
    /// Returns the instruction and the position of the first byte after it.
    ///
    /// The stream is trusted to have been produced by [`Instruction::append`] against the
    /// same pool; a malformed stream is a logic error, not an input condition.
    pub(crate) fn read(code: &[u8], pool: &'a [Constant], data: &'a [u8], start: usize) -> (Self, usize) {
        fn operand(code: &[u8], start: usize) -> (usize, usize) {
            let (v, aft) = decode_u64(code, start);
            (v as usize, aft)
        }
        fn utf8<'b>(pool: &[Constant], data: &'b [u8], idx: usize) -> &'b str {
            match pool[idx] {
                Constant::Utf8 { pos, len } => std::str::from_utf8(&data[pos..pos + len]).unwrap(),
                _ => unreachable!(),
            }
        }
        let opcode = code[start];
        match opcode {
            0 | 1 | 2 => {
                let (idx, aft) = operand(code, start + 1);
                let ins = match (opcode, pool[idx]) {
                    (0, Constant::Int(value)) => Instruction::PushInt { value },
                    (1, Constant::Long(value)) => Instruction::PushLong { value },
                    (2, Constant::Float(value)) => Instruction::PushFloat { value },
                    _ => unreachable!(),
                };
                (ins, aft)
            }
            3 | 4 | 5 => {
                let (slot, aft) = operand(code, start + 1);
                let ins = match opcode {
                    3 => Instruction::LoadInt { slot },
                    4 => Instruction::LoadLong { slot },
                    _ => Instruction::LoadFloat { slot },
                };
                (ins, aft)
            }
            6 | 7 | 8 => {
                let (slot, aft) = operand(code, start + 1);
                let ins = match opcode {
                    6 => Instruction::StoreInt { slot },
                    7 => Instruction::StoreLong { slot },
                    _ => Instruction::StoreFloat { slot },
                };
                (ins, aft)
            }
            9 | 10 | 11 => {
                let op = ArithOp::from_u8(code[start + 1]).unwrap();
                let ins = match opcode {
                    9 => Instruction::IntOp { op },
                    10 => Instruction::LongOp { op },
                    _ => Instruction::FloatOp { op },
                };
                (ins, start + 2)
            }
            12 => {
                let (idx, aft) = operand(code, start + 1);
                match pool[idx] {
                    Constant::MethodRef { name, .. } => (Instruction::Call { method: utf8(pool, data, name) }, aft),
                    _ => unreachable!(),
                }
            }
            13 => (Instruction::Return, start + 1),
            _ => unreachable!(),
        }
    }
}

/// Per-method code generator.
///
/// Every block contributes up to three instruction sequences: an opening emitted before any
/// child, a body (for containers, the concatenated triples of the children in insertion
/// order; for leaves, the construct's own effect), and a closing emitted after all children.
struct CodeBuilder<'a> {
    ins: Vec<Instruction<'a>>,
}
impl<'a> CodeBuilder<'a> {
    fn append_block(&mut self, tree: &'a BlockTree, id: BlockId) -> Result<(), CompileError> {
        self.append_opening(tree, id);
        if tree.get(id).is_container() {
            for &child in tree.children(id) {
                self.append_block(tree, child)?;
            }
        } else {
            self.append_body(tree, id)?;
        }
        self.append_closing(tree, id);
        Ok(())
    }
    fn append_opening(&mut self, _tree: &'a BlockTree, _id: BlockId) {
        // no construct in the current set contributes opening code
    }
    fn append_closing(&mut self, tree: &'a BlockTree, id: BlockId) {
        if let BlockKind::Method { .. } = tree.get(id).kind {
            self.ins.push(Instruction::Return);
        }
    }
    fn append_body(&mut self, tree: &'a BlockTree, id: BlockId) -> Result<(), CompileError> {
        let block = tree.get(id);
        match &block.kind {
            BlockKind::Declare => {
                let slot = slot_of(block)?;
                self.push_literal(block)?;
                self.ins.push(store_op(block, slot)?);
            }
            // operand order: the literal is pushed first (the deeper operand), then the
            // slot's current value, so a subtract computes `literal - existing`, not
            // `existing - literal`
            BlockKind::Arith { op } => {
                let slot = slot_of(block)?;
                self.push_literal(block)?;
                self.ins.push(load_op(block, slot)?);
                self.ins.push(arith_op(block, *op)?);
                self.ins.push(store_op(block, slot)?);
            }
            BlockKind::Call => self.ins.push(Instruction::Call { method: &block.name }),
            BlockKind::Unit | BlockKind::Method { .. } => unreachable!(),
        }
        Ok(())
    }
    /// Emits the typed push of a block's literal, parsing the literal text as the block's
    /// declared type. A literal that does not parse as that type is the fatal
    /// [`CompileError::TypeMismatch`].
    fn push_literal(&mut self, block: &'a Block) -> Result<(), CompileError> {
        let literal = block.value.as_deref().unwrap_or("");
        let ins = match block.ty {
            Type::Int => Instruction::PushInt { value: literal.parse().map_err(|_| type_mismatch(block))? },
            Type::Long => Instruction::PushLong { value: literal.parse().map_err(|_| type_mismatch(block))? },
            Type::Float => Instruction::PushFloat { value: literal.parse().map_err(|_| type_mismatch(block))? },
            Type::Void | Type::Reference => return Err(type_mismatch(block)),
        };
        self.ins.push(ins);
        Ok(())
    }
}

fn slot_of(block: &Block) -> Result<usize, CompileError> {
    block.slot.ok_or_else(|| CompileError::UnresolvedSlot { name: block.name.clone() })
}
fn type_mismatch(block: &Block) -> CompileError {
    CompileError::TypeMismatch {
        name: block.name.clone(),
        declared: block.ty,
        literal: block.value.clone().unwrap_or_default(),
    }
}
fn load_op<'a>(block: &Block, slot: usize) -> Result<Instruction<'a>, CompileError> {
    Ok(match block.ty {
        Type::Int => Instruction::LoadInt { slot },
        Type::Long => Instruction::LoadLong { slot },
        Type::Float => Instruction::LoadFloat { slot },
        Type::Void | Type::Reference => return Err(type_mismatch(block)),
    })
}
fn store_op<'a>(block: &Block, slot: usize) -> Result<Instruction<'a>, CompileError> {
    Ok(match block.ty {
        Type::Int => Instruction::StoreInt { slot },
        Type::Long => Instruction::StoreLong { slot },
        Type::Float => Instruction::StoreFloat { slot },
        Type::Void | Type::Reference => return Err(type_mismatch(block)),
    })
}
fn arith_op<'a>(block: &Block, op: ArithOp) -> Result<Instruction<'a>, CompileError> {
    Ok(match block.ty {
        Type::Int => Instruction::IntOp { op },
        Type::Long => Instruction::LongOp { op },
        Type::Float => Instruction::FloatOp { op },
        Type::Void | Type::Reference => return Err(type_mismatch(block)),
    })
}

/// Flattens one method block into its ordered instruction list.
///
/// Slots must already be allocated; a slot-consuming block without one fails with
/// [`CompileError::UnresolvedSlot`].
pub fn generate<'a>(tree: &'a BlockTree, method: BlockId) -> Result<Vec<Instruction<'a>>, CompileError> {
    debug_assert!(matches!(tree.get(method).kind, BlockKind::Method { .. }));
    let mut code = CodeBuilder { ins: vec![] };
    code.append_block(tree, method)?;
    Ok(code.ins)
}

fn method_descriptor(params: &[Param]) -> String {
    let mut res = String::with_capacity(params.len() + 3);
    res.push('(');
    for param in params {
        res.push(param.ty.descriptor_char());
    }
    res.push(')');
    res.push(Type::Void.descriptor_char());
    res
}

/// Computes the conservative operand-stack and local bounds of one instruction list:
/// the running maximum of cumulative push/pop effects, and `max(slot) + 1` (but never
/// less than the reserved parameter slots).
fn analyze(ins: &[Instruction], params: usize) -> (usize, usize) {
    let (mut depth, mut max_stack, mut max_locals) = (0usize, 0, params);
    for i in ins {
        let (pops, pushes) = i.stack_effect();
        debug_assert!(depth >= pops);
        depth = depth - pops + pushes;
        max_stack = max_stack.max(depth);
        if let Some(slot) = i.slot() {
            max_locals = max_locals.max(slot + 1);
        }
    }
    (max_stack, max_locals)
}

/// One compiled method of a [`Module`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug)]
pub struct MethodEntry {
    pub(crate) name: usize,
    pub(crate) descriptor: usize,
    pub(crate) max_stack: usize,
    pub(crate) max_locals: usize,
    pub(crate) code: Box<[u8]>,
}
impl MethodEntry {
    /// The method's raw instruction bytes.
    pub fn code(&self) -> &[u8] {
        &self.code
    }
    /// Conservative maximum operand-stack depth of the method.
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }
    /// Number of local slots the method uses, parameters included.
    pub fn max_locals(&self) -> usize {
        self.max_locals
    }
}

#[derive(Default)]
struct Assembler {
    pool: ConstPoolBuilder,
    methods: Vec<MethodEntry>,
}
impl Assembler {
    fn add_method(&mut self, name: &str, params: &[Param], ins: &[Instruction]) {
        let descriptor = method_descriptor(params);
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(&descriptor);
        let mut code = Vec::with_capacity(ins.len() * 2);
        for i in ins {
            i.append(&mut code, &mut self.pool);
        }
        let (max_stack, max_locals) = analyze(ins, params.len());
        self.methods.push(MethodEntry { name, descriptor, max_stack, max_locals, code: code.into_boxed_slice() });
    }
    fn finish(self) -> Module {
        let (pool, data) = self.pool.finish();
        Module { tag: Default::default(), pool, data, methods: self.methods.into_boxed_slice() }
    }
}

/// An assembled compilation unit: a fixed header tag, one deduplicated constant table with
/// its string data segment, and one entry per compiled method in source declaration order.
///
/// [`Process`](crate::process::Process) is an execution primitive that can be used to run a
/// compiled module. The binary form is produced by [`Module::to_bytes`] and read back by
/// [`Module::from_bytes`]; [`Module::dump_code`] and [`Module::dump_pool`] render
/// human-readable views of it.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug)]
pub struct Module {
    #[allow(dead_code)] tag: MustBeU128<FINGERPRINT>,

    pub(crate) pool: Box<[Constant]>,
    pub(crate) data: Box<[u8]>,
    pub(crate) methods: Box<[MethodEntry]>,
}
impl Module {
    /// Compiles one source unit with the language's standard parser registry.
    pub fn compile(src: &str) -> Result<Module, CompileError> {
        let registry = ParserRegistry::default();
        Self::compile_tree(registry.parse_unit(src)?)
    }
    /// Compiles an already-built block tree: allocates slots, generates code for every
    /// method under the root (in insertion order), and assembles the container.
    pub fn compile_tree(mut tree: BlockTree) -> Result<Module, CompileError> {
        tree.allocate_slots()?;
        let mut assembler = Assembler::default();
        for &id in tree.children(tree.root()) {
            let params = match &tree.get(id).kind {
                BlockKind::Method { params } => params.clone(),
                _ => continue,
            };
            let ins = generate(&tree, id)?;
            assembler.add_method(&tree.get(id).name, &params, &ins);
        }
        Ok(assembler.finish())
    }

    /// The deduplicated constant table.
    pub fn constants(&self) -> &[Constant] {
        &self.pool
    }
    /// Resolves a string constant.
    pub fn utf8(&self, index: usize) -> &str {
        match self.pool[index] {
            Constant::Utf8 { pos, len } => std::str::from_utf8(&self.data[pos..pos + len]).unwrap(),
            _ => panic!("constant {index} is not a string"),
        }
    }
    /// The compiled methods, in source declaration order.
    pub fn methods(&self) -> &[MethodEntry] {
        &self.methods
    }
    pub fn method_name(&self, index: usize) -> &str {
        self.utf8(self.methods[index].name)
    }
    pub fn method_descriptor(&self, index: usize) -> &str {
        self.utf8(self.methods[index].descriptor)
    }
    /// Index of the first method with the given name.
    pub fn method_index(&self, name: &str) -> Option<usize> {
        (0..self.methods.len()).find(|&i| self.method_name(i) == name)
    }
    /// Decodes one method's instruction bytes back into the instruction list the code
    /// generator emitted, opcode for opcode and operand for operand.
    pub fn disassemble(&self, method: usize) -> Vec<Instruction<'_>> {
        let code = &self.methods[method].code;
        let mut res = vec![];
        let mut pos = 0;
        while pos < code.len() {
            let (ins, aft) = Instruction::read(code, &self.pool, &self.data, pos);
            res.push(ins);
            pos = aft;
        }
        res
    }

    /// Serializes the module into its binary container form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.data.len() + self.methods.iter().map(|m| m.code.len()).sum::<usize>());
        out.extend_from_slice(&FINGERPRINT.to_le_bytes());
        encode_u64(FORMAT_VERSION as u64, &mut out);

        encode_u64(self.pool.len() as u64, &mut out);
        for c in self.pool.iter() {
            match *c {
                Constant::Int(v) => { out.push(0); encode_i64(v as i64, &mut out); }
                Constant::Long(v) => { out.push(1); encode_i64(v, &mut out); }
                Constant::Float(v) => { out.push(2); encode_f64(v, &mut out); }
                Constant::Utf8 { pos, len } => { out.push(3); encode_u64(pos as u64, &mut out); encode_u64(len as u64, &mut out); }
                Constant::MethodRef { name, descriptor } => { out.push(4); encode_u64(name as u64, &mut out); encode_u64(descriptor as u64, &mut out); }
            }
        }

        encode_u64(self.data.len() as u64, &mut out);
        out.extend_from_slice(&self.data);

        encode_u64(self.methods.len() as u64, &mut out);
        for m in self.methods.iter() {
            encode_u64(m.name as u64, &mut out);
            encode_u64(m.descriptor as u64, &mut out);
            encode_u64(m.max_stack as u64, &mut out);
            encode_u64(m.max_locals as u64, &mut out);
            encode_u64(m.code.len() as u64, &mut out);
            out.extend_from_slice(&m.code);
        }
        out
    }
    /// Deserializes a binary container produced by [`Module::to_bytes`].
    pub fn from_bytes(src: &[u8]) -> Result<Module, LoadError> {
        fn read_u64(src: &[u8], pos: &mut usize) -> Result<u64, LoadError> {
            if *pos >= src.len() { return Err(LoadError::Truncated) }
            let (v, aft) = decode_u64(src, *pos);
            if src[aft - 1] & 0x80 != 0 { return Err(LoadError::Truncated) }
            *pos = aft;
            Ok(v)
        }
        fn read_i64(src: &[u8], pos: &mut usize) -> Result<i64, LoadError> {
            if *pos >= src.len() { return Err(LoadError::Truncated) }
            let (v, aft) = decode_i64(src, *pos);
            if src[aft - 1] & 0x80 != 0 { return Err(LoadError::Truncated) }
            *pos = aft;
            Ok(v)
        }
        fn read_bytes<'b>(src: &'b [u8], pos: &mut usize, len: usize) -> Result<&'b [u8], LoadError> {
            let end = pos.checked_add(len).ok_or(LoadError::Truncated)?;
            let res = src.get(*pos..end).ok_or(LoadError::Truncated)?;
            *pos = end;
            Ok(res)
        }

        let mut pos = 0;
        let tag = u128::from_le_bytes(read_bytes(src, &mut pos, 16)?.try_into().unwrap());
        if tag != FINGERPRINT { return Err(LoadError::WrongFingerprint) }
        let version = read_u64(src, &mut pos)? as u32;
        if version != FORMAT_VERSION { return Err(LoadError::UnsupportedVersion { found: version }) }

        let pool_len = read_u64(src, &mut pos)? as usize;
        let mut pool = Vec::with_capacity(pool_len.min(1024));
        for _ in 0..pool_len {
            let kind = *src.get(pos).ok_or(LoadError::Truncated)?;
            pos += 1;
            pool.push(match kind {
                0 => Constant::Int(read_i64(src, &mut pos)? as i32),
                1 => Constant::Long(read_i64(src, &mut pos)?),
                2 => Constant::Float(f64::from_bits(read_u64(src, &mut pos)?.swap_bytes())),
                3 => {
                    let p = read_u64(src, &mut pos)? as usize;
                    let len = read_u64(src, &mut pos)? as usize;
                    Constant::Utf8 { pos: p, len }
                }
                4 => {
                    let name = read_u64(src, &mut pos)? as usize;
                    let descriptor = read_u64(src, &mut pos)? as usize;
                    Constant::MethodRef { name, descriptor }
                }
                kind => return Err(LoadError::BadConstantKind { kind }),
            });
        }

        let data_len = read_u64(src, &mut pos)? as usize;
        let data: Box<[u8]> = read_bytes(src, &mut pos, data_len)?.into();

        for (index, c) in pool.iter().enumerate() {
            let ok = match *c {
                Constant::Utf8 { pos, len } => pos.checked_add(len)
                    .and_then(|end| data.get(pos..end))
                    .map(|x| std::str::from_utf8(x).is_ok())
                    .unwrap_or(false),
                Constant::MethodRef { name, descriptor } => {
                    matches!(pool.get(name), Some(Constant::Utf8 { .. })) && matches!(pool.get(descriptor), Some(Constant::Utf8 { .. }))
                }
                _ => true,
            };
            if !ok { return Err(LoadError::BadReference { index }) }
        }

        let method_len = read_u64(src, &mut pos)? as usize;
        let mut methods = Vec::with_capacity(method_len.min(1024));
        for index in 0..method_len {
            let name = read_u64(src, &mut pos)? as usize;
            let descriptor = read_u64(src, &mut pos)? as usize;
            let max_stack = read_u64(src, &mut pos)? as usize;
            let max_locals = read_u64(src, &mut pos)? as usize;
            let code_len = read_u64(src, &mut pos)? as usize;
            let code: Box<[u8]> = read_bytes(src, &mut pos, code_len)?.into();
            if !matches!(pool.get(name), Some(Constant::Utf8 { .. })) || !matches!(pool.get(descriptor), Some(Constant::Utf8 { .. })) {
                return Err(LoadError::BadReference { index });
            }
            methods.push(MethodEntry { name, descriptor, max_stack, max_locals, code });
        }

        Ok(Module { tag: Default::default(), pool: pool.into(), data, methods: methods.into() })
    }

    /// Generates a hex dump of every method's code, including instructions and addresses.
    pub fn dump_code(&self, f: &mut dyn Write) -> io::Result<()> {
        for (index, method) in self.methods.iter().enumerate() {
            writeln!(f, "{}{}   stack={} locals={}", self.method_name(index), self.method_descriptor(index), method.max_stack, method.max_locals)?;
            let mut pos = 0;
            while pos < method.code.len() {
                let (ins, aft) = Instruction::read(&method.code, &self.pool, &self.data, pos);
                for (i, bytes) in method.code[pos..aft].chunks(BYTES_PER_LINE).enumerate() {
                    if i == 0 {
                        write!(f, "{pos:08}   ")?;
                    } else {
                        write!(f, "           ")?;
                    }

                    for &b in bytes {
                        write!(f, " {b:02x}")?;
                    }
                    for _ in bytes.len()..BYTES_PER_LINE {
                        write!(f, "   ")?;
                    }

                    if i == 0 {
                        write!(f, "    {ins:?}")?;
                    }
                    writeln!(f)?;
                }
                pos = aft;
            }
            writeln!(f)?;
        }
        Ok(())
    }
    /// Generates a listing of the constant table followed by a hex dump of the data segment.
    pub fn dump_pool(&self, f: &mut dyn Write) -> io::Result<()> {
        for (index, c) in self.pool.iter().enumerate() {
            match *c {
                Constant::Utf8 { .. } => writeln!(f, "{index:08}    Utf8({:?})", self.utf8(index))?,
                c => writeln!(f, "{index:08}    {c:?}")?,
            }
        }
        writeln!(f)?;
        for (i, bytes) in self.data.chunks(BYTES_PER_LINE).enumerate() {
            write!(f, "{:08}   ", i * BYTES_PER_LINE)?;
            for &b in bytes {
                write!(f, " {b:02x}")?;
            }
            for _ in bytes.len()..BYTES_PER_LINE {
                write!(f, "   ")?;
            }
            write!(f, "    ")?;
            for &b in bytes {
                write!(f, "{}", if (0x21..=0x7e).contains(&b) { b as char } else { '.' })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
    /// Returns the total size of the module's pooled data and code (in bytes).
    pub fn total_size(&self) -> usize {
        self.data.len() + self.methods.iter().map(|m| m.code.len()).sum::<usize>()
    }
}
