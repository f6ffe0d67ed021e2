//! [`Module`] execution primitives.

use crate::ast::{ArithOp, Type};
use crate::bytecode::{Instruction, Module};

/// A single runtime value of the stack machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f64),
}
impl Value {
    fn get_type(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Long(_) => Type::Long,
            Value::Float(_) => Type::Float,
        }
    }
}

/// Error type produced while executing a [`Module`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    /// A call named a method the module does not contain.
    UnknownMethod { name: String },
    /// A load read a local slot no store has written.
    UninitializedLocal { slot: usize },
    /// An operand's runtime type did not match the instruction's type.
    TypeError { expected: Type, got: Type },
    /// Integer division by zero.
    DivideByZero,
}

/// Result of stepping through a [`Process`].
pub enum StepResult {
    /// The process executed one instruction successfully and can continue.
    Normal,
    /// The entry method returned. Carries the entry frame's final local slots,
    /// which are the observable effect of running a method.
    Terminate { locals: Vec<Option<Value>> },
}

struct Frame {
    method: usize,
    pos: usize,
    locals: Vec<Option<Value>>,
}
impl Frame {
    fn new(module: &Module, method: usize) -> Self {
        Self { method, pos: 0, locals: vec![None; module.methods()[method].max_locals()] }
    }
}

/// A [`Module`] execution primitive.
///
/// Instructions are decoded on the fly from the current frame's code bytes; one
/// [`Process::step`] executes one instruction.
pub struct Process<'a> {
    module: &'a Module,
    value_stack: Vec<Value>,
    call_stack: Vec<Frame>,
}
impl<'a> Process<'a> {
    /// Creates a process positioned at the start of the named method.
    pub fn new(module: &'a Module, method: &str) -> Result<Self, ExecError> {
        let index = module.method_index(method).ok_or_else(|| ExecError::UnknownMethod { name: method.to_owned() })?;
        Ok(Self { module, value_stack: vec![], call_stack: vec![Frame::new(module, index)] })
    }
    /// Executes a single instruction.
    pub fn step(&mut self) -> Result<StepResult, ExecError> {
        let frame = self.call_stack.last_mut().unwrap();
        let entry = &self.module.methods()[frame.method];
        let (ins, aft) = Instruction::read(entry.code(), &self.module.pool, &self.module.data, frame.pos);
        frame.pos = aft;

        fn load(locals: &[Option<Value>], slot: usize, expected: Type) -> Result<Value, ExecError> {
            let value = locals[slot].ok_or(ExecError::UninitializedLocal { slot })?;
            if value.get_type() != expected {
                return Err(ExecError::TypeError { expected, got: value.get_type() });
            }
            Ok(value)
        }

        macro_rules! pop {
            ($variant:ident : $ty:ident) => {
                match self.value_stack.pop().unwrap() {
                    Value::$variant(x) => x,
                    x => return Err(ExecError::TypeError { expected: Type::$ty, got: x.get_type() }),
                }
            };
        }

        match ins {
            Instruction::PushInt { value } => self.value_stack.push(Value::Int(value)),
            Instruction::PushLong { value } => self.value_stack.push(Value::Long(value)),
            Instruction::PushFloat { value } => self.value_stack.push(Value::Float(value)),

            Instruction::LoadInt { slot } => self.value_stack.push(load(&frame.locals, slot, Type::Int)?),
            Instruction::LoadLong { slot } => self.value_stack.push(load(&frame.locals, slot, Type::Long)?),
            Instruction::LoadFloat { slot } => self.value_stack.push(load(&frame.locals, slot, Type::Float)?),

            Instruction::StoreInt { slot } => frame.locals[slot] = Some(Value::Int(pop!(Int: Int))),
            Instruction::StoreLong { slot } => frame.locals[slot] = Some(Value::Long(pop!(Long: Long))),
            Instruction::StoreFloat { slot } => frame.locals[slot] = Some(Value::Float(pop!(Float: Float))),

            Instruction::IntOp { op } => {
                let b = pop!(Int: Int);
                let a = pop!(Int: Int);
                let res = match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div => {
                        if b == 0 { return Err(ExecError::DivideByZero) }
                        a.wrapping_div(b)
                    }
                };
                self.value_stack.push(Value::Int(res));
            }
            Instruction::LongOp { op } => {
                let b = pop!(Long: Long);
                let a = pop!(Long: Long);
                let res = match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div => {
                        if b == 0 { return Err(ExecError::DivideByZero) }
                        a.wrapping_div(b)
                    }
                };
                self.value_stack.push(Value::Long(res));
            }
            Instruction::FloatOp { op } => {
                let b = pop!(Float: Float);
                let a = pop!(Float: Float);
                let res = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                };
                self.value_stack.push(Value::Float(res));
            }

            Instruction::Call { method } => {
                let index = self.module.method_index(method).ok_or_else(|| ExecError::UnknownMethod { name: method.to_owned() })?;
                self.call_stack.push(Frame::new(self.module, index));
            }
            Instruction::Return => {
                let frame = self.call_stack.pop().unwrap();
                if self.call_stack.is_empty() {
                    return Ok(StepResult::Terminate { locals: frame.locals });
                }
            }
        }
        Ok(StepResult::Normal)
    }
    /// Steps the process until the entry method returns, yielding its final local slots.
    pub fn run(&mut self) -> Result<Vec<Option<Value>>, ExecError> {
        loop {
            match self.step()? {
                StepResult::Normal => (),
                StepResult::Terminate { locals } => return Ok(locals),
            }
        }
    }
}

impl Module {
    /// Runs the named method to completion and returns its final local slots.
    pub fn execute(&self, method: &str) -> Result<Vec<Option<Value>>, ExecError> {
        Process::new(self, method)?.run()
    }
}
