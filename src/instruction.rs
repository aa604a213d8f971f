use crate::descriptor::{DescriptorError, MethodDescriptor, ValueWidth};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub const CONSTRUCTOR: &str = "<init>";
pub const STATIC_INITIALIZER: &str = "<clinit>";

pub type LabelId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl CallKind {
    fn mnemonic(self) -> &'static str {
        match self {
            CallKind::Virtual => "invokevirtual",
            CallKind::Special => "invokespecial",
            CallKind::Static => "invokestatic",
            CallKind::Interface => "invokeinterface",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodCall {
    pub kind: CallKind,
    pub owner: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodCall {
    pub fn new(
        kind: CallKind,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: &str,
    ) -> Result<Self, DescriptorError> {
        Ok(Self {
            kind,
            owner: owner.into(),
            name: name.into(),
            descriptor: MethodDescriptor::parse(descriptor)?,
        })
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    pub fn is_static(&self) -> bool {
        self.kind == CallKind::Static
    }

    pub fn returns_value(&self) -> bool {
        !self.descriptor.is_void()
    }

    pub fn return_width(&self) -> Option<ValueWidth> {
        self.descriptor.return_width()
    }

    pub fn arg_widths(&self) -> Vec<ValueWidth> {
        self.descriptor.arg_widths()
    }

    /// Slots consumed from the operand stack.
    ///
    /// A value-returning constructor call stands for `new; dup; <init>`
    /// collapsed into one call, so it also consumes the allocated reference
    /// sitting beneath its receiver.
    pub fn consumed_slots(&self) -> usize {
        let mut slots = self.descriptor.arg_slots();
        if !self.is_static() {
            slots += 1;
        }
        if self.is_constructor() && self.returns_value() {
            slots += 1;
        }
        slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchCond {
    Always,
    IfZero,
    IfNonZero,
    IfEq,
    IfNe,
    IfLt,
    IfGe,
}

impl BranchCond {
    /// Single-width operands popped by the test.
    pub fn operands(self) -> usize {
        match self {
            BranchCond::Always => 0,
            BranchCond::IfZero | BranchCond::IfNonZero => 1,
            BranchCond::IfEq | BranchCond::IfNe | BranchCond::IfLt | BranchCond::IfGe => 2,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            BranchCond::Always => "goto",
            BranchCond::IfZero => "ifeq",
            BranchCond::IfNonZero => "ifne",
            BranchCond::IfEq => "if_icmpeq",
            BranchCond::IfNe => "if_icmpne",
            BranchCond::IfLt => "if_icmplt",
            BranchCond::IfGe => "if_icmpge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOp {
    Get,
    Put,
    GetStatic,
    PutStatic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldAccess {
    pub op: FieldOp,
    pub owner: String,
    pub name: String,
    pub width: ValueWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Call(MethodCall),
    /// `pop` for single width, `pop2` for double width.
    Discard(ValueWidth),
    Dup,
    Label(LabelId),
    Branch { cond: BranchCond, target: LabelId },
    FieldAccess(FieldAccess),
    PushInt(i32),
    PushLong(i64),
    PushNull,
    Load { slot: u16, width: ValueWidth },
    Store { slot: u16, width: ValueWidth },
    New(String),
    Arith { op: ArithOp, width: ValueWidth },
    LineNumber(u32),
    Return(Option<ValueWidth>),
    /// Anything the model does not interpret, with its declared stack effect.
    Other { mnemonic: String, pops: u8, pushes: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

impl Instruction {
    pub fn pop() -> Self {
        Instruction::Discard(ValueWidth::Single)
    }

    pub fn pop2() -> Self {
        Instruction::Discard(ValueWidth::Double)
    }

    pub fn invoke(
        kind: CallKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<Self, DescriptorError> {
        Ok(Instruction::Call(MethodCall::new(kind, owner, name, descriptor)?))
    }

    pub fn stack_effect(&self) -> StackEffect {
        let (pops, pushes) = match self {
            Instruction::Call(call) => (
                call.consumed_slots(),
                call.return_width().map_or(0, ValueWidth::slots),
            ),
            Instruction::Discard(width) => (width.slots(), 0),
            Instruction::Dup => (1, 2),
            Instruction::Label(_) | Instruction::LineNumber(_) => (0, 0),
            Instruction::Branch { cond, .. } => (cond.operands(), 0),
            Instruction::FieldAccess(field) => {
                let w = field.width.slots();
                match field.op {
                    FieldOp::Get => (1, w),
                    FieldOp::Put => (1 + w, 0),
                    FieldOp::GetStatic => (0, w),
                    FieldOp::PutStatic => (w, 0),
                }
            }
            Instruction::PushInt(_) | Instruction::PushNull | Instruction::New(_) => (0, 1),
            Instruction::PushLong(_) => (0, 2),
            Instruction::Load { width, .. } => (0, width.slots()),
            Instruction::Store { width, .. } => (width.slots(), 0),
            Instruction::Arith { width, .. } => (2 * width.slots(), width.slots()),
            Instruction::Return(width) => (width.map_or(0, ValueWidth::slots), 0),
            Instruction::Other { pops, pushes, .. } => (*pops as usize, *pushes as usize),
        };
        StackEffect { pops, pushes }
    }

    /// True when control never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Instruction::Return(_)
                | Instruction::Branch {
                    cond: BranchCond::Always,
                    ..
                }
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Call(call) => write!(
                f,
                "{} {}.{}{}",
                call.kind.mnemonic(),
                call.owner,
                call.name,
                call.descriptor
            ),
            Instruction::Discard(ValueWidth::Single) => f.write_str("pop"),
            Instruction::Discard(ValueWidth::Double) => f.write_str("pop2"),
            Instruction::Dup => f.write_str("dup"),
            Instruction::Label(id) => write!(f, "L{}:", id),
            Instruction::Branch { cond, target } => write!(f, "{} L{}", cond.mnemonic(), target),
            Instruction::FieldAccess(field) => {
                let op = match field.op {
                    FieldOp::Get => "getfield",
                    FieldOp::Put => "putfield",
                    FieldOp::GetStatic => "getstatic",
                    FieldOp::PutStatic => "putstatic",
                };
                write!(f, "{} {}.{}", op, field.owner, field.name)
            }
            Instruction::PushInt(v) => write!(f, "ipush {}", v),
            Instruction::PushLong(v) => write!(f, "lpush {}", v),
            Instruction::PushNull => f.write_str("aconst_null"),
            Instruction::Load { slot, width } => match width {
                ValueWidth::Single => write!(f, "load {}", slot),
                ValueWidth::Double => write!(f, "load2 {}", slot),
            },
            Instruction::Store { slot, width } => match width {
                ValueWidth::Single => write!(f, "store {}", slot),
                ValueWidth::Double => write!(f, "store2 {}", slot),
            },
            Instruction::New(class) => write!(f, "new {}", class),
            Instruction::Arith { op, width } => {
                let prefix = match width {
                    ValueWidth::Single => "i",
                    ValueWidth::Double => "l",
                };
                let name = match op {
                    ArithOp::Add => "add",
                    ArithOp::Sub => "sub",
                    ArithOp::Mul => "mul",
                };
                write!(f, "{}{}", prefix, name)
            }
            Instruction::LineNumber(line) => write!(f, "line {}", line),
            Instruction::Return(None) => f.write_str("return"),
            Instruction::Return(Some(ValueWidth::Single)) => f.write_str("ireturn"),
            Instruction::Return(Some(ValueWidth::Double)) => f.write_str("lreturn"),
            Instruction::Other { mnemonic, .. } => f.write_str(mnemonic),
        }
    }
}

/// One instruction per line, indented except for labels.
pub fn listing(code: &[Instruction]) -> String {
    let mut out = String::new();
    for insn in code {
        match insn {
            Instruction::Label(_) => out.push_str(&format!("{}\n", insn)),
            _ => out.push_str(&format!("    {}\n", insn)),
        }
    }
    out
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("stack underflow at instruction {index}: needs {needed} slots, has {available}")]
    Underflow {
        index: usize,
        needed: usize,
        available: usize,
    },
    #[error("stack height mismatch at instruction {index}: {expected} vs {found}")]
    HeightMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("branch at instruction {index} targets unknown label L{label}")]
    UnknownLabel { index: usize, label: LabelId },
    #[error("control falls off the end of the method")]
    FallsOffEnd,
}

/// Operand stack height after each instruction, treating the code as
/// straight-line (branches pop their operands and fall through).
pub fn linear_heights(code: &[Instruction]) -> Result<Vec<usize>, VerifyError> {
    let mut height = 0usize;
    let mut heights = Vec::with_capacity(code.len());
    for (index, insn) in code.iter().enumerate() {
        let effect = insn.stack_effect();
        if effect.pops > height {
            return Err(VerifyError::Underflow {
                index,
                needed: effect.pops,
                available: height,
            });
        }
        height = height - effect.pops + effect.pushes;
        heights.push(height);
    }
    Ok(heights)
}

/// Flow-sensitive check that every reachable instruction sees one
/// consistent stack height. Returns the maximum height reached.
pub fn verify(code: &[Instruction]) -> Result<usize, VerifyError> {
    if code.is_empty() {
        return Ok(0);
    }
    let labels: HashMap<LabelId, usize> = code
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Instruction::Label(id) => Some((*id, i)),
            _ => None,
        })
        .collect();

    let mut entry: Vec<Option<usize>> = vec![None; code.len()];
    entry[0] = Some(0);
    let mut work = vec![0usize];
    let mut max = 0usize;

    while let Some(index) = work.pop() {
        let Some(height) = entry[index] else { continue };
        let insn = &code[index];
        let effect = insn.stack_effect();
        if effect.pops > height {
            return Err(VerifyError::Underflow {
                index,
                needed: effect.pops,
                available: height,
            });
        }
        let out = height - effect.pops + effect.pushes;
        max = max.max(height).max(out);

        let mut successors = Vec::with_capacity(2);
        if let Instruction::Branch { target, .. } = insn {
            let dest = labels
                .get(target)
                .copied()
                .ok_or(VerifyError::UnknownLabel { index, label: *target })?;
            successors.push(dest);
        }
        if !insn.ends_flow() {
            if index + 1 >= code.len() {
                return Err(VerifyError::FallsOffEnd);
            }
            successors.push(index + 1);
        }

        for next in successors {
            match entry[next] {
                None => {
                    entry[next] = Some(out);
                    work.push(next);
                }
                Some(existing) if existing != out => {
                    return Err(VerifyError::HeightMismatch {
                        index: next,
                        expected: existing,
                        found: out,
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(max)
}
