use crate::class::{ClassDef, ROOT_CLASS};
use crate::descriptor::{DescriptorError, MethodDescriptor, TypeDesc, ValueWidth};
use crate::instruction::{
    ArithOp, BranchCond, CallKind, CONSTRUCTOR, FieldAccess, FieldOp, Instruction, LabelId,
    MethodCall,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Int(i32),
    Long(i64),
    Ref(u32),
    Null,
}

impl Value {
    pub fn width(self) -> ValueWidth {
        match self {
            Value::Long(_) => ValueWidth::Double,
            _ => ValueWidth::Single,
        }
    }

    fn default_for(ty: &TypeDesc) -> Value {
        match ty {
            TypeDesc::Object(_) | TypeDesc::Array(_) => Value::Null,
            other if other.width() == Some(ValueWidth::Double) => Value::Long(0),
            _ => Value::Int(0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Ref(r) => write!(f, "@{}", r),
            Value::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("class `{0}` not found")]
    ClassNotFound(String),
    #[error("method {class}.{name}{descriptor} not found")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },
    #[error("field {class}.{name} not found")]
    FieldNotFound { class: String, name: String },
    #[error("null dereference in {0}")]
    NullPointer(String),
    #[error("cannot instantiate abstract class `{0}`")]
    AbstractInstantiation(String),
    #[error("operand stack underflow in {0}")]
    StackUnderflow(String),
    #[error("type mismatch in {place}: expected {expected}, found {found}")]
    TypeMismatch {
        place: String,
        expected: &'static str,
        found: Value,
    },
    #[error("branch to unknown label L{0}")]
    UnknownLabel(LabelId),
    #[error("local slot {0} read before it was written")]
    UninitializedLocal(u16),
    #[error("unsupported instruction `{0}`")]
    Unsupported(String),
    #[error("control fell off the end of {0}")]
    FellOffEnd(String),
    #[error("call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("class hierarchy of `{0}` is circular")]
    CircularHierarchy(String),
    #[error("step budget of {0} instructions exhausted")]
    StepBudgetExhausted(u64),
    #[error("heap limit of {0} objects exhausted")]
    HeapExhausted(usize),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Raised when a fixture cannot be built through its no-argument constructor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("cannot instantiate the abstract class {0}")]
    Abstract(String),
    #[error("class {0} has no no-argument constructor")]
    NoDefaultConstructor(String),
    #[error("constructing {class} failed: {source}")]
    Failed {
        class: String,
        #[source]
        source: VmError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Instructions a single top-level invocation may execute.
    pub step_budget: u64,
    pub heap_limit: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            step_budget: 1_000_000,
            heap_limit: 100_000,
            max_depth: 256,
        }
    }
}

#[derive(Debug, Clone)]
struct Object {
    class: String,
    fields: HashMap<String, Value>,
}

enum Resolved {
    Code { class: Arc<ClassDef>, index: usize },
    RootConstructor,
}

pub struct ClassSpace {
    classpath: Arc<HashMap<String, ClassDef>>,
    loaded: HashMap<String, Arc<ClassDef>>,
    initialized: HashSet<String>,
    statics: HashMap<(String, String), Value>,
    heap: Vec<Object>,
    limits: Limits,
    steps: u64,
}

const MAX_HIERARCHY: usize = 64;

impl ClassSpace {
    pub fn new(classes: impl IntoIterator<Item = ClassDef>) -> Self {
        let classpath = classes.into_iter().map(|c| (c.name.clone(), c)).collect();
        Self::with_classpath(Arc::new(classpath), Limits::default())
    }

    fn with_classpath(classpath: Arc<HashMap<String, ClassDef>>, limits: Limits) -> Self {
        Self {
            classpath,
            loaded: HashMap::new(),
            initialized: HashSet::new(),
            statics: HashMap::new(),
            heap: Vec::new(),
            limits,
            steps: 0,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// A new space over the same class path with nothing loaded yet.
    pub fn empty_copy(&self) -> Self {
        Self::with_classpath(Arc::clone(&self.classpath), self.limits)
    }

    pub fn is_loaded(&self, class: &str) -> bool {
        self.loaded.contains_key(class)
    }

    pub fn is_initialized(&self, class: &str) -> bool {
        self.initialized.contains(class)
    }

    pub fn loaded_class(&self, class: &str) -> Option<Arc<ClassDef>> {
        self.loaded.get(class).cloned()
    }

    /// Load `class` from the class path without initializing it.
    pub fn load(&mut self, class: &str) -> Result<Arc<ClassDef>, VmError> {
        if let Some(def) = self.loaded.get(class) {
            return Ok(Arc::clone(def));
        }
        let def = self
            .classpath
            .get(class)
            .cloned()
            .ok_or_else(|| VmError::ClassNotFound(class.to_string()))?;
        trace!(class, "loading class");
        let def = Arc::new(def);
        self.loaded.insert(class.to_string(), Arc::clone(&def));
        Ok(def)
    }

    /// Replace the loaded definition of a class in place. Heap objects,
    /// static values and initialization state are kept.
    pub(crate) fn install(&mut self, def: ClassDef) {
        self.loaded.insert(def.name.clone(), Arc::new(def));
    }

    pub fn invoke_static(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, VmError> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        self.steps = 0;
        self.ensure_initialized(class, 0)?;
        match self.resolve(class, name, &descriptor)? {
            Resolved::Code { class, index } => self.run_method(class, index, None, args, 0),
            Resolved::RootConstructor => Ok(None),
        }
    }

    pub fn invoke_virtual(
        &mut self,
        receiver: Value,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, VmError> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        self.steps = 0;
        let class = self.class_of(receiver, name)?;
        match self.resolve(&class, name, &descriptor)? {
            Resolved::Code { class, index } => {
                self.run_method(class, index, Some(receiver), args, 0)
            }
            Resolved::RootConstructor => Ok(None),
        }
    }

    /// Build an instance through the class's no-argument constructor.
    pub fn instantiate(&mut self, class: &str) -> Result<Value, ConstructionError> {
        let failed = |source| ConstructionError::Failed {
            class: class.to_string(),
            source,
        };
        let def = self.load(class).map_err(failed)?;
        if def.is_abstract {
            return Err(ConstructionError::Abstract(class.to_string()));
        }
        let no_args = MethodDescriptor::new(Vec::new(), TypeDesc::Void);
        if def.method(CONSTRUCTOR, &no_args).is_none() {
            return Err(ConstructionError::NoDefaultConstructor(class.to_string()));
        }
        self.steps = 0;
        let instance = self.allocate(class, 0).map_err(failed)?;
        match self.resolve(class, CONSTRUCTOR, &no_args).map_err(failed)? {
            Resolved::Code { class: owner, index } => {
                self.run_method(owner, index, Some(instance), Vec::new(), 0)
                    .map_err(failed)?;
            }
            Resolved::RootConstructor => {}
        }
        Ok(instance)
    }

    pub fn get_field(&self, object: Value, name: &str) -> Result<Value, VmError> {
        let Value::Ref(r) = object else {
            return Err(VmError::NullPointer(name.to_string()));
        };
        let obj = self
            .heap
            .get(r as usize)
            .ok_or_else(|| VmError::NullPointer(name.to_string()))?;
        if let Some(v) = obj.fields.get(name) {
            return Ok(*v);
        }
        self.field_default(&obj.class, name, false)
    }

    /// Current value of a static field, without triggering initialization.
    pub fn static_value(&self, class: &str, name: &str) -> Option<Value> {
        self.statics
            .get(&(class.to_string(), name.to_string()))
            .copied()
    }

    fn tick(&mut self) -> Result<(), VmError> {
        self.steps += 1;
        if self.steps > self.limits.step_budget {
            return Err(VmError::StepBudgetExhausted(self.limits.step_budget));
        }
        Ok(())
    }

    fn ensure_initialized(&mut self, class: &str, depth: usize) -> Result<(), VmError> {
        if class == ROOT_CLASS || self.initialized.contains(class) {
            return Ok(());
        }
        let def = self.load(class)?;
        self.initialized.insert(class.to_string());
        self.ensure_initialized(&def.super_name, depth)?;
        if let Some(index) = def.methods.iter().position(|m| m.is_static_initializer()) {
            debug!(class, "running static initializer");
            self.run_method(Arc::clone(&def), index, None, Vec::new(), depth + 1)?;
        }
        Ok(())
    }

    fn resolve(
        &mut self,
        start: &str,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<Resolved, VmError> {
        let not_found = || VmError::MethodNotFound {
            class: start.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        };
        let mut current = start.to_string();
        for _ in 0..MAX_HIERARCHY {
            if current == ROOT_CLASS {
                if name == CONSTRUCTOR && descriptor.args().is_empty() && descriptor.is_void() {
                    return Ok(Resolved::RootConstructor);
                }
                return Err(not_found());
            }
            let def = self.load(&current)?;
            if let Some(index) = def
                .methods
                .iter()
                .position(|m| m.name == name && &m.descriptor == descriptor)
            {
                return Ok(Resolved::Code { class: def, index });
            }
            if name == CONSTRUCTOR {
                return Err(not_found());
            }
            current = def.super_name.clone();
        }
        Err(VmError::CircularHierarchy(start.to_string()))
    }

    fn field_default(&self, class: &str, name: &str, is_static: bool) -> Result<Value, VmError> {
        let mut current = class;
        for _ in 0..MAX_HIERARCHY {
            if current == ROOT_CLASS {
                break;
            }
            let Some(def) = self
                .loaded
                .get(current)
                .map(|def| &**def)
                .or_else(|| self.classpath.get(current))
            else {
                break;
            };
            if let Some(field) = def
                .fields
                .iter()
                .find(|f| f.name == name && f.is_static == is_static)
            {
                return Ok(Value::default_for(&field.ty));
            }
            current = &def.super_name;
        }
        Err(VmError::FieldNotFound {
            class: class.to_string(),
            name: name.to_string(),
        })
    }

    fn class_of(&self, value: Value, place: &str) -> Result<String, VmError> {
        match value {
            Value::Ref(r) => self
                .heap
                .get(r as usize)
                .map(|o| o.class.clone())
                .ok_or_else(|| VmError::NullPointer(place.to_string())),
            Value::Null => Err(VmError::NullPointer(place.to_string())),
            other => Err(VmError::TypeMismatch {
                place: place.to_string(),
                expected: "reference",
                found: other,
            }),
        }
    }

    fn allocate(&mut self, class: &str, depth: usize) -> Result<Value, VmError> {
        self.ensure_initialized(class, depth)?;
        let def = self.load(class)?;
        if def.is_abstract {
            return Err(VmError::AbstractInstantiation(class.to_string()));
        }
        if self.heap.len() >= self.limits.heap_limit {
            return Err(VmError::HeapExhausted(self.limits.heap_limit));
        }
        self.heap.push(Object {
            class: class.to_string(),
            fields: HashMap::new(),
        });
        Ok(Value::Ref((self.heap.len() - 1) as u32))
    }

    fn run_method(
        &mut self,
        class: Arc<ClassDef>,
        index: usize,
        receiver: Option<Value>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>, VmError> {
        if depth > self.limits.max_depth {
            return Err(VmError::StackOverflow(self.limits.max_depth));
        }
        let method = &class.methods[index];
        let place = format!("{}.{}", class.name, method.name);
        let labels: HashMap<LabelId, usize> = method
            .code
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                Instruction::Label(id) => Some((*id, i)),
                _ => None,
            })
            .collect();

        let mut locals: Vec<Option<Value>> = Vec::new();
        let mut slot = 0usize;
        for value in receiver.into_iter().chain(args) {
            set_local(&mut locals, slot, value);
            slot += value.width().slots();
        }

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;
        loop {
            let insn = method
                .code
                .get(pc)
                .ok_or_else(|| VmError::FellOffEnd(place.clone()))?;
            self.tick()?;
            pc += 1;
            match insn {
                Instruction::Call(call) => {
                    if let Some(result) = self.dispatch(call, &mut stack, &place, depth)? {
                        stack.push(result);
                    }
                }
                Instruction::Discard(ValueWidth::Single) => {
                    let v = pop(&mut stack, &place)?;
                    expect_width(v, ValueWidth::Single, &place)?;
                }
                Instruction::Discard(ValueWidth::Double) => {
                    let v = pop(&mut stack, &place)?;
                    if v.width() == ValueWidth::Single {
                        let below = pop(&mut stack, &place)?;
                        expect_width(below, ValueWidth::Single, &place)?;
                    }
                }
                Instruction::Dup => {
                    let top = *stack
                        .last()
                        .ok_or_else(|| VmError::StackUnderflow(place.clone()))?;
                    stack.push(expect_width(top, ValueWidth::Single, &place)?);
                }
                Instruction::Label(_) | Instruction::LineNumber(_) => {}
                Instruction::Branch { cond, target } => {
                    if branch_taken(*cond, &mut stack, &place)? {
                        pc = *labels.get(target).ok_or(VmError::UnknownLabel(*target))?;
                    }
                }
                Instruction::FieldAccess(field) => {
                    self.field_access(field, &mut stack, &place, depth)?;
                }
                Instruction::PushInt(v) => stack.push(Value::Int(*v)),
                Instruction::PushLong(v) => stack.push(Value::Long(*v)),
                Instruction::PushNull => stack.push(Value::Null),
                Instruction::Load { slot, width } => {
                    let v = locals
                        .get(*slot as usize)
                        .copied()
                        .flatten()
                        .ok_or(VmError::UninitializedLocal(*slot))?;
                    stack.push(expect_width(v, *width, &place)?);
                }
                Instruction::Store { slot, width } => {
                    let v = pop(&mut stack, &place)?;
                    set_local(&mut locals, *slot as usize, expect_width(v, *width, &place)?);
                }
                Instruction::New(name) => {
                    let obj = self.allocate(name, depth)?;
                    stack.push(obj);
                }
                Instruction::Arith { op, width } => {
                    let b = pop(&mut stack, &place)?;
                    let a = pop(&mut stack, &place)?;
                    stack.push(arith(*op, *width, a, b, &place)?);
                }
                Instruction::Return(None) => return Ok(None),
                Instruction::Return(Some(width)) => {
                    let v = pop(&mut stack, &place)?;
                    return Ok(Some(expect_width(v, *width, &place)?));
                }
                Instruction::Other { mnemonic, .. } => {
                    return Err(VmError::Unsupported(mnemonic.clone()));
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        call: &MethodCall,
        stack: &mut Vec<Value>,
        place: &str,
        depth: usize,
    ) -> Result<Option<Value>, VmError> {
        let widths = call.arg_widths();
        let mut args = Vec::with_capacity(widths.len());
        for width in widths.iter().rev() {
            let v = pop(stack, place)?;
            args.push(expect_width(v, *width, place)?);
        }
        args.reverse();

        let receiver = if call.is_static() {
            None
        } else {
            Some(pop(stack, place)?)
        };
        if call.is_constructor() && call.returns_value() {
            pop(stack, place)?;
        }

        let target = match (call.kind, receiver) {
            (_, Some(Value::Null)) => return Err(VmError::NullPointer(place.to_string())),
            (CallKind::Static, _) => {
                self.ensure_initialized(&call.owner, depth)?;
                self.resolve(&call.owner, &call.name, &call.descriptor)?
            }
            (CallKind::Virtual | CallKind::Interface, Some(r)) => {
                let runtime_class = self.class_of(r, place)?;
                self.resolve(&runtime_class, &call.name, &call.descriptor)?
            }
            _ => self.resolve(&call.owner, &call.name, &call.descriptor)?,
        };

        match target {
            Resolved::Code { class, index } => {
                self.run_method(class, index, receiver, args, depth + 1)
            }
            Resolved::RootConstructor => Ok(None),
        }
    }

    fn field_access(
        &mut self,
        field: &FieldAccess,
        stack: &mut Vec<Value>,
        place: &str,
        depth: usize,
    ) -> Result<(), VmError> {
        match field.op {
            FieldOp::Get => {
                let obj = pop(stack, place)?;
                let v = self.get_field(obj, &field.name)?;
                stack.push(expect_width(v, field.width, place)?);
            }
            FieldOp::Put => {
                let v = pop(stack, place)?;
                let v = expect_width(v, field.width, place)?;
                let obj = pop(stack, place)?;
                let Value::Ref(r) = obj else {
                    return Err(VmError::NullPointer(place.to_string()));
                };
                let target = self
                    .heap
                    .get_mut(r as usize)
                    .ok_or_else(|| VmError::NullPointer(place.to_string()))?;
                target.fields.insert(field.name.clone(), v);
            }
            FieldOp::GetStatic => {
                self.ensure_initialized(&field.owner, depth)?;
                let key = (field.owner.clone(), field.name.clone());
                let v = match self.statics.get(&key) {
                    Some(v) => *v,
                    None => self.field_default(&field.owner, &field.name, true)?,
                };
                stack.push(expect_width(v, field.width, place)?);
            }
            FieldOp::PutStatic => {
                self.ensure_initialized(&field.owner, depth)?;
                let v = pop(stack, place)?;
                let v = expect_width(v, field.width, place)?;
                self.statics
                    .insert((field.owner.clone(), field.name.clone()), v);
            }
        }
        Ok(())
    }
}

fn set_local(locals: &mut Vec<Option<Value>>, slot: usize, value: Value) {
    let needed = slot + value.width().slots();
    if locals.len() < needed {
        locals.resize(needed, None);
    }
    locals[slot] = Some(value);
    if value.width() == ValueWidth::Double {
        locals[slot + 1] = None;
    }
}

fn pop(stack: &mut Vec<Value>, place: &str) -> Result<Value, VmError> {
    stack
        .pop()
        .ok_or_else(|| VmError::StackUnderflow(place.to_string()))
}

fn expect_width(value: Value, width: ValueWidth, place: &str) -> Result<Value, VmError> {
    if value.width() == width {
        Ok(value)
    } else {
        Err(VmError::TypeMismatch {
            place: place.to_string(),
            expected: match width {
                ValueWidth::Single => "single-width value",
                ValueWidth::Double => "double-width value",
            },
            found: value,
        })
    }
}

fn as_int(value: Value, place: &str) -> Result<i32, VmError> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(VmError::TypeMismatch {
            place: place.to_string(),
            expected: "int",
            found: other,
        }),
    }
}

fn branch_taken(cond: BranchCond, stack: &mut Vec<Value>, place: &str) -> Result<bool, VmError> {
    let taken = match cond {
        BranchCond::Always => true,
        BranchCond::IfZero | BranchCond::IfNonZero => {
            let zero = match pop(stack, place)? {
                Value::Int(v) => v == 0,
                Value::Null => true,
                Value::Ref(_) => false,
                other => {
                    return Err(VmError::TypeMismatch {
                        place: place.to_string(),
                        expected: "int or reference",
                        found: other,
                    });
                }
            };
            (cond == BranchCond::IfZero) == zero
        }
        BranchCond::IfEq | BranchCond::IfNe | BranchCond::IfLt | BranchCond::IfGe => {
            let b = as_int(pop(stack, place)?, place)?;
            let a = as_int(pop(stack, place)?, place)?;
            match cond {
                BranchCond::IfEq => a == b,
                BranchCond::IfNe => a != b,
                BranchCond::IfLt => a < b,
                _ => a >= b,
            }
        }
    };
    Ok(taken)
}

fn arith(
    op: ArithOp,
    width: ValueWidth,
    a: Value,
    b: Value,
    place: &str,
) -> Result<Value, VmError> {
    match (width, a, b) {
        (ValueWidth::Single, Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
        })),
        (ValueWidth::Double, Value::Long(a), Value::Long(b)) => Ok(Value::Long(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
        })),
        (_, a, b) => Err(VmError::TypeMismatch {
            place: place.to_string(),
            expected: if width == ValueWidth::Single { "int" } else { "long" },
            found: if a.width() == width { b } else { a },
        }),
    }
}
