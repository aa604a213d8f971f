use crate::class::{ClassInfo, MethodDef};
use crate::context::MutationContext;
use crate::instruction::{Instruction, MethodCall};
use tracing::debug;

pub trait MethodMutator: Send + Sync {
    /// Globally unique operator id, recorded in every identifier it registers.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Replay `method`'s code, registering candidates with `ctx` and applying
    /// the ones it selects.
    fn mutate(&self, ctx: &mut dyn MutationContext, method: &MethodDef) -> Vec<Instruction>;
}

pub fn all() -> Vec<Box<dyn MethodMutator>> {
    vec![Box::new(RemoveNonVoidCalls)]
}

pub fn by_id(id: &str) -> Option<Box<dyn MethodMutator>> {
    all().into_iter().find(|op| op.id() == id)
}

/// Removes a value-returning call whose result is immediately discarded,
/// replacing it with discards of the call's operands.
pub struct RemoveNonVoidCalls;

impl RemoveNonVoidCalls {
    pub const ID: &'static str = "EXPERIMENTAL_REMOVE_NON_VOID_CALLS";
}

/// At most one call waits to see whether its result is thrown away.
#[derive(Clone, Copy)]
enum Pending<'a> {
    Idle,
    Call { index: usize, call: &'a MethodCall },
}

impl MethodMutator for RemoveNonVoidCalls {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn name(&self) -> &'static str {
        "RemoveNonVoidCalls"
    }

    fn mutate(&self, ctx: &mut dyn MutationContext, method: &MethodDef) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(method.code.len());
        let mut pending = Pending::Idle;
        for (index, insn) in method.code.iter().enumerate() {
            pending = self.step(ctx, pending, index, insn, &mut out);
        }
        flush(pending, &mut out);
        out
    }
}

impl RemoveNonVoidCalls {
    fn step<'a>(
        &self,
        ctx: &mut dyn MutationContext,
        pending: Pending<'a>,
        index: usize,
        insn: &'a Instruction,
        out: &mut Vec<Instruction>,
    ) -> Pending<'a> {
        match insn {
            Instruction::Discard(width) => {
                if let Pending::Call { index: at, call } = pending {
                    if call.return_width() == Some(*width) {
                        let description =
                            format!("removed call to method {}.{}", call.owner, call.name);
                        let id = ctx.register_mutation(self.id(), at, description);
                        if ctx.should_mutate(&id) {
                            debug!(%id, "removing call");
                            discard_operands(call, out);
                            return Pending::Idle;
                        }
                    }
                }
                flush(pending, out);
                out.push(insn.clone());
                Pending::Idle
            }
            Instruction::Call(call) => {
                flush(pending, out);
                if !call.returns_value() || is_own_or_super_constructor(ctx.class_info(), call) {
                    out.push(insn.clone());
                    Pending::Idle
                } else {
                    Pending::Call { index, call }
                }
            }
            Instruction::Label(_)
            | Instruction::Branch { .. }
            | Instruction::LineNumber(_)
            | Instruction::Return(_) => {
                flush(pending, out);
                out.push(insn.clone());
                Pending::Idle
            }
            Instruction::Dup
            | Instruction::FieldAccess(_)
            | Instruction::PushInt(_)
            | Instruction::PushLong(_)
            | Instruction::PushNull
            | Instruction::Load { .. }
            | Instruction::Store { .. }
            | Instruction::New(_)
            | Instruction::Arith { .. }
            | Instruction::Other { .. } => {
                flush(pending, out);
                out.push(insn.clone());
                Pending::Idle
            }
        }
    }
}

/// Replay a still-pending call unchanged.
fn flush(pending: Pending<'_>, out: &mut Vec<Instruction>) {
    if let Pending::Call { call, .. } = pending {
        out.push(Instruction::Call(call.clone()));
    }
}

/// Discard everything the call would have consumed: arguments from the last
/// declared to the first, then the abandoned allocation of a constructor,
/// then the receiver of an instance call.
fn discard_operands(call: &MethodCall, out: &mut Vec<Instruction>) {
    for width in call.arg_widths().into_iter().rev() {
        out.push(Instruction::Discard(width));
    }
    if call.is_constructor() {
        out.push(Instruction::pop());
    }
    if !call.is_static() {
        out.push(Instruction::pop());
    }
}

/// Removing these would leave an uninitialized instance behind.
fn is_own_or_super_constructor(class: &ClassInfo, call: &MethodCall) -> bool {
    call.is_constructor() && (call.owner == class.name || call.owner == class.super_name)
}
