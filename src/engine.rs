use crate::class::{ClassDef, CodecError, MethodDef};
use crate::context::ClassContext;
use crate::mutants::{Mutant, MutationDetails, MutationIdentifier};
use crate::operators::MethodMutator;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("class `{0}` is not known to the engine")]
    UnknownClass(String),
    #[error("no mutation operator with id `{0}`")]
    UnknownOperator(String),
    #[error("mutation {0} is not produced by its operator")]
    UnknownMutation(Box<MutationIdentifier>),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Materializes the bytes of a mutant for one identifier.
pub trait MutationEngine {
    fn get_mutation(&self, id: &MutationIdentifier) -> Result<Mutant, EngineError>;
}

pub struct Mutater {
    classes: BTreeMap<String, ClassDef>,
    operators: Vec<Box<dyn MethodMutator>>,
}

impl Mutater {
    pub fn new(
        classes: impl IntoIterator<Item = ClassDef>,
        operators: Vec<Box<dyn MethodMutator>>,
    ) -> Self {
        Self {
            classes: classes.into_iter().map(|c| (c.name.clone(), c)).collect(),
            operators,
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    /// Every candidate in `class_name`, per operator and then in stream order.
    pub fn find_mutations(&self, class_name: &str) -> Result<Vec<MutationDetails>, EngineError> {
        let class = self
            .classes
            .get(class_name)
            .ok_or_else(|| EngineError::UnknownClass(class_name.to_string()))?;
        let class_hash = class.content_hash()?;

        let mut found = Vec::new();
        for op in &self.operators {
            let mut ctx = ClassContext::scanning(class.info());
            for method in &class.methods {
                ctx.enter_method(method);
                let before = ctx.registered().len();
                op.mutate(&mut ctx, method);
                for id in &ctx.registered()[before..] {
                    found.push(details_for(id.clone(), method, &class_hash));
                }
            }
        }
        debug!(class = class_name, candidates = found.len(), "scanned class");
        Ok(found)
    }
}

fn details_for(id: MutationIdentifier, method: &MethodDef, class_hash: &str) -> MutationDetails {
    MutationDetails {
        line: method.line_at(id.index),
        in_static_initializer: method.is_static_initializer(),
        tests_in_order: Vec::new(),
        class_hash: class_hash.to_string(),
        id,
    }
}

impl MutationEngine for Mutater {
    fn get_mutation(&self, id: &MutationIdentifier) -> Result<Mutant, EngineError> {
        let class = self
            .classes
            .get(id.class_name())
            .ok_or_else(|| EngineError::UnknownClass(id.class_name().to_string()))?;
        let op = self
            .operators
            .iter()
            .find(|op| op.id() == id.operator)
            .ok_or_else(|| EngineError::UnknownOperator(id.operator.clone()))?;
        let unknown = || EngineError::UnknownMutation(Box::new(id.clone()));

        let mut mutated = class.clone();
        let method = mutated
            .methods
            .iter_mut()
            .find(|m| {
                m.name == id.location.method && m.descriptor.to_string() == id.location.descriptor
            })
            .ok_or_else(unknown)?;

        let mut ctx = ClassContext::targeting(class.info(), id.clone());
        ctx.enter_method(method);
        let code = op.mutate(&mut ctx, method);
        if !ctx.target_found() {
            return Err(unknown());
        }

        let details = details_for(id.clone(), method, &class.content_hash()?);
        method.code = code;
        let bytes = mutated.to_bytes()?;
        Ok(Mutant {
            details,
            class: mutated,
            bytes,
        })
    }
}
