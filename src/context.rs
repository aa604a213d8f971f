use crate::class::{ClassInfo, MethodDef};
use crate::mutants::{Location, MutationIdentifier};
use tracing::trace;

pub trait MutationContext {
    fn class_info(&self) -> &ClassInfo;

    /// Record a candidate at `index` of the current method's stream.
    /// Called once per structurally distinct candidate, in scan order.
    fn register_mutation(
        &mut self,
        operator: &str,
        index: usize,
        description: String,
    ) -> MutationIdentifier;

    /// Whether `id` is the mutation under test for this run.
    fn should_mutate(&self, id: &MutationIdentifier) -> bool;
}

/// Per-class context. A scanning context selects nothing; a targeting
/// context selects exactly one identifier. Selecting several mutations in
/// one pass is not supported: the target is a single identifier.
pub struct ClassContext {
    class: ClassInfo,
    location: Location,
    target: Option<MutationIdentifier>,
    registered: Vec<MutationIdentifier>,
}

impl ClassContext {
    pub fn scanning(class: ClassInfo) -> Self {
        Self::new(class, None)
    }

    pub fn targeting(class: ClassInfo, target: MutationIdentifier) -> Self {
        Self::new(class, Some(target))
    }

    fn new(class: ClassInfo, target: Option<MutationIdentifier>) -> Self {
        let location = Location {
            class: class.name.clone(),
            method: String::new(),
            descriptor: String::new(),
        };
        Self {
            class,
            location,
            target,
            registered: Vec::new(),
        }
    }

    pub fn enter_method(&mut self, method: &MethodDef) {
        self.location = Location {
            class: self.class.name.clone(),
            method: method.name.clone(),
            descriptor: method.descriptor.to_string(),
        };
    }

    pub fn registered(&self) -> &[MutationIdentifier] {
        &self.registered
    }

    /// True once the target has been registered during this pass.
    pub fn target_found(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(|target| self.registered.contains(target))
    }

    pub fn into_registered(self) -> Vec<MutationIdentifier> {
        self.registered
    }
}

impl MutationContext for ClassContext {
    fn class_info(&self) -> &ClassInfo {
        &self.class
    }

    fn register_mutation(
        &mut self,
        operator: &str,
        index: usize,
        description: String,
    ) -> MutationIdentifier {
        let id = MutationIdentifier {
            operator: operator.to_string(),
            location: self.location.clone(),
            index,
            description,
        };
        trace!(%id, "registered candidate");
        self.registered.push(id.clone());
        id
    }

    fn should_mutate(&self, id: &MutationIdentifier) -> bool {
        self.target.as_ref() == Some(id)
    }
}
