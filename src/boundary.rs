use crate::class::{ClassDef, CodecError};
use crate::instruction::{VerifyError, verify};
use crate::vm::{ClassSpace, VmError};
use thiserror::Error;
use tracing::{debug, warn};

pub trait IsolationBoundary {
    /// Replace the live definition of `class` with the one encoded in
    /// `bytes`. Returns false when the replacement is refused.
    fn replace(&mut self, class: &str, bytes: &[u8]) -> bool;

    /// A newly constructed boundary with nothing loaded or initialized.
    fn fresh(&self) -> Self
    where
        Self: Sized;
}

#[derive(Debug, Error)]
pub enum HotswapError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("bytes define `{found}`, expected `{expected}`")]
    WrongClass { expected: String, found: String },
    #[error(transparent)]
    Load(#[from] VmError),
    #[error("fields, methods or hierarchy of `{0}` differ from the loaded class")]
    ShapeChanged(String),
    #[error("method {method} fails verification: {source}")]
    Verify {
        method: String,
        #[source]
        source: VerifyError,
    },
}

impl ClassSpace {
    /// Swap in a new definition of an existing class. Only method bodies may
    /// change, and every body must verify.
    pub fn redefine(&mut self, class: &str, bytes: &[u8]) -> Result<(), HotswapError> {
        let replacement = ClassDef::from_bytes(bytes)?;
        if replacement.name != class {
            return Err(HotswapError::WrongClass {
                expected: class.to_string(),
                found: replacement.name,
            });
        }
        let current = self.load(class)?;
        if current.super_name != replacement.super_name
            || current.is_abstract != replacement.is_abstract
            || current.shape() != replacement.shape()
        {
            return Err(HotswapError::ShapeChanged(class.to_string()));
        }
        for method in &replacement.methods {
            verify(&method.code).map_err(|source| HotswapError::Verify {
                method: format!("{}.{}{}", class, method.name, method.descriptor),
                source,
            })?;
        }
        debug!(class, "redefined class");
        self.install(replacement);
        Ok(())
    }
}

impl IsolationBoundary for ClassSpace {
    fn replace(&mut self, class: &str, bytes: &[u8]) -> bool {
        match self.redefine(class, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(class, error = %e, "class redefinition refused");
                false
            }
        }
    }

    fn fresh(&self) -> Self {
        self.empty_copy()
    }
}
