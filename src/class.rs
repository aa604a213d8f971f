use crate::descriptor::{MethodDescriptor, TypeDesc};
use crate::instruction::{CONSTRUCTOR, Instruction, STATIC_INITIALIZER};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Implicit root of every class hierarchy; always resolvable.
pub const ROOT_CLASS: &str = "Object";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed class bytes: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeDesc,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: MethodDescriptor,
    #[serde(default)]
    pub is_static: bool,
    pub code: Vec<Instruction>,
}

impl MethodDef {
    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    /// Last source line declared at or before `index`.
    pub fn line_at(&self, index: usize) -> Option<u32> {
        self.code
            .iter()
            .take(index + 1)
            .filter_map(|insn| match insn {
                Instruction::LineNumber(line) => Some(*line),
                _ => None,
            })
            .last()
    }
}

fn root_class() -> String {
    ROOT_CLASS.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default = "root_class")]
    pub super_name: String,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

/// The class-level facts an operator may consult while mutating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub super_name: String,
}

impl ClassDef {
    pub fn info(&self) -> ClassInfo {
        ClassInfo {
            name: self.name.clone(),
            super_name: self.super_name.clone(),
        }
    }

    pub fn method(&self, name: &str, descriptor: &MethodDescriptor) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && &m.descriptor == descriptor)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Hash of the encoded class, used to detect source changes between runs.
    pub fn content_hash(&self) -> Result<String, CodecError> {
        Ok(content_hash(&self.to_bytes()?))
    }

    /// Field and method signatures, in a canonical order.
    pub fn shape(&self) -> (Vec<(String, String, bool)>, Vec<(String, String, bool)>) {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.ty.to_string(), f.is_static))
            .collect();
        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|m| (m.name.clone(), m.descriptor.to_string(), m.is_static))
            .collect();
        fields.sort();
        methods.sort();
        (fields, methods)
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
