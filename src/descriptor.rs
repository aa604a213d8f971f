use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};
use thiserror::Error;

/// Number of operand stack slots a value occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueWidth {
    Single,
    Double,
}

impl ValueWidth {
    pub fn slots(self) -> usize {
        match self {
            ValueWidth::Single => 1,
            ValueWidth::Double => 2,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("method descriptor `{0}` must start with '('")]
    MissingOpenParen(String),
    #[error("unexpected end of descriptor `{0}`")]
    UnexpectedEnd(String),
    #[error("invalid type character '{ch}' in descriptor `{descriptor}`")]
    InvalidType { descriptor: String, ch: char },
    #[error("void is only valid as a return type (in `{0}`)")]
    VoidNotAllowed(String),
    #[error("trailing characters after descriptor `{0}`")]
    Trailing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeDesc {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Object(String),
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Width on the operand stack, `None` for void.
    pub fn width(&self) -> Option<ValueWidth> {
        match self {
            TypeDesc::Void => None,
            TypeDesc::Long | TypeDesc::Double => Some(ValueWidth::Double),
            _ => Some(ValueWidth::Single),
        }
    }

    /// Parse a single field type such as `J` or `Ljava/util/List;`.
    pub fn parse_field(text: &str) -> Result<TypeDesc, DescriptorError> {
        let mut chars = text.chars().peekable();
        let ty = parse_type(text, &mut chars)?;
        if ty == TypeDesc::Void {
            return Err(DescriptorError::VoidNotAllowed(text.to_string()));
        }
        if chars.next().is_some() {
            return Err(DescriptorError::Trailing(text.to_string()));
        }
        Ok(ty)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => f.write_str("V"),
            TypeDesc::Boolean => f.write_str("Z"),
            TypeDesc::Byte => f.write_str("B"),
            TypeDesc::Char => f.write_str("C"),
            TypeDesc::Short => f.write_str("S"),
            TypeDesc::Int => f.write_str("I"),
            TypeDesc::Float => f.write_str("F"),
            TypeDesc::Long => f.write_str("J"),
            TypeDesc::Double => f.write_str("D"),
            TypeDesc::Object(name) => write!(f, "L{};", name),
            TypeDesc::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

impl TryFrom<String> for TypeDesc {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TypeDesc::parse_field(&value)
    }
}

impl From<TypeDesc> for String {
    fn from(value: TypeDesc) -> Self {
        value.to_string()
    }
}

fn parse_type(
    descriptor: &str,
    chars: &mut Peekable<Chars<'_>>,
) -> Result<TypeDesc, DescriptorError> {
    let ch = chars
        .next()
        .ok_or_else(|| DescriptorError::UnexpectedEnd(descriptor.to_string()))?;
    let ty = match ch {
        'V' => TypeDesc::Void,
        'Z' => TypeDesc::Boolean,
        'B' => TypeDesc::Byte,
        'C' => TypeDesc::Char,
        'S' => TypeDesc::Short,
        'I' => TypeDesc::Int,
        'F' => TypeDesc::Float,
        'J' => TypeDesc::Long,
        'D' => TypeDesc::Double,
        'L' => {
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(';') => break,
                    Some(c) => name.push(c),
                    None => return Err(DescriptorError::UnexpectedEnd(descriptor.to_string())),
                }
            }
            if name.is_empty() {
                return Err(DescriptorError::InvalidType {
                    descriptor: descriptor.to_string(),
                    ch: ';',
                });
            }
            TypeDesc::Object(name)
        }
        '[' => {
            let inner = parse_type(descriptor, chars)?;
            if inner == TypeDesc::Void {
                return Err(DescriptorError::VoidNotAllowed(descriptor.to_string()));
            }
            TypeDesc::Array(Box::new(inner))
        }
        other => {
            return Err(DescriptorError::InvalidType {
                descriptor: descriptor.to_string(),
                ch: other,
            });
        }
    };
    Ok(ty)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodDescriptor {
    args: Vec<TypeDesc>,
    ret: TypeDesc,
}

impl MethodDescriptor {
    pub fn new(args: Vec<TypeDesc>, ret: TypeDesc) -> Self {
        Self { args, ret }
    }

    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let mut chars = text.chars().peekable();
        if chars.next() != Some('(') {
            return Err(DescriptorError::MissingOpenParen(text.to_string()));
        }
        let mut args = Vec::new();
        loop {
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => {
                    let arg = parse_type(text, &mut chars)?;
                    if arg == TypeDesc::Void {
                        return Err(DescriptorError::VoidNotAllowed(text.to_string()));
                    }
                    args.push(arg);
                }
                None => return Err(DescriptorError::UnexpectedEnd(text.to_string())),
            }
        }
        let ret = parse_type(text, &mut chars)?;
        if chars.next().is_some() {
            return Err(DescriptorError::Trailing(text.to_string()));
        }
        Ok(Self { args, ret })
    }

    pub fn args(&self) -> &[TypeDesc] {
        &self.args
    }

    pub fn return_type(&self) -> &TypeDesc {
        &self.ret
    }

    /// Argument widths in declaration order.
    pub fn arg_widths(&self) -> Vec<ValueWidth> {
        self.args.iter().filter_map(TypeDesc::width).collect()
    }

    pub fn arg_slots(&self) -> usize {
        self.arg_widths().iter().map(|w| w.slots()).sum()
    }

    pub fn return_width(&self) -> Option<ValueWidth> {
        self.ret.width()
    }

    pub fn is_void(&self) -> bool {
        self.ret == TypeDesc::Void
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for arg in &self.args {
            write!(f, "{}", arg)?;
        }
        write!(f, "){}", self.ret)
    }
}

impl FromStr for MethodDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MethodDescriptor::parse(s)
    }
}

impl TryFrom<String> for MethodDescriptor {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MethodDescriptor::parse(&value)
    }
}

impl From<MethodDescriptor> for String {
    fn from(value: MethodDescriptor) -> Self {
        value.to_string()
    }
}
