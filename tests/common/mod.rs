#![allow(dead_code)]

use mutest::class::{ClassDef, FieldDef, MethodDef};
use mutest::descriptor::{MethodDescriptor, TypeDesc, ValueWidth};
use mutest::instruction::{ArithOp, CallKind, FieldAccess, FieldOp, Instruction};
use mutest::suite::{Project, TestCase};
use mutest::vm::Value;

pub fn invoke(kind: CallKind, owner: &str, name: &str, desc: &str) -> Instruction {
    Instruction::invoke(kind, owner, name, desc).unwrap()
}

pub fn load(slot: u16) -> Instruction {
    Instruction::Load {
        slot,
        width: ValueWidth::Single,
    }
}

pub fn store(slot: u16) -> Instruction {
    Instruction::Store {
        slot,
        width: ValueWidth::Single,
    }
}

fn field(op: FieldOp, owner: &str, name: &str) -> Instruction {
    Instruction::FieldAccess(FieldAccess {
        op,
        owner: owner.into(),
        name: name.into(),
        width: ValueWidth::Single,
    })
}

pub fn get_field(owner: &str, name: &str) -> Instruction {
    field(FieldOp::Get, owner, name)
}

pub fn put_field(owner: &str, name: &str) -> Instruction {
    field(FieldOp::Put, owner, name)
}

pub fn get_static(owner: &str, name: &str) -> Instruction {
    field(FieldOp::GetStatic, owner, name)
}

pub fn put_static(owner: &str, name: &str) -> Instruction {
    field(FieldOp::PutStatic, owner, name)
}

pub fn iadd() -> Instruction {
    Instruction::Arith {
        op: ArithOp::Add,
        width: ValueWidth::Single,
    }
}

pub fn ireturn() -> Instruction {
    Instruction::Return(Some(ValueWidth::Single))
}

pub fn method(name: &str, desc: &str, code: Vec<Instruction>) -> MethodDef {
    MethodDef {
        name: name.into(),
        descriptor: MethodDescriptor::parse(desc).unwrap(),
        is_static: false,
        code,
    }
}

pub fn static_method(name: &str, desc: &str, code: Vec<Instruction>) -> MethodDef {
    MethodDef {
        is_static: true,
        ..method(name, desc, code)
    }
}

pub fn default_constructor(super_name: &str) -> MethodDef {
    method(
        "<init>",
        "()V",
        vec![
            load(0),
            invoke(CallKind::Special, super_name, "<init>", "()V"),
            Instruction::Return(None),
        ],
    )
}

pub fn int_field(name: &str, is_static: bool) -> FieldDef {
    FieldDef {
        name: name.into(),
        ty: TypeDesc::Int,
        is_static,
    }
}

/// A counter whose `add` reports success and bumps `count`.
pub fn bag_class() -> ClassDef {
    ClassDef {
        name: "Bag".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![int_field("count", false)],
        methods: vec![
            default_constructor("Object"),
            method(
                "size",
                "()I",
                vec![load(0), get_field("Bag", "count"), ireturn()],
            ),
            method(
                "add",
                "(I)Z",
                vec![
                    load(0),
                    load(0),
                    get_field("Bag", "count"),
                    Instruction::PushInt(1),
                    iadd(),
                    put_field("Bag", "count"),
                    Instruction::PushInt(1),
                    ireturn(),
                ],
            ),
        ],
    }
}

/// `call()` reads the size, calls `doStuff`, which adds to the bag and
/// throws the boolean away, then returns the size again.
pub fn testee_class() -> ClassDef {
    ClassDef {
        name: "Testee".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![FieldDef {
            name: "list".into(),
            ty: TypeDesc::Object("Bag".into()),
            is_static: false,
        }],
        methods: vec![
            method(
                "<init>",
                "()V",
                vec![
                    load(0),
                    invoke(CallKind::Special, "Object", "<init>", "()V"),
                    load(0),
                    Instruction::New("Bag".into()),
                    Instruction::Dup,
                    invoke(CallKind::Special, "Bag", "<init>", "()V"),
                    put_field("Testee", "list"),
                    Instruction::Return(None),
                ],
            ),
            method(
                "call",
                "()I",
                vec![
                    Instruction::LineNumber(10),
                    load(0),
                    get_field("Testee", "list"),
                    invoke(CallKind::Virtual, "Bag", "size", "()I"),
                    store(1),
                    Instruction::LineNumber(11),
                    load(0),
                    load(1),
                    invoke(CallKind::Virtual, "Testee", "doStuff", "(I)V"),
                    Instruction::LineNumber(12),
                    load(0),
                    get_field("Testee", "list"),
                    invoke(CallKind::Virtual, "Bag", "size", "()I"),
                    ireturn(),
                ],
            ),
            method(
                "doStuff",
                "(I)V",
                vec![
                    Instruction::LineNumber(20),
                    load(0),
                    load(1),
                    invoke(CallKind::Virtual, "Testee", "add", "(I)Z"),
                    Instruction::pop(),
                    Instruction::Return(None),
                ],
            ),
            method(
                "add",
                "(I)Z",
                vec![
                    Instruction::LineNumber(30),
                    load(0),
                    get_field("Testee", "list"),
                    load(1),
                    invoke(CallKind::Virtual, "Bag", "add", "(I)Z"),
                    ireturn(),
                ],
            ),
        ],
    }
}

/// A class whose static initializer discards the result of `seed()`.
pub fn registry_class() -> ClassDef {
    ClassDef {
        name: "Registry".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![int_field("seeded", true)],
        methods: vec![
            static_method(
                "<clinit>",
                "()V",
                vec![
                    invoke(CallKind::Static, "Registry", "seed", "()I"),
                    Instruction::pop(),
                    Instruction::Return(None),
                ],
            ),
            static_method(
                "seed",
                "()I",
                vec![
                    get_static("Registry", "seeded"),
                    Instruction::PushInt(1),
                    iadd(),
                    Instruction::Dup,
                    put_static("Registry", "seeded"),
                    ireturn(),
                ],
            ),
            static_method(
                "seeded",
                "()I",
                vec![get_static("Registry", "seeded"), ireturn()],
            ),
        ],
    }
}

pub fn test_case(
    name: &str,
    class: &str,
    method: &str,
    expect: Option<Value>,
    covers: &[&str],
) -> TestCase {
    TestCase {
        name: name.into(),
        class: class.into(),
        method: method.into(),
        descriptor: None,
        expect,
        covers: covers.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn testee_project() -> Project {
    Project {
        classes: vec![bag_class(), testee_class(), registry_class()],
        tests: vec![
            test_case("call_runs", "Testee", "call", None, &["Testee", "Bag"]),
            test_case(
                "call_counts_one_add",
                "Testee",
                "call",
                Some(Value::Int(1)),
                &["Testee", "Bag"],
            ),
            test_case(
                "registry_seeded_once",
                "Registry",
                "seeded",
                Some(Value::Int(1)),
                &["Registry"],
            ),
        ],
    }
}
