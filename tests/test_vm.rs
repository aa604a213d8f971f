mod common;

use common::*;
use mutest::boundary::{HotswapError, IsolationBoundary};
use mutest::class::ClassDef;
use mutest::engine::{MutationEngine, Mutater};
use mutest::instruction::{BranchCond, Instruction};
use mutest::operators;
use mutest::vm::{ClassSpace, ConstructionError, Limits, Value, VmError};

fn space() -> ClassSpace {
    ClassSpace::new(vec![bag_class(), testee_class(), registry_class()])
}

#[test]
fn testee_call_counts_one_add() {
    let mut space = space();
    let testee = space.instantiate("Testee").unwrap();
    let result = space.invoke_virtual(testee, "call", "()I", vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(1)));

    let bag = space.get_field(testee, "list").unwrap();
    assert_eq!(space.get_field(bag, "count").unwrap(), Value::Int(1));
}

#[test]
fn static_initializer_runs_once_per_space() {
    let mut space = space();
    assert!(!space.is_initialized("Registry"));
    assert_eq!(space.static_value("Registry", "seeded"), None);

    let first = space.invoke_static("Registry", "seeded", "()I", vec![]).unwrap();
    let second = space.invoke_static("Registry", "seeded", "()I", vec![]).unwrap();
    assert_eq!(first, Some(Value::Int(1)));
    assert_eq!(second, Some(Value::Int(1)));
    assert!(space.is_initialized("Registry"));

    let mut fresh = space.empty_copy();
    assert!(!fresh.is_loaded("Registry"));
    assert!(!fresh.is_initialized("Registry"));
    let again = fresh.invoke_static("Registry", "seeded", "()I", vec![]).unwrap();
    assert_eq!(again, Some(Value::Int(1)));
}

#[test]
fn calling_seed_directly_increments_the_counter() {
    let mut space = space();
    let seeded = space.invoke_static("Registry", "seed", "()I", vec![]).unwrap();
    assert_eq!(seeded, Some(Value::Int(2)));
    assert_eq!(space.static_value("Registry", "seeded"), Some(Value::Int(2)));
}

#[test]
fn hotswap_changes_behavior_of_existing_instances() {
    let engine = Mutater::new(
        vec![bag_class(), testee_class(), registry_class()],
        operators::all(),
    );
    let id = engine.find_mutations("Testee").unwrap().remove(0).id;
    let mutant = engine.get_mutation(&id).unwrap();

    let mut space = space();
    let testee = space.instantiate("Testee").unwrap();
    assert!(space.replace("Testee", &mutant.bytes));

    let result = space.invoke_virtual(testee, "call", "()I", vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(0)));
    assert_eq!(
        space.loaded_class("Testee").unwrap().as_ref(),
        &mutant.class
    );
}

#[test]
fn replacement_must_keep_the_class_shape() {
    let mut space = space();

    let mut extra_method = testee_class();
    extra_method.methods.push(method("extra", "()V", vec![Instruction::Return(None)]));
    assert!(matches!(
        space.redefine("Testee", &extra_method.to_bytes().unwrap()),
        Err(HotswapError::ShapeChanged(_))
    ));

    let mut new_super = testee_class();
    new_super.super_name = "Bag".into();
    assert!(matches!(
        space.redefine("Testee", &new_super.to_bytes().unwrap()),
        Err(HotswapError::ShapeChanged(_))
    ));

    assert!(matches!(
        space.redefine("Testee", &bag_class().to_bytes().unwrap()),
        Err(HotswapError::WrongClass { .. })
    ));
    assert!(matches!(
        space.redefine("Testee", b"not a class"),
        Err(HotswapError::Codec(_))
    ));
    assert!(!space.replace("Testee", b"not a class"));
}

#[test]
fn replacement_must_verify() {
    let mut broken = testee_class();
    let do_stuff = broken
        .methods
        .iter_mut()
        .find(|m| m.name == "doStuff")
        .unwrap();
    do_stuff.code = vec![Instruction::pop(), Instruction::Return(None)];

    let mut space = space();
    assert!(matches!(
        space.redefine("Testee", &broken.to_bytes().unwrap()),
        Err(HotswapError::Verify { .. })
    ));
    assert!(!space.replace("Testee", &broken.to_bytes().unwrap()));
    assert_eq!(
        space.loaded_class("Testee").unwrap().as_ref(),
        &testee_class()
    );
}

#[test]
fn replacing_an_unknown_class_fails() {
    let mut stranger = bag_class();
    stranger.name = "Stranger".into();
    let mut space = space();
    assert!(matches!(
        space.redefine("Stranger", &stranger.to_bytes().unwrap()),
        Err(HotswapError::Load(VmError::ClassNotFound(_)))
    ));
}

#[test]
fn instantiate_rejects_abstract_and_constructorless_classes() {
    let shape = ClassDef {
        name: "Shape".into(),
        super_name: "Object".into(),
        is_abstract: true,
        fields: vec![],
        methods: vec![default_constructor("Object")],
    };
    let bare = ClassDef {
        name: "Bare".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![],
        methods: vec![method(
            "<init>",
            "(I)V",
            vec![Instruction::Return(None)],
        )],
    };
    let mut space = ClassSpace::new(vec![shape, bare]);
    assert_eq!(
        space.instantiate("Shape"),
        Err(ConstructionError::Abstract("Shape".into()))
    );
    assert_eq!(
        space.instantiate("Bare"),
        Err(ConstructionError::NoDefaultConstructor("Bare".into()))
    );
    assert!(matches!(
        space.instantiate("Nowhere"),
        Err(ConstructionError::Failed {
            source: VmError::ClassNotFound(_),
            ..
        })
    ));
}

fn spinner() -> ClassDef {
    ClassDef {
        name: "Spinner".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![],
        methods: vec![
            static_method(
                "spin",
                "()V",
                vec![
                    Instruction::Label(0),
                    Instruction::Branch {
                        cond: BranchCond::Always,
                        target: 0,
                    },
                ],
            ),
            static_method(
                "hoard",
                "()V",
                vec![
                    Instruction::Label(0),
                    Instruction::New("Spinner".into()),
                    Instruction::pop(),
                    Instruction::Branch {
                        cond: BranchCond::Always,
                        target: 0,
                    },
                ],
            ),
        ],
    }
}

#[test]
fn step_budget_stops_endless_loops() {
    let mut space = ClassSpace::new(vec![spinner()]).with_limits(Limits {
        step_budget: 500,
        ..Limits::default()
    });
    assert_eq!(
        space.invoke_static("Spinner", "spin", "()V", vec![]),
        Err(VmError::StepBudgetExhausted(500))
    );
    assert_eq!(space.empty_copy().limits().step_budget, 500, "fresh spaces keep limits");
}

#[test]
fn heap_limit_stops_runaway_allocation() {
    let mut space = ClassSpace::new(vec![spinner()]).with_limits(Limits {
        heap_limit: 50,
        ..Limits::default()
    });
    assert_eq!(
        space.invoke_static("Spinner", "hoard", "()V", vec![]),
        Err(VmError::HeapExhausted(50))
    );
}

#[test]
fn null_receiver_faults() {
    let mut space = space();
    assert!(matches!(
        space.invoke_virtual(Value::Null, "call", "()I", vec![]),
        Err(VmError::NullPointer(_))
    ));
}

#[test]
fn missing_method_faults() {
    let mut space = space();
    assert!(matches!(
        space.invoke_static("Registry", "absent", "()I", vec![]),
        Err(VmError::MethodNotFound { .. })
    ));
}
