pub mod boundary;
pub mod class;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod exit_code;
pub mod history;
pub mod instruction;
pub mod mutants;
pub mod operators;
pub mod output;
pub mod reporter;
pub mod runner;
pub mod state;
pub mod suite;
pub mod testapi;
pub mod vm;
pub mod worker;
