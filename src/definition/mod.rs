//! Test definitions: data model, loading and hierarchy composition

pub mod compose;
pub mod loader;
pub mod model;

pub use compose::{load_path, load_paths, load_testset, validate_cases, Composer};
pub use loader::{discover_testsets, load_document};
pub use model::{
    Action, ApiFragment, CaseDefinition, CaseEntry, Document, FragmentDef, LayerKind,
    LayerReference, ProjectInfo, StepKind, StepSpec, SuiteFragment, TestSet, DEFAULT_MODULE,
};
