//! Smart-Boot orchestrator.
//!
//! Composes the boot-image codec and the SDP client: parses a `.smx`
//! recipe document, resolves `{{ name }}` variables, and executes a named
//! `BODY` recipe's `CMDS` program against a connected device.

pub mod grammar;
pub mod interp;

pub use grammar::{
    DataField, DataSegment, EnvPatch, EnvPatchMode, Head, Recipe, RecipeError, RecipeFile,
    SegmentType,
};
pub use interp::run_recipe;
