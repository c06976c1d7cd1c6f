//! Identities and the collaborator-facing model of loaded bytecode.

pub mod flags;
pub mod model;
pub mod reference;
pub mod typesystem;
