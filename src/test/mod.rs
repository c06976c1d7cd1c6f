mod typesystem;

pub use codegen::StubCodegen;
pub use typesystem::MockTypeSystem;
