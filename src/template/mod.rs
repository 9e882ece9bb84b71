//! Composed node templates and their validation

pub mod request;
pub mod validator;

pub use request::{
    ComposedNodeTemplate, LocalDriveRequirement, MasterDrive, MemoryRequirement,
    NetworkInterfaceRequirement, ProcessorRequirement, RemoteDriveRequirement,
    RequirementCategory, VlanRequirement,
};
pub use validator::{FieldViolation, TemplateValidator, ValidationErrors};
