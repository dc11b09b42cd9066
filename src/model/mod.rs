// Domain model for material requests

pub mod request;
pub mod types;

pub use request::{
    FieldViolation, MaterialRequest, NewMaterialRequest, RequestPatch, MAX_MATERIAL_NAME_LEN,
    MAX_NOTES_LEN, MAX_QUANTITY, UNKNOWN_REQUESTER,
};
pub use types::{CompanyId, ParseEnumError, Priority, ProjectId, RequestId, RequestStatus, Unit, UserId};
