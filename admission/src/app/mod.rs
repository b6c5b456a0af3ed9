//! Application layer: the desk collaborators call, and the signed payloads
//! it hands out.

mod desk;
mod payload;

pub use desk::{AdmissionDesk, SlotGrant, SlotRequest};
pub use payload::RedemptionSigner;
