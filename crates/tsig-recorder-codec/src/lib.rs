//! Data model and IO contracts shared by every stage of the recorder
//! pipeline and the analytics engine (§3).

pub mod channel;
pub mod discrimination;
pub mod rtp;
pub mod segment;
pub mod timesnap;
pub mod tone;
