//! Domain records shared by the directory, the dispatcher and the API.

pub mod account;
pub mod caregiver;
pub mod enums;
pub mod sos;

pub use account::*;
pub use caregiver::*;
pub use enums::*;
pub use sos::*;
