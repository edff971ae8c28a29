//! Generic Access Profile: UUID representation and advertising parameters.

pub use {adv::*, uuid::*};

mod adv;
mod uuid;
