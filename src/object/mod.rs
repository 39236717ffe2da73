//! Object model seam.
//!
//! Objects live in an [`ObjectStore`] arena and refer to each other by
//! [`ObjectId`]. What an object's serial data means is decided by the
//! [`ClassSerializer`] registered on its class (or the nearest parent class
//! that has one); the default reads a tagged [`PropertyBag`] followed by
//! opaque binary fields.

mod bulk;
mod class;
mod flags;
mod properties;
mod redirector;
mod store;

pub use bulk::*;
pub use class::*;
pub use flags::*;
pub use properties::*;
pub use redirector::*;
pub use store::*;
