//! The WoT runtime layer: ExposedThings and the Servient container.

mod exposed;
mod servient;

pub use exposed::{ActionHandler, ExposedThing, action_handler};
pub use servient::Servient;
