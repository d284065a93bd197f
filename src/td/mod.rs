//! The Thing model: Things, interactions, forms and TD documents.

mod description;
mod form;
mod interaction;
mod slug;
mod thing;

pub use description::{
    FormDescription, InteractionDescription, ThingDescription, WOT_CONTEXT_URL,
};
pub use form::{Form, Protocol};
pub use interaction::{
    Action, Event, Interaction, InteractionType, Property, validate_interaction_name,
};
pub use slug::slugify;
pub use thing::{Thing, validate_thing_id};
