//! Network Managers
//!
//! Borrowed per-session views over the engine, one per record family:
//!
//! - [`FactNetwork`]: bitemporal facts with dedup-on-add and heat tracking
//! - [`ExperienceNetwork`]: experiences and the procedures learned from them
//! - [`ObservationNetwork`]: entities and their relationships
//! - [`BeliefNetwork`]: beliefs and their lifecycle
//! - [`PersonaIndex`]: user profile plus topic and keyword indexes
//!
//! Every numeric update goes through [`crate::confidence`].

mod beliefs;
mod experiences;
mod facts;
mod observations;
mod persona;

pub use beliefs::BeliefNetwork;
pub use experiences::{ExperienceNetwork, ExperienceQuery};
pub use facts::FactNetwork;
pub use observations::ObservationNetwork;
pub use persona::{PersonaIndex, PersonaProfile, PersonaUpdate, TopicContext, LEARNING_SUMMARY};

/// Outcome of an add that may merge into an existing record
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<T> {
    /// A new record was written
    Inserted(T),
    /// An equivalent record existed and was reinforced instead
    Merged(T),
}

impl<T> Upsert<T> {
    pub fn record(&self) -> &T {
        match self {
            Upsert::Inserted(record) | Upsert::Merged(record) => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Upsert::Inserted(record) | Upsert::Merged(record) => record,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, Upsert::Merged(_))
    }
}
