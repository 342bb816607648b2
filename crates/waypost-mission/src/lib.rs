//! Waypost mission datatypes.
//!
//! The serializable data model handed to the executor by a dispatcher: a
//! [`Mission`] targets one robot and carries an ordered list of [`Step`]s.
//! These types define the wire shape only; execution semantics live in the
//! tree and pool crates.

mod mission;
mod step;

pub use mission::{Mission, MissionDefinition, MissionRuntimeOptions, MissionStatus};
pub use step::{CustomStep, Pose, Step};
