//! Records exchanged with the cache: spaces and their children, outbound
//! payloads and received data objects.

pub(crate) mod data;
mod duration;
mod space;

pub use data::{DataModel, DataObject, Payload};
pub use duration::{format_iso8601, parse_iso8601};
pub use space::{Persistence, Role, Space, SpaceChannel, SpaceMember, SpaceType};
