//! Sluice-Control: control-plane server state for the sluice runtime.
//!
//! A control-plane server manages many concurrently connected client
//! instances, each registering multiple independent resources (typically
//! one network worker address per accelerator partition). This crate owns
//! the server-side identity state:
//!
//! - [`TagIssuer`]: mints opaque 64-bit [`Tag`]s, unique and strictly
//!   increasing within a live issuer
//! - [`TaggedRegistry`]: the instance-id → tag multimap with bulk
//!   revocation of one instance's state on disconnect
//! - [`ConnectionTable`]: worker-address exchange bookkeeping built on
//!   top of the registry
//!
//! Wire encoding is out of scope; this crate consumes only "register
//! instance, receive tag" and "instance disconnected, drop its tags"
//! events from the connection-lifecycle handler.

pub mod connections;
pub mod registry;
pub mod tag;

pub use connections::{ConnectionTable, WorkerAddress};
pub use registry::{ClientInstanceId, TagRegistry, TaggedRegistry};
pub use tag::{Tag, TagIssuer};
