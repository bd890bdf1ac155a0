//! Intermud2 protocol engine.
//! Host-driven: no I/O; host passes datagrams and timer ticks, receives actions.

pub mod color;
pub mod contact;
pub mod directory;
pub mod hostlist;
pub mod identity;
pub mod protocol;
pub mod scheduler;
pub mod wire;

pub use contact::{Contact, ContactState, Service};
pub use directory::{ContactObserver, Directory, MergeOutcome};
pub use hostlist::{parse_host_list, HostEntry};
pub use identity::LocalIdentity;
pub use protocol::{Command, Message, Params};
pub use wire::{decode, DecodeError, Frame};
pub use crate::core::{ImudCore, MessageError, OutboundAction};

pub mod core;
