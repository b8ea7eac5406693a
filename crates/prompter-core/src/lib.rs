//! Shared data model for the prompter dialog framework: messages, node
//! labels, the blob serializer, and runtime configuration.

pub mod config;
pub mod error;
pub mod label;
pub mod message;
pub mod serialize;

pub use error::{CoreError, Result};
pub use label::{AbsoluteNodeLabel, NodeLabel};
pub use message::{Attachment, Command, MediaAttachment, Message, PollOption};
pub use serialize::Serializer;
