#![doc = "In-process transport for the fleet watchdog protocol."]

mod mailbox;
mod registry;

pub use mailbox::{Mailbox, ReceiveOptions, Received, RegistryMailbox};
pub use registry::MailboxRegistry;
