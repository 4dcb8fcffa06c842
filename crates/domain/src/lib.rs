pub mod conversation;
pub mod error;
pub mod inbox;
pub mod mark_read;
pub mod notifier;
pub mod ports;
pub mod read_marker;
pub mod sources;
pub mod unread;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
