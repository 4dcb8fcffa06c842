use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod catalog;
pub mod messages;
pub mod profile;
pub mod push;
pub mod read_markers;
