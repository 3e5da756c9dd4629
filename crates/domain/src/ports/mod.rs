use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod bus;
pub mod db;
pub mod feed;
pub mod signal;
pub mod subscribers;
