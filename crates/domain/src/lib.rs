pub mod cache;
pub mod changelog;
pub mod error;
pub mod events;
pub mod fanout;
pub mod feed;
pub mod filters;
pub mod ingest;
pub mod items;
pub mod locks;
pub mod memory;
pub mod notifier;
pub mod ports;
pub mod projection;
pub mod subscribers;
pub mod subscriptions;
pub mod tasks;
pub mod timeline;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
