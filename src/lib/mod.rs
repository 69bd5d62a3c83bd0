#[macro_use]
pub mod document;

#[cfg(any(feature = "test_util", test))]
#[macro_use]
pub mod test_util;

pub mod app;
pub mod applier;
pub mod bootstrap;
pub mod catalog;
pub mod checkpoint;
pub mod coercion;
pub mod database;
pub mod error;
pub mod event;
pub mod queue;
pub mod replication;
pub mod store;
