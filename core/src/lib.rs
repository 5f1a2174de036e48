//! Core library of Lectern, a workspace catalog for bibles, songs, slides, media and shows.
//!
//! - [`document`]: the document types and the [`Persistable`](document::Persistable) enum.
//! - [`storage`]: the workspace directory layout and config file.
//! - [`persist`] and [`index`]: contracts for durable storage and full-text search.
//! - [`catalog`]: the coordinator keeping stores, search index and snapshot consistent.

pub mod archive;
pub mod catalog;
pub mod document;
pub mod event;
pub mod index;
pub mod persist;
pub mod storage;

#[cfg(any(test, feature = "test_utils"))]
pub mod testing;
