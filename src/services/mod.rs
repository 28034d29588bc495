//! Core services: the record store, the object store and the gate that ties
//! them together.

pub mod download_gate;
pub mod grant_store;
pub mod object_store;
