//! # Document model
//!
//! `Value` is the JSON-like value handed to and produced by the VM.
//! `Document` is the arena the VM mutates in place; cursor frames address
//! its containers by `NodeId`.

pub mod document;
pub mod value;

pub use document::{Document, Node, NodeId};
pub use value::Value;
