//! Core engine: parsing, graph building, retrieval and conversion

pub mod config;
pub mod convert;
pub mod error;
pub mod frameworks;
pub mod graph;
pub mod locks;
pub mod normalize;
pub mod parser;
pub mod query;
pub mod service;
pub mod symbols;
