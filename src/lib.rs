//! CodeShift - code knowledge graph service
//!
//! Parses a project into a language-independent code graph, answers
//! questions about it with graph-selected context, and converts it to another
//! language file by file in dependency order.

pub mod core;
pub mod languages;
pub mod llm;
pub mod server;
pub mod storage;

pub use crate::core::config::Config;
pub use crate::core::error::{CodeShiftError, Result};
pub use crate::core::graph::GraphBuilder;
pub use crate::core::parser::CodeParser;
pub use crate::core::query::QueryEngine;
pub use crate::core::service::CodeShift;
pub use crate::languages::LanguageRegistry;
pub use crate::llm::CompletionService;
pub use crate::storage::Database;
