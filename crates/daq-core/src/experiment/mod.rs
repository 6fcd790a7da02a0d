//! Run documents.

pub mod document;
