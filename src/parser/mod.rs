// ABOUTME: Parser module for YAML workflow request documents
// ABOUTME: Exports the request parser and its error types

pub mod error;
pub mod request;

pub use error::ParserError;
pub use request::RequestParser;
