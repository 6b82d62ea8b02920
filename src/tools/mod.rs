//! Tool implementations.
//!
//! This module contains the handlers behind the REST API and the MCP tools:
//! - `query`: Run a SELECT through the gate and shape the result
//! - `suggestions`: Starter prompts for the chat UI and the model
//! - `format`: Markdown, CSV and ASCII table rendering

pub mod format;
pub mod query;
pub mod suggestions;

pub use format::OutputFormat;
pub use query::{
    SqlApiRequest, SqlApiResponse, SqlQueryHandler, SqlQueryInput, SqlQueryOutput,
    TOOL_DEFAULT_LIMIT,
};
pub use suggestions::{
    ListSuggestionsInput, ListSuggestionsOutput, QUERY_SUGGESTIONS, QuerySuggestion,
    SuggestionCategory, list_suggestions,
};
