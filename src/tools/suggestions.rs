//! Query suggestion catalogue.
//!
//! Starter prompts shown in the chat UI and offered to the model. Each one
//! is a natural-language request; the model writes the SQL.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionCategory {
    Products,
    Reviews,
    Analytics,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QuerySuggestion {
    pub label: &'static str,
    pub description: &'static str,
    pub category: SuggestionCategory,
}

pub const QUERY_SUGGESTIONS: &[QuerySuggestion] = &[
    QuerySuggestion {
        label: "Top Rated Products",
        description: "Show me the highest-rated products with the most reviews",
        category: SuggestionCategory::Products,
    },
    QuerySuggestion {
        label: "Recent Reviews",
        description: "Get the most recent product reviews",
        category: SuggestionCategory::Reviews,
    },
    QuerySuggestion {
        label: "Most Reviewed Products",
        description: "Find products with the most customer reviews",
        category: SuggestionCategory::Products,
    },
    QuerySuggestion {
        label: "Helpful Reviews",
        description: "Show the most helpful customer reviews",
        category: SuggestionCategory::Reviews,
    },
];

/// Input for the suggestion tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListSuggestionsInput {
    /// Only return suggestions in this category
    #[serde(default)]
    pub category: Option<SuggestionCategory>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListSuggestionsOutput {
    pub suggestions: Vec<QuerySuggestion>,
}

/// Suggestions, optionally filtered by category.
pub fn list_suggestions(category: Option<SuggestionCategory>) -> ListSuggestionsOutput {
    let suggestions = QUERY_SUGGESTIONS
        .iter()
        .filter(|s| category.is_none_or(|c| s.category == c))
        .cloned()
        .collect();
    ListSuggestionsOutput { suggestions }
}
