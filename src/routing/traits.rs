//! Routing traits and types for choosing which agents answer a message.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of agent categories a message can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Weather,
    News,
    General,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Weather, Category::News, Category::General];

    /// Stable identifier used for session keys and wire payloads.
    pub fn agent_id(self) -> &'static str {
        match self {
            Category::Weather => "weather",
            Category::News => "news",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("unknown route category '{0}' (expected weather, news or general)")]
    UnknownCategory(String),
    #[error("router returned no usable decision: {0}")]
    MalformedDecision(String),
}

impl FromStr for Category {
    type Err = RoutingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weather" => Ok(Category::Weather),
            "news" => Ok(Category::News),
            "general" => Ok(Category::General),
            _ => Err(RoutingError::UnknownCategory(s.to_string())),
        }
    }
}

/// Outcome of the router step: which agents run, in order.
///
/// Always non-empty and free of duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteDecision {
    categories: Vec<Category>,
}

impl RouteDecision {
    /// Deduplicate in first-seen order; an empty list routes to `general`.
    pub fn new(categories: impl IntoIterator<Item = Category>) -> Self {
        let mut unique = Vec::new();
        for category in categories {
            if !unique.contains(&category) {
                unique.push(category);
            }
        }
        if unique.is_empty() {
            unique.push(Category::General);
        }
        Self { categories: unique }
    }

    pub fn single(category: Category) -> Self {
        Self {
            categories: vec![category],
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn primary(&self) -> Category {
        self.categories[0]
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_multi(&self) -> bool {
        self.categories.len() > 1
    }

    /// Keep only the first category.
    pub fn into_single(self) -> Self {
        Self::single(self.primary())
    }
}

/// Decides which agent categories should answer a user message.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, input: &str) -> Result<RouteDecision>;

    /// The name of this classifier implementation.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!(" Weather ".parse::<Category>().unwrap(), Category::Weather);
        assert_eq!("NEWS".parse::<Category>().unwrap(), Category::News);
        assert_eq!("general".parse::<Category>().unwrap(), Category::General);
    }

    #[test]
    fn category_rejects_labels_outside_the_closed_set() {
        let err = "sports".parse::<Category>().unwrap_err();
        assert_eq!(err, RoutingError::UnknownCategory("sports".into()));
    }

    #[test]
    fn category_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Category::Weather).unwrap(),
            "\"weather\""
        );
    }

    #[test]
    fn decision_dedupes_in_first_seen_order() {
        let decision = RouteDecision::new([
            Category::News,
            Category::Weather,
            Category::News,
        ]);
        assert_eq!(decision.categories(), &[Category::News, Category::Weather]);
        assert!(decision.is_multi());
    }

    #[test]
    fn empty_decision_falls_back_to_general() {
        let decision = RouteDecision::new(Vec::new());
        assert_eq!(decision.categories(), &[Category::General]);
        assert!(!decision.is_multi());
    }

    #[test]
    fn into_single_keeps_primary() {
        let decision = RouteDecision::new([Category::Weather, Category::News]).into_single();
        assert_eq!(decision.categories(), &[Category::Weather]);
    }

    #[test]
    fn decision_serializes_as_plain_list() {
        let decision = RouteDecision::new([Category::Weather, Category::General]);
        assert_eq!(
            serde_json::to_string(&decision).unwrap(),
            r#"["weather","general"]"#
        );
    }
}
