//! Message routing: decides which agents answer a user message.

pub mod llm;
pub mod traits;

pub use llm::{parse_decision, LlmClassifier};
pub use traits::{Category, Classifier, RouteDecision, RoutingError};

use crate::config::Config;
use crate::providers::Provider;
use std::sync::Arc;

/// Create the router step from config, sharing the workflow's provider.
pub fn create_classifier(config: &Config, provider: Arc<dyn Provider>) -> Box<dyn Classifier> {
    Box::new(LlmClassifier::new(
        provider,
        config.effective_model(),
        config.router.temperature,
        config.router.multi_route,
    ))
}
