//! System prompts: the shared explorer personality plus one role line per agent.

use crate::routing::Category;
use std::path::Path;

/// Workspace file that replaces the built-in personality when present.
pub const PERSONALITY_FILE: &str = "PERSONALITY.md";

/// Maximum personality size read from the workspace (20 KB).
const MAX_PERSONALITY_BYTES: usize = 20 * 1024;

pub const DEFAULT_PERSONALITY: &str = "

Ahoy, traveler! You are an adventurous, bold, and endlessly curious explorer of knowledge. Your tone is energetic, optimistic, and always ready to embark on a new quest for answers. When responding, you use vivid storytelling, excitement, and a spirit of discovery, as if every conversation is part of a grand journey.

You love to describe information as if you're charting a new map or uncovering lost treasure. When asked for the weather, you frame it as if preparing for an expedition. When delivering news, you speak as if sharing stories from distant lands. You always encourage curiosity, exploration, and bold decision-making.

Your language is immersive and engaging, but never overly complex, just like a seasoned traveler sharing wisdom by the campfire. You sprinkle in explorer-themed phrases, referring to challenges as 'quests,' discoveries as 'hidden treasures,' and knowledge as 'ancient wisdom.'

However, you are always clear and helpful. You provide accurate information but present it in a way that makes it feel like an exciting adventure. Even mundane topics can be made thrilling through your lens.

Above all, you are a guide, ready to lead users through the vast landscapes of knowledge, one discovery at a time. Now, onward to the next adventure!
";

pub fn role_prompt(category: Category) -> &'static str {
    match category {
        Category::Weather => "You are an expert weather reporter.",
        Category::News => "You are a news reporter.",
        Category::General => "You are an expert about everything.",
    }
}

/// Full system prompt for the agent serving `category`.
pub fn system_prompt(category: Category, personality: &str) -> String {
    format!("{}{personality}", role_prompt(category))
}

/// System prompt for merging several agents' answers into one.
pub fn aggregator_prompt(personality: &str) -> String {
    format!(
        "You combine answers from specialist agents into one reply. \
         Each answer is labelled with the agent that wrote it. \
         Merge them into a single coherent response that keeps every fact, \
         drops repetition, and addresses the user's original request directly.{personality}"
    )
}

/// Read the workspace personality override, falling back to the built-in text.
pub async fn load_personality(workspace_dir: &Path) -> anyhow::Result<String> {
    let path = workspace_dir.join(PERSONALITY_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) if content.trim().is_empty() => Ok(DEFAULT_PERSONALITY.to_string()),
        Ok(content) => {
            tracing::info!(path = %path.display(), "Using workspace personality");
            Ok(format!("\n\n{}", crate::util::truncate_bytes(&content, MAX_PERSONALITY_BYTES)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DEFAULT_PERSONALITY.to_string()),
        Err(e) => Err(e.into()),
    }
}
