//! Prompt Loader
//!
//! Loads agent system prompts from `<dir>/<agent-type>.md`, stripping YAML
//! frontmatter. Missing files fall back to a generic prompt so an agent with
//! no prompt file still runs.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from prompt providers
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("reading agent file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid agent type name: {0:?}")]
    InvalidName(String),
}

/// Source of agent system prompts
///
/// Implementations must be safe for concurrent use by many executions.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn load(&self, agent_type: &str) -> Result<String, PromptError>;
}

/// Prompt used when an agent has no prompt file
pub fn fallback_prompt(agent_type: &str) -> String {
    format!("You are a {agent_type} specialist. Follow best practices and project conventions.")
}

/// Directory-backed prompt provider with an in-memory cache
pub struct PromptLoader {
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl PromptLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(?dir, "PromptLoader::new: called");
        Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn clear_cache(&self) {
        debug!("PromptLoader::clear_cache: called");
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Agent types that have a prompt file in the directory, sorted
    pub fn available(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            debug!(dir = ?self.dir, "PromptLoader::available: directory not readable");
            return Vec::new();
        };

        let mut agents: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .collect();
        agents.sort();
        agents
    }

    fn cached(&self, agent_type: &str) -> Option<String> {
        self.cache.read().ok().and_then(|cache| cache.get(agent_type).cloned())
    }

    fn store(&self, agent_type: &str, prompt: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(agent_type.to_string(), prompt.to_string());
        }
    }
}

#[async_trait]
impl PromptProvider for PromptLoader {
    async fn load(&self, agent_type: &str) -> Result<String, PromptError> {
        debug!(%agent_type, "PromptLoader::load: called");
        if let Some(prompt) = self.cached(agent_type) {
            debug!(%agent_type, "PromptLoader::load: cache hit");
            return Ok(prompt);
        }

        if agent_type.is_empty() || agent_type.contains(['/', '\\']) || agent_type.starts_with('.') {
            return Err(PromptError::InvalidName(agent_type.to_string()));
        }

        let path = self.dir.join(format!("{agent_type}.md"));
        let prompt = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                info!(?path, "PromptLoader::load: loaded prompt file");
                extract_prompt(&content).to_string()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(?path, "PromptLoader::load: prompt file missing, using fallback");
                fallback_prompt(agent_type)
            }
            Err(source) => return Err(PromptError::Read { path, source }),
        };

        self.store(agent_type, &prompt);
        Ok(prompt)
    }
}

/// Strip leading YAML frontmatter and surrounding whitespace
fn extract_prompt(content: &str) -> &str {
    match content.strip_prefix("---").and_then(|rest| rest.find("---").map(|end| &rest[end + 3..])) {
        Some(body) => body.trim(),
        None => content.trim(),
    }
}
