//! Author identities and the read-only author registry.
//!
//! An author is a fixed persona backed by a private text corpus and a voice
//! template. Authors are loaded once at startup from a TOML registry file
//! and never mutated at runtime; "voice" differences are template data, not
//! behavioral polymorphism.

use crate::embeddings::Embedder;
use crate::error::{ConfigError, EngineError, SelectionError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// An immutable author identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    /// Unique identifier (e.g., "marx", "whitman").
    pub id: String,
    /// Display name (e.g., "Karl Marx").
    pub name: String,
    /// Expertise areas, used when rendering a generic voice template.
    #[serde(default)]
    pub expertise: Vec<String>,
    /// System prompt establishing the author's voice.
    pub voice_template: String,
    /// Fixed-length vector summarizing the author's expertise.
    #[serde(default)]
    pub profile_vector: Vec<f32>,
    /// Reference to the author's corpus in the vector store.
    #[serde(default)]
    pub corpus_ref: String,
}

impl Author {
    /// The system prompt used for this author's generations.
    pub fn voice_prompt(&self) -> &str {
        &self.voice_template
    }
}

/// Render a generic voice template for an author without a hand-written one.
///
/// Every rendered template carries the 3-paragraph cap the responder relies on.
pub fn render_voice_template(name: &str, expertise: &[String]) -> String {
    let domains = if expertise.is_empty() {
        "your life's work".to_string()
    } else {
        expertise.join(", ")
    };
    format!(
        "You are {name}. Speak in your own characteristic voice, grounding \
         your arguments in your areas of expertise: {domains}. Engage \
         directly and substantively with the question at hand.\n\n\
         CRITICAL CONSTRAINT: Your response MUST be no more than 3 paragraphs. \
         Be concise and direct."
    )
}

/// One `[[authors]]` entry in a registry file. The voice template and
/// profile vector are optional: a missing template is rendered generically,
/// and a missing profile vector is embedded from `profile_text`.
#[derive(Debug, Clone, Deserialize)]
struct AuthorEntry {
    id: String,
    name: String,
    #[serde(default)]
    expertise: Vec<String>,
    #[serde(default)]
    voice_template: Option<String>,
    #[serde(default)]
    profile_text: Option<String>,
    #[serde(default)]
    profile_vector: Vec<f32>,
    #[serde(default)]
    corpus_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    authors: Vec<AuthorEntry>,
}

/// Process-wide read-only author state.
///
/// Requires no locking: constructed once, then shared behind `Arc`.
pub struct AuthorRegistry {
    authors: Vec<Arc<Author>>,
    by_id: HashMap<String, usize>,
}

impl AuthorRegistry {
    /// Build a registry, rejecting duplicate ids.
    pub fn new(authors: Vec<Author>) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::with_capacity(authors.len());
        let authors: Vec<Arc<Author>> = authors.into_iter().map(Arc::new).collect();
        for (idx, author) in authors.iter().enumerate() {
            if by_id.insert(author.id.clone(), idx).is_some() {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate author id: {}", author.id),
                });
            }
        }
        info!(authors = authors.len(), "Author registry initialized");
        Ok(Self { authors, by_id })
    }

    /// Look up an author by id.
    pub fn get(&self, id: &str) -> Option<Arc<Author>> {
        self.by_id.get(id).map(|&idx| Arc::clone(&self.authors[idx]))
    }

    /// Look up an author by id, mapping a miss to a selection error.
    pub fn require(&self, id: &str) -> Result<Arc<Author>, SelectionError> {
        self.get(id).ok_or_else(|| SelectionError::AuthorNotFound {
            id: id.to_string(),
        })
    }

    /// All authors in registration order.
    pub fn all(&self) -> &[Arc<Author>] {
        &self.authors
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }
}

/// Load an author registry from TOML, filling in missing voice templates
/// and embedding profile texts for entries without an explicit vector.
///
/// This is the one place the registry touches the embedding provider; after
/// construction the registry is immutable.
pub async fn load_registry(
    toml_text: &str,
    embedder: &dyn Embedder,
) -> Result<AuthorRegistry, EngineError> {
    let file: RegistryFile = toml::from_str(toml_text).map_err(|e| ConfigError::ParseError {
        message: format!("author registry: {e}"),
    })?;

    let mut authors = Vec::with_capacity(file.authors.len());
    for entry in file.authors {
        let voice_template = match entry.voice_template {
            Some(t) if !t.trim().is_empty() => t,
            _ => render_voice_template(&entry.name, &entry.expertise),
        };

        let profile_vector = if entry.profile_vector.is_empty() {
            let profile_text = entry.profile_text.clone().unwrap_or_else(|| {
                format!("{} {}", entry.name, entry.expertise.join(" "))
            });
            embedder
                .embed(&profile_text)
                .await
                .map_err(SelectionError::Embedding)?
        } else {
            entry.profile_vector
        };

        debug!(author = entry.id.as_str(), "Loaded author profile");
        authors.push(Author {
            id: entry.id,
            name: entry.name,
            expertise: entry.expertise,
            voice_template,
            profile_vector,
            corpus_ref: entry.corpus_ref.unwrap_or_default(),
        });
    }

    Ok(AuthorRegistry::new(authors)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;

    fn author(id: &str, name: &str) -> Author {
        Author {
            id: id.into(),
            name: name.into(),
            expertise: vec![],
            voice_template: format!("You are {name}."),
            profile_vector: vec![1.0, 0.0],
            corpus_ref: String::new(),
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry =
            AuthorRegistry::new(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")])
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("marx").unwrap().name, "Karl Marx");
        assert!(registry.get("nietzsche").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let result = AuthorRegistry::new(vec![author("marx", "Karl Marx"), author("marx", "K. M.")]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_require_missing_author() {
        let registry = AuthorRegistry::new(vec![author("marx", "Karl Marx")]).unwrap();
        let err = registry.require("baudelaire").unwrap_err();
        match err {
            SelectionError::AuthorNotFound { id } => assert_eq!(id, "baudelaire"),
            other => panic!("expected AuthorNotFound, got {other}"),
        }
    }

    #[test]
    fn test_render_voice_template_mentions_expertise() {
        let t = render_voice_template(
            "Karl Marx",
            &["political economy".to_string(), "class struggle".to_string()],
        );
        assert!(t.contains("Karl Marx"));
        assert!(t.contains("political economy, class struggle"));
        assert!(t.contains("3 paragraphs"));
    }

    #[tokio::test]
    async fn test_load_registry_from_toml() {
        let toml_text = r#"
            [[authors]]
            id = "marx"
            name = "Karl Marx"
            expertise = ["political economy"]
            profile_text = "capital labor class struggle surplus value"
            corpus_ref = "corpus/marx"

            [[authors]]
            id = "whitman"
            name = "Walt Whitman"
            voice_template = "You are Walt Whitman, the poet of democracy."
            profile_text = "poetry democracy nature the body electric"
        "#;

        let embedder = HashEmbedder::new(64);
        let registry = load_registry(toml_text, &embedder).await.unwrap();
        assert_eq!(registry.len(), 2);

        let marx = registry.get("marx").unwrap();
        assert_eq!(marx.profile_vector.len(), 64);
        assert!(marx.voice_template.contains("Karl Marx"));
        assert_eq!(marx.corpus_ref, "corpus/marx");

        let whitman = registry.get("whitman").unwrap();
        assert_eq!(whitman.voice_template, "You are Walt Whitman, the poet of democracy.");
    }

    #[tokio::test]
    async fn test_load_registry_explicit_vector_wins() {
        let toml_text = r#"
            [[authors]]
            id = "marx"
            name = "Karl Marx"
            profile_vector = [0.5, 0.5]
        "#;
        let embedder = HashEmbedder::new(64);
        let registry = load_registry(toml_text, &embedder).await.unwrap();
        assert_eq!(registry.get("marx").unwrap().profile_vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_load_registry_bad_toml() {
        let embedder = HashEmbedder::new(64);
        let result = load_registry("not [ valid toml", &embedder).await;
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::ParseError { .. }))
        ));
    }
}
