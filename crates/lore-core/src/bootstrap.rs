//! Application bootstrap: config resolution, provider and index construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lore_index::{InMemoryIndex, QdrantIndex, VectorIndex};
use lore_llm::AnyProvider;
use lore_llm::ollama::OllamaProvider;
use lore_llm::openai::OpenAiProvider;

use crate::catalog::Catalog;
use crate::chat::ChatService;
use crate::chunker::Chunker;
use crate::config::{Config, IndexBackend, ProviderKind, resolve_config_path};
use crate::ingest::IngestionService;
use crate::loader::LoaderRegistry;
use crate::vault::{EnvVaultProvider, VaultProvider};

pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
}

impl AppBuilder {
    /// Resolve the config path, load it and resolve secrets from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be parsed or validated.
    pub async fn load(cli_path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_vault(cli_path, &EnvVaultProvider).await
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be parsed or validated, or the
    /// vault fails.
    pub async fn load_with_vault(
        cli_path: Option<&Path>,
        vault: &dyn VaultProvider,
    ) -> anyhow::Result<Self> {
        let config_path = resolve_config_path(cli_path);
        let mut config = Config::load(&config_path)?;
        config.resolve_secrets(vault).await?;
        Ok(Self {
            config,
            config_path,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// # Errors
    ///
    /// Returns an error if a backend client cannot be constructed.
    pub fn build(self) -> anyhow::Result<App> {
        let provider = create_provider(&self.config)?;
        let index = create_index(&self.config)?;
        Ok(App::new(provider, index, self.config))
    }
}

/// Services wired to one provider and one index.
pub struct App {
    pub config: Config,
    pub provider: Arc<AnyProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub ingestion: IngestionService<AnyProvider>,
    pub chat: ChatService<AnyProvider>,
    pub catalog: Catalog,
}

impl App {
    #[must_use]
    pub fn new(provider: AnyProvider, index: Arc<dyn VectorIndex>, config: Config) -> Self {
        let provider = Arc::new(provider);
        let chunker = Chunker::new(config.defaults.chunk_size, config.defaults.chunk_overlap);
        let ingestion = IngestionService::new(
            Arc::clone(&provider),
            Arc::clone(&index),
            LoaderRegistry::with_defaults(),
            chunker,
        );
        let chat = ChatService::new(Arc::clone(&provider), Arc::clone(&index), config.defaults);
        let catalog = Catalog::new(Arc::clone(&index));
        Self {
            config,
            provider,
            index,
            ingestion,
            chat,
            catalog,
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// # Errors
///
/// Returns an error if the HTTP client for the provider cannot be built.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    match llm.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &llm.base_url,
            llm.model.clone(),
            llm.embedding_model.clone(),
        ))),
        ProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .map(|s| s.expose().to_owned());
            if api_key.is_none() {
                tracing::warn!(
                    base_url = %llm.base_url,
                    "LORE_OPENAI_API_KEY not set, sending unauthenticated requests"
                );
            }
            let provider = OpenAiProvider::new(
                api_key,
                &llm.base_url,
                llm.model.clone(),
                llm.embedding_model.clone(),
                llm.max_tokens,
                Duration::from_secs(llm.request_timeout_secs),
            )
            .context("failed to build OpenAI-compatible client")?;
            Ok(AnyProvider::OpenAi(provider))
        }
    }
}

/// # Errors
///
/// Returns an error if the Qdrant client cannot be built from the URL.
pub fn create_index(config: &Config) -> anyhow::Result<Arc<dyn VectorIndex>> {
    match config.index.backend {
        IndexBackend::Memory => Ok(Arc::new(InMemoryIndex::new())),
        IndexBackend::Qdrant => {
            let api_key = config
                .secrets
                .qdrant_api_key
                .as_ref()
                .map(|s| s.expose().to_owned());
            let index = QdrantIndex::new(&config.index.url, &config.index.collection, api_key)
                .with_context(|| format!("failed to connect to Qdrant at {}", config.index.url))?;
            Ok(Arc::new(index))
        }
    }
}
