use std::str::FromStr;

use super::{Config, IndexBackend, ProviderKind};

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    if let Ok(value) = raw.trim().parse::<T>() {
        Some(value)
    } else {
        tracing::warn!("ignoring invalid {key} value: {raw}");
        None
    }
}

fn enum_value<T: serde::de::DeserializeOwned>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    if let Ok(value) = serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase()))
    {
        Some(value)
    } else {
        tracing::warn!("ignoring invalid {key} value: {raw}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(kind) = enum_value::<ProviderKind>("LORE_LLM_PROVIDER") {
            self.llm.provider = kind;
        }
        if let Ok(v) = std::env::var("LORE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("LORE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LORE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Some(backend) = enum_value::<IndexBackend>("LORE_INDEX_BACKEND") {
            self.index.backend = backend;
        }
        if let Ok(v) = std::env::var("LORE_QDRANT_URL") {
            self.index.url = v;
        }
        if let Ok(v) = std::env::var("LORE_QDRANT_COLLECTION") {
            self.index.collection = v;
        }
        if let Some(size) = parsed("LORE_CHUNK_SIZE") {
            self.defaults.chunk_size = size;
        }
        if let Some(overlap) = parsed("LORE_CHUNK_OVERLAP") {
            self.defaults.chunk_overlap = overlap;
        }
        if let Some(top_k) = parsed("LORE_TOP_K") {
            self.defaults.top_k = top_k;
        }
        if let Some(temperature) = parsed("LORE_TEMPERATURE") {
            self.defaults.temperature = temperature;
        }
        if let Ok(v) = std::env::var("LORE_GATEWAY_BIND") {
            self.gateway.bind = v;
        }
        if let Some(port) = parsed("LORE_GATEWAY_PORT") {
            self.gateway.port = port;
        }
    }
}
