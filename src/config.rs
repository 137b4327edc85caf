use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the backup and vector store files live
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Embedding provider configuration
    pub llm: LlmConfig,
    /// Bearer token verification
    pub auth: AuthConfig,
    /// Rebuild batching and streaming limits
    pub rebuild: RebuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the embedding API
    pub base_url: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the token issuer.
    pub secret_key: String,
    /// Lifetime of tokens signed by [`crate::api::auth::issue_access_token`].
    pub access_token_expire_minutes: u64,
}

impl AuthConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_expire_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    pub default_batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Upper bound on a streamed rebuild before it is failed with a timeout.
    pub stream_timeout_secs: u64,
    /// Interval of SSE keep-alive comments.
    pub keep_alive_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8000".to_string(),
            llm: LlmConfig::default(),
            auth: AuthConfig::default(),
            rebuild: RebuildConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            api_key: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            access_token_expire_minutes: 30,
        }
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 100,
            min_batch_size: 10,
            max_batch_size: 1000,
            stream_timeout_secs: 600,
            keep_alive_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("VECTOR_REBUILD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("VECTOR_REBUILD_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }

        if let Ok(secret) = std::env::var("SECRET_KEY") {
            config.auth.secret_key = secret;
        }
        if let Ok(val) = std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            if let Ok(v) = val.parse() {
                config.auth.access_token_expire_minutes = v;
            }
        }

        if let Ok(val) = std::env::var("REBUILD_DEFAULT_BATCH_SIZE") {
            if let Ok(v) = val.parse::<usize>() {
                config.rebuild.default_batch_size =
                    v.clamp(config.rebuild.min_batch_size, config.rebuild.max_batch_size);
            }
        }
        if let Ok(val) = std::env::var("REBUILD_STREAM_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.rebuild.stream_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("REBUILD_KEEP_ALIVE_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.rebuild.keep_alive_secs = v.max(1);
            }
        }

        config
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backup")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

/// Connection settings for [`crate::client::RebuildClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend API, without the `/rag` prefix
    pub base_url: String,
    /// Bearer token sent on every request
    pub token: Option<String>,
    pub connect_timeout_secs: u64,
    /// Timeout for non-streaming calls. Streams are bounded by the server.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("RAG_API_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(token) = std::env::var("RAG_API_TOKEN") {
            config.token = Some(token);
        }
        if let Ok(val) = std::env::var("RAG_API_CONNECT_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.connect_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_API_REQUEST_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.request_timeout_secs = v;
            }
        }

        config
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
