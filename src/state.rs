use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::ApiResult;
use crate::identity::TokenSigner;
use crate::providers::claude::ClaudeClient;
use crate::providers::gemini::GeminiClient;
use crate::store::downloads::DownloadTokens;
use crate::store::{MemoryRecordStore, MemoryUserStore, RecordStore, UserStore};
use crate::usage::UsageGate;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Account storage
    pub users: Arc<dyn UserStore>,

    /// Usage record storage
    pub records: Arc<dyn RecordStore>,

    /// Single-use download tokens
    pub downloads: Arc<DownloadTokens>,

    /// Access token issuing/verification
    pub signer: Arc<TokenSigner>,

    /// Gemini request builder
    pub gemini: Arc<GeminiClient>,

    /// Claude request builder
    pub claude: Arc<ClaudeClient>,

    /// Anonymous quota gate
    pub usage: Arc<UsageGate>,
}

impl AppState {
    /// Create new application state, ensuring the working directories exist.
    pub fn new(config: AppConfig) -> ApiResult<Self> {
        std::fs::create_dir_all(&config.generated_dir)?;
        std::fs::create_dir_all(&config.uploads_dir)?;

        let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());

        let signer = Arc::new(TokenSigner::new(
            &config.token_secret,
            std::time::Duration::from_secs(config.access_token_ttl_secs),
        ));
        let gemini = Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_text_model.clone(),
            config.gemini_image_model.clone(),
            config.gemini_timeout(),
        ));
        let claude = Arc::new(ClaudeClient::new(
            config.claude_api_key.clone(),
            config.claude_model.clone(),
            config.claude_api_url.clone(),
            config.claude_timeout(),
        ));
        let usage = Arc::new(UsageGate::new(records.clone(), config.anonymous_quota));
        let downloads = Arc::new(DownloadTokens::new(config.download_token_ttl()));

        Ok(Self {
            config: Arc::new(config),
            users,
            records,
            downloads,
            signer,
            gemini,
            claude,
            usage,
        })
    }

    pub fn generated_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.generated_dir)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.uploads_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_creates_working_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            generated_dir: dir.path().join("gen").to_string_lossy().into_owned(),
            uploads_dir: dir.path().join("up").to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let state = AppState::new(config).unwrap();
        assert!(state.generated_dir().is_dir());
        assert!(state.uploads_dir().is_dir());
    }
}
