//! Knowledge-store path resolution and engine assembly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use unbrowser::config::EngineConfig;
use unbrowser::store::open_store;
use unbrowser::{KnowledgeBase, ProxyProvider, TierOrchestrator};

use crate::executors::{HttpFetcher, IntelligenceExecutor, LightweightExecutor, UnavailableBrowser};
use crate::proxy::StaticProxyPool;

const STORE_ENV: &str = "UNBROWSER_STORE";
const CONFIG_ENV: &str = "UNBROWSER_CONFIG";
const LOCAL_STORE: &str = ".unbrowser/knowledge.json";

/// Resolve the knowledge-store path: explicit flag, then `UNBROWSER_STORE`,
/// then `./.unbrowser/knowledge.json` if it exists, then the home directory.
pub fn resolve_store_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(STORE_ENV) {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }

    let local = PathBuf::from(LOCAL_STORE);
    if local.exists() {
        return local;
    }

    default_store_path()
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(LOCAL_STORE)
}

/// Engine settings: a JSON file named by `UNBROWSER_CONFIG` if set, else the
/// environment overlay on the selected profile.
pub fn load_engine_config() -> anyhow::Result<EngineConfig> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => EngineConfig::load(Path::new(&path))
            .with_context(|| format!("failed to load engine config from {path}")),
        _ => Ok(EngineConfig::from_env()),
    }
}

/// Open the knowledge base at `path`, creating its directory if needed.
pub fn open_knowledge(path: &Path, config: &EngineConfig) -> anyhow::Result<Arc<KnowledgeBase>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = open_store(path, Duration::from_millis(config.flush_interval_ms))
        .with_context(|| format!("failed to open knowledge store {}", path.display()))?;
    Ok(Arc::new(KnowledgeBase::new(store, config.knowledge.clone())))
}

/// Wire the HTTP-backed executors into an orchestrator.
pub fn build_orchestrator(
    knowledge: Arc<KnowledgeBase>,
    config: EngineConfig,
    proxies: &[String],
) -> anyhow::Result<TierOrchestrator> {
    let http = HttpFetcher::new(Duration::from_millis(config.default_max_latency_ms))
        .context("failed to build HTTP client")?;

    let mut lightweight = LightweightExecutor::new(http.clone());
    if !proxies.is_empty() {
        let pool: Arc<dyn ProxyProvider> = Arc::new(StaticProxyPool::new(proxies.iter().cloned()));
        lightweight = lightweight.with_proxies(pool);
        tracing::info!(count = proxies.len(), "proxy pool enabled");
    }

    Ok(TierOrchestrator::new(knowledge, config)
        .with_executor(Arc::new(IntelligenceExecutor::new(http)))
        .with_executor(Arc::new(lightweight))
        .with_executor(Arc::new(UnavailableBrowser)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        assert_eq!(
            resolve_store_path(Some("/tmp/custom.db")),
            PathBuf::from("/tmp/custom.db")
        );
    }

    #[test]
    fn test_default_path_under_home() {
        let path = default_store_path();
        assert!(path.ends_with(".unbrowser/knowledge.json"));
    }

    #[tokio::test]
    async fn test_open_knowledge_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/knowledge.db");
        let knowledge = open_knowledge(&path, &EngineConfig::default()).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(knowledge.domains().await.unwrap().is_empty());
    }
}
