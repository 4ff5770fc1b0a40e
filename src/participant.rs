//! Participant composition root
//!
//! Builds the fence handler, resource manager, parser registry and bean
//! inspector once and wires them together. Nothing in the crate is a global.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{FenceConfig, FenceStoreKind, TccConfig};
use crate::remoting::{
    BeanContainer, LocalTccParser, Protocol, RemotingParser, RemotingParserRegistry,
    RpcRemotingParser, TccBeanInspector,
};
use crate::tcc::error::TccError;
use crate::tcc::fence::{FenceCleanWorker, FenceStore, MemoryFenceStore, PgFenceStore, TccFenceHandler};
use crate::tcc::manager::TccResourceManager;
use crate::tcc::proxy::{FenceTryInterceptor, PassThroughInterceptor, TccActionInterceptor, TccProxy};
use crate::tcc::registrar::ResourceRegistrar;
use crate::tcc::resource::Bean;

/// In-process beans first, then one RPC parser per supported framework
pub fn default_parsers() -> Vec<Arc<dyn RemotingParser>> {
    vec![
        Arc::new(LocalTccParser),
        Arc::new(RpcRemotingParser::new(Protocol::Dubbo)),
        Arc::new(RpcRemotingParser::new(Protocol::SofaRpc)),
        Arc::new(RpcRemotingParser::new(Protocol::Grpc)),
    ]
}

/// Open the configured fence store, `None` if fencing is disabled
pub async fn connect_fence_store(
    config: &FenceConfig,
) -> Result<Option<Arc<dyn FenceStore>>, TccError> {
    if !config.enabled {
        return Ok(None);
    }

    match config.store {
        FenceStoreKind::Memory => Ok(Some(Arc::new(MemoryFenceStore::new()))),
        FenceStoreKind::Postgres => {
            let url = config
                .postgres_url
                .as_deref()
                .ok_or_else(|| TccError::Config("fence.postgres_url is not set".to_string()))?;

            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .map_err(|e| TccError::Config(format!("fence store connect failed: {}", e)))?;

            let store = PgFenceStore::new(pool);
            store
                .ensure_schema()
                .await
                .map_err(|e| TccError::Config(format!("fence schema init failed: {}", e)))?;

            info!("PostgreSQL fence store ready");
            Ok(Some(Arc::new(store)))
        }
    }
}

pub struct TccParticipant {
    fence: Option<Arc<TccFenceHandler>>,
    cleaner: Option<Arc<FenceCleanWorker>>,
    resource_manager: Arc<TccResourceManager>,
    inspector: TccBeanInspector,
}

impl TccParticipant {
    pub fn new(
        config: &TccConfig,
        registrar: Arc<dyn ResourceRegistrar>,
        fence_store: Option<Arc<dyn FenceStore>>,
        parsers: Vec<Arc<dyn RemotingParser>>,
    ) -> Self {
        let fence = fence_store.map(|store| {
            Arc::new(TccFenceHandler::with_suspicious_timeout(
                store,
                config.fence.suspicious_timeout(),
            ))
        });
        let cleaner = fence
            .as_ref()
            .map(|f| Arc::new(FenceCleanWorker::new(f.clone(), config.fence.cleaner())));

        let mut resource_manager = TccResourceManager::new(registrar);
        if let Some(fence) = &fence {
            resource_manager = resource_manager.with_fence(fence.clone());
        }
        let resource_manager = Arc::new(resource_manager);

        let registry = parsers.into_iter().fold(
            RemotingParserRegistry::new(resource_manager.clone())
                .with_resource_group(config.resource_group_id.as_str()),
            |registry, parser| registry.with_parser(parser),
        );

        info!(
            resource_group = %config.resource_group_id,
            parsers = registry.parsers().len(),
            fence = fence.is_some(),
            "TCC participant initialized"
        );

        Self {
            fence,
            cleaner,
            resource_manager,
            inspector: TccBeanInspector::new(Arc::new(registry)),
        }
    }

    /// Build from config with the default parsers and the configured fence store
    pub async fn from_config(
        config: &TccConfig,
        registrar: Arc<dyn ResourceRegistrar>,
    ) -> Result<Self, TccError> {
        let store = connect_fence_store(&config.fence).await?;
        Ok(Self::new(config, registrar, store, default_parsers()))
    }

    pub fn resource_manager(&self) -> &Arc<TccResourceManager> {
        &self.resource_manager
    }

    pub fn registry(&self) -> &Arc<RemotingParserRegistry> {
        self.inspector.registry()
    }

    pub fn inspector(&self) -> &TccBeanInspector {
        &self.inspector
    }

    pub fn fence(&self) -> Option<&Arc<TccFenceHandler>> {
        self.fence.as_ref()
    }

    /// Fenced try interceptor when fencing is on, pass-through otherwise
    pub fn try_interceptor(&self) -> Arc<dyn TccActionInterceptor> {
        match &self.fence {
            Some(fence) => Arc::new(FenceTryInterceptor::new(fence.clone())),
            None => Arc::new(PassThroughInterceptor),
        }
    }

    /// Describe a freshly created container bean and proxy it if eligible
    pub async fn process_bean(
        &self,
        bean: Bean,
        bean_name: &str,
        container: Option<&dyn BeanContainer>,
    ) -> Result<Option<TccProxy>, TccError> {
        self.inspector
            .auto_proxy(bean, bean_name, container, self.try_interceptor())
            .await
    }

    /// Start the fence clean worker, if fencing is on
    pub fn spawn_fence_cleaner(&self) -> Option<JoinHandle<()>> {
        let worker = self.cleaner.clone()?;
        Some(tokio::spawn(async move {
            worker.run().await;
        }))
    }
}
