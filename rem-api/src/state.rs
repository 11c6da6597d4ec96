//! Service container
//!
//! All process-wide services, initialized once at startup and passed into
//! each request scope. No ambient globals: the container owns the pool, the
//! descriptor registry, the query engine, the tool registry, and the agent
//! factory; the embedding worker is returned separately so the server can
//! drive its lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use rem_agents::{
    AgentContext, AgentFactory, AgentMomentExtractor, AskRemTool, AskService, CreateMomentTool,
    CreateResourceTool, DownloadFileTool, LocalFileStore, MomentBuilder, MomentBuilderConfig,
    ProcessDefaults, ProviderMap, QueryPlanner, RemQueryTool, SchemaLoader, ToolRegistry,
    UpdateGraphEdgesTool, UploadFileTool,
};
use rem_context::{ContextAssembler, SessionMessageStore};
use rem_core::{ModelRegistry, RemResult, ValidationError};
use rem_llm::{OpenAiChatProvider, OpenAiConfig, OpenAiEmbeddingProvider};
use rem_query::{PgBackend, RemEngine};
use rem_storage::{
    Db, DbConfig, EmbeddingQueue, EmbeddingWorker, Repository, SchemaGenerator, WorkerConfig,
};

use crate::ApiConfig;

/// Process-wide services, write-once at startup.
pub struct ServiceContainer {
    pub config: ApiConfig,
    pub db: Db,
    pub registry: Arc<ModelRegistry>,
    pub engine: RemEngine,
    pub tools: Arc<ToolRegistry>,
    pub factory: Arc<AgentFactory>,
    pub ask: Arc<AskService>,
    pub embedding_queue: EmbeddingQueue,
    pub moment_config: MomentBuilderConfig,
    repositories: HashMap<String, Repository>,
}

/// Shared handle passed to every request handler.
pub type AppState = Arc<ServiceContainer>;

impl ServiceContainer {
    /// Build all services from the environment. Returns the embedding
    /// worker separately; the caller starts it and stops it on shutdown.
    pub async fn from_env() -> RemResult<(Self, EmbeddingWorker)> {
        let config = ApiConfig::from_env();
        let db = Db::from_config(&DbConfig::from_env())?;
        let registry = Arc::new(ModelRegistry::core());

        let openai = OpenAiConfig::from_env();
        let embedder = Arc::new(OpenAiEmbeddingProvider::new(openai.clone()));
        let mut worker = EmbeddingWorker::new(
            db.clone(),
            embedder.clone(),
            WorkerConfig::from_env(),
        );
        worker.start();
        let embedding_queue = worker.queue();

        let mut repositories = HashMap::new();
        for descriptor in registry.descriptors() {
            repositories.insert(
                descriptor.table_name.clone(),
                Repository::new(db.clone(), descriptor.clone())
                    .with_embedding_queue(embedding_queue.clone()),
            );
        }

        let backend = Arc::new(PgBackend::new(db.clone(), Arc::clone(&registry)));
        let engine = RemEngine::new(backend, Arc::clone(&registry), embedder);

        // Tool registry from the static manifest; registration is idempotent.
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(RemQueryTool::new(engine.clone())));
        tools.register(Arc::new(CreateResourceTool::new(
            repositories["resources"].clone(),
        )));
        tools.register(Arc::new(CreateMomentTool::new(
            repositories["moments"].clone(),
        )));
        tools.register(Arc::new(UpdateGraphEdgesTool::new(repositories.clone())));
        let file_store = Arc::new(LocalFileStore::new(
            std::env::var("REM_FILE_STORE_DIR")
                .unwrap_or_else(|_| "/tmp/rem-files".to_string())
                .into(),
        ));
        tools.register(Arc::new(UploadFileTool::new(
            repositories["files"].clone(),
            file_store.clone(),
        )));
        tools.register(Arc::new(DownloadFileTool::new(file_store)));

        let chat_provider = Arc::new(OpenAiChatProvider::new(openai));
        let providers = Arc::new(
            ProviderMap::new()
                .insert("openai", chat_provider.clone())
                .with_fallback(chat_provider),
        );
        let factory = Arc::new(AgentFactory::new(
            Arc::new(SchemaLoader::from_env()),
            Arc::clone(&tools),
            providers,
            ProcessDefaults::from_env(),
        ));

        let ask = Arc::new(AskService::new(
            QueryPlanner::new(Arc::clone(&factory)),
            engine.clone(),
        ));
        // The ask tool closes the loop: agents can plan-and-execute too.
        tools.register(Arc::new(AskRemTool::new(Arc::clone(&ask))));

        let container = Self {
            config,
            db,
            registry,
            engine,
            tools,
            factory,
            ask,
            embedding_queue,
            moment_config: MomentBuilderConfig::from_env(),
            repositories,
        };
        Ok((container, worker))
    }

    /// Repository for an entity table.
    pub fn repository(&self, table: &str) -> RemResult<&Repository> {
        self.repositories
            .get(table)
            .ok_or_else(|| ValidationError::UnknownTable {
                table: table.to_string(),
            }
            .into())
    }

    /// Session store scoped to one tenant.
    pub fn session_store(&self, tenant_id: &str) -> SessionMessageStore {
        SessionMessageStore::new(self.repositories["messages"].clone(), tenant_id)
    }

    /// Context assembler scoped to one tenant.
    pub fn assembler(&self, tenant_id: &str) -> ContextAssembler {
        ContextAssembler::new(
            self.session_store(tenant_id),
            self.repositories["users"].clone(),
        )
    }

    /// Moment builder scoped to one caller context.
    pub fn moment_builder(&self, context: &AgentContext) -> MomentBuilder {
        MomentBuilder::new(
            self.repositories["moments"].clone(),
            self.repositories["messages"].clone(),
            self.repositories["sessions"].clone(),
            self.repositories["users"].clone(),
            Arc::new(AgentMomentExtractor::new(
                Arc::clone(&self.factory),
                context.clone(),
            )),
            self.moment_config.clone(),
            context.tenant_id.clone(),
        )
    }

    /// Schema generator over the live registry.
    pub fn schema_generator(&self) -> SchemaGenerator {
        SchemaGenerator::new((*self.registry).clone())
    }
}
