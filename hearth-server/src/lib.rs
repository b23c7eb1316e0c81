//! hearth - resource-agnostic FHIR R4 platform core
//!
//! The HTTP surface of the platform: Bundle engine, message engine, bulk
//! export, document assembly, questionnaire population, code translation,
//! CDS Hooks, and the metadata family, all over host-supplied backends.

pub mod bundle;
pub mod cds;
pub mod config;
pub mod content;
pub mod export;
pub mod handlers;
pub mod head;
pub mod message;
pub mod request_log;
pub mod respond;

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{delete, get, post},
};
use hearth_backend::{
    EntryProcessor, MemoryBackend, ReferenceResolver, SearchDelegate,
};
use hearth_core::{CapabilityBuilder, ProfileRegistry, ServerOperation, TranslateRegistry};
use std::sync::{Arc, RwLock};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use cds::CdsRegistry;
use config::ServerConfig;
use export::ExportManager;
use head::HeadCache;
use message::MessageRegistry;
use request_log::RequestLogger;

/// Application state
pub struct AppState {
    pub config: ServerConfig,
    pub capability: CapabilityBuilder,
    pub profiles: RwLock<ProfileRegistry>,
    pub translate: RwLock<TranslateRegistry>,
    pub processor: Arc<dyn EntryProcessor>,
    pub resolver: Arc<dyn ReferenceResolver>,
    pub search: Arc<dyn SearchDelegate>,
    pub export: ExportManager,
    pub messages: MessageRegistry,
    pub cds: CdsRegistry,
    pub request_log: RequestLogger,
    pub head_cache: HeadCache,
}

/// Resource types the scaffold wires exporters and capabilities for.
pub const SUPPORTED_RESOURCE_TYPES: &[&str] = &[
    "Patient",
    "Observation",
    "Encounter",
    "Condition",
    "Practitioner",
    "Organization",
    "AllergyIntolerance",
    "DiagnosticReport",
    "Immunization",
    "MedicationRequest",
    "Procedure",
    "Composition",
    "Questionnaire",
];

/// Register the default capability model for the scaffold backend.
fn seed_capability(capability: &CapabilityBuilder, config: &ServerConfig) {
    for resource_type in SUPPORTED_RESOURCE_TYPES {
        capability.add_resource(
            resource_type,
            &["read", "create", "update", "patch", "delete", "search-type"],
            &[("_id", "token"), ("_lastUpdated", "date")],
        );
    }
    capability.add_server_operation(ServerOperation {
        name: "export".to_string(),
        definition: "http://hl7.org/fhir/uv/bulkdata/OperationDefinition/export".to_string(),
    });
    capability.add_server_operation(ServerOperation {
        name: "process-message".to_string(),
        definition: "http://hl7.org/fhir/OperationDefinition/MessageHeader-process-message"
            .to_string(),
    });
    capability.add_server_operation(ServerOperation {
        name: "convert".to_string(),
        definition: "http://hl7.org/fhir/OperationDefinition/Resource-convert".to_string(),
    });
    if !config.oauth.authorize_url.is_empty() || !config.oauth.token_url.is_empty() {
        capability.set_oauth_uris(&config.oauth.authorize_url, &config.oauth.token_url);
    }
}

/// Build an application state wired to the in-memory scaffold backend.
///
/// The backend is returned alongside so callers (tests, demos) can seed
/// resources and groups directly.
pub fn scaffold_state(config: ServerConfig) -> (Arc<AppState>, MemoryBackend) {
    let backend = MemoryBackend::new();

    let capability = CapabilityBuilder::new(config.base_url(), env!("CARGO_PKG_VERSION"));
    seed_capability(&capability, &config);

    let export = ExportManager::new(
        config.export.max_concurrent_jobs,
        config.export.job_ttl_hours,
        &config.export.base_path,
    );
    for resource_type in SUPPORTED_RESOURCE_TYPES {
        export.register_exporter(resource_type, Arc::new(backend.exporter(resource_type)));
    }
    export.set_group_resolver(Arc::new(backend.clone()));

    let (request_log, mut log_rx) = RequestLogger::new(config.log.request_log_capacity);
    // default sink: drain records into the structured log
    tokio::spawn(async move {
        while let Some(record) = log_rx.recv().await {
            tracing::debug!(
                interaction = record.interaction.as_str(),
                path = %record.path,
                status = record.status_code,
                "request record"
            );
        }
    });

    let state = Arc::new(AppState {
        config,
        capability,
        profiles: RwLock::new(ProfileRegistry::with_builtins()),
        translate: RwLock::new(TranslateRegistry::with_builtins()),
        processor: Arc::new(backend.clone()),
        resolver: Arc::new(backend.clone()),
        search: Arc::new(backend.clone()),
        export,
        messages: MessageRegistry::new(),
        cds: CdsRegistry::new(),
        request_log,
        head_cache: HeadCache::default(),
    });
    (state, backend)
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::metadata::health_check))
        // Bundle engine
        .route("/", post(bundle::process_bundle))
        // Metadata
        .route("/metadata", get(handlers::metadata::capability_statement))
        .route("/metadata/resources", get(handlers::metadata::list_resources))
        .route(
            "/metadata/resources/{type}",
            get(handlers::metadata::resource_capability),
        )
        .route("/metadata/operations", get(handlers::metadata::list_operations))
        .route(
            "/metadata/search-params",
            get(handlers::metadata::list_search_params)
                .post(handlers::metadata::register_search_param),
        )
        .route(
            "/metadata/search-params/{type}/{name}",
            delete(handlers::metadata::delete_search_param),
        )
        // Messaging
        .route("/$process-message", post(message::process_message))
        // Format normalization
        .route("/$convert", post(content::convert))
        // Terminology translation
        .route(
            "/ConceptMap/$translate",
            get(handlers::translate::translate_get).post(handlers::translate::translate_post),
        )
        .route(
            "/ConceptMap/{id}/$translate",
            get(handlers::translate::translate_instance),
        )
        // Profiles
        .route("/StructureDefinition", get(handlers::profiles::list_profiles))
        .route("/StructureDefinition/{id}", get(handlers::profiles::get_profile))
        .route("/$validate", post(handlers::profiles::validate))
        // Documents
        .route("/Composition/$document", post(handlers::document::generate))
        .route(
            "/Composition/{id}/$document",
            get(handlers::document::generate_by_id),
        )
        // Questionnaire population
        .route(
            "/Questionnaire/{id}/$populate",
            post(handlers::populate::populate_questionnaire),
        )
        // Compartment search
        .route(
            "/Patient/{id}/{type}",
            post(handlers::compartment::compartment_search),
        )
        // Bulk data
        .route(
            "/$export",
            get(export::handlers::kickoff_system).post(export::handlers::kickoff_system),
        )
        .route(
            "/Patient/$export",
            get(export::handlers::kickoff_all_patients)
                .post(export::handlers::kickoff_all_patients),
        )
        .route(
            "/Patient/{id}/$export",
            get(export::handlers::kickoff_patient).post(export::handlers::kickoff_patient),
        )
        .route(
            "/Group/{id}/$export",
            get(export::handlers::kickoff_group).post(export::handlers::kickoff_group),
        )
        .route(
            "/$export-status/{id}",
            get(export::handlers::status).delete(export::handlers::delete),
        )
        .route("/$export-data/{id}/{type}", get(export::handlers::data))
        .route("/$import", post(handlers::import::import))
        // CDS Hooks
        .route("/cds-services", get(cds::discovery))
        .route("/cds-services/{id}", post(cds::invoke))
        .route("/cds-services/{id}/feedback", post(cds::feedback))
        // Middleware (innermost first)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            content::negotiate_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), head::head_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log::log_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(16 * 1024 * 1024)) // 16MB
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
