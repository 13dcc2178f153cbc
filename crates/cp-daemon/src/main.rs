// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use cp_backend::BackendRegistry;
use cp_backend_hosted::HostedBackend;
use cp_backend_local::LocalBackend;
use cp_backend_mock::MockBackend;
use cp_config::{validate_config, BackendEntry};
use cp_daemon::{build_app, AppState, HostClient};
use cp_knowledge::KnowledgeStore;
use cp_orchestrator::Orchestrator;
use cp_registry::OperatorRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cp-daemon", version, about = "comfy-pilot HTTP daemon")]
struct Args {
    /// Path to a TOML config file; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config file.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = cp_config::load_config(args.config.as_deref())
        .with_context(|| "load comfy-pilot configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let filter = if args.debug {
        EnvFilter::new("cp=debug,cp_daemon=debug")
    } else {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for warning in validate_config(&config).context("invalid comfy-pilot configuration")? {
        warn!(%warning, "configuration warning");
    }

    let operator_registry = Arc::new(OperatorRegistry::new(config.host_base_url.clone()));
    if !operator_registry.fetch().await {
        warn!(host = %config.host_base_url, "initial operator registry fetch failed; will retry opportunistically");
    }

    let mut knowledge_store = KnowledgeStore::new(config.knowledge_dir.clone());
    knowledge_store
        .load_all()
        .with_context(|| format!("load knowledge documents from {}", config.knowledge_dir))?;
    let knowledge = Arc::new(knowledge_store);

    let backends = Arc::new(build_backend_registry(&config.backends));

    let host_client = Arc::new(HostClient::new(config.host_base_url.clone(), Arc::clone(&operator_registry)));

    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::clone(&backends),
            Arc::clone(&operator_registry),
            Arc::clone(&knowledge),
            Arc::clone(&host_client),
        )
        .with_max_correction_retries(config.max_correction_retries),
    );

    let state = Arc::new(AppState {
        orchestrator,
        operator_registry,
        knowledge,
        backends,
        host_client,
    });

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("bind {}", config.bind_address))?;
    info!(bind = %config.bind_address, host = %config.host_base_url, "cp-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

fn build_backend_registry(backends: &std::collections::BTreeMap<String, BackendEntry>) -> BackendRegistry {
    let registry = BackendRegistry::new();
    for (name, entry) in backends {
        match entry {
            BackendEntry::Mock {} => {
                registry.register(Arc::new(MockBackend::new(name.clone(), name.clone())));
            }
            BackendEntry::Local { base_url, models } => {
                let backend = LocalBackend::new(base_url.clone()).with_models(models.clone());
                registry.register(Arc::new(backend));
            }
            BackendEntry::Hosted {
                base_url,
                api_key_env,
                models,
            } => match std::env::var(api_key_env) {
                Ok(api_key) => {
                    let backend = HostedBackend::new(base_url.clone(), api_key).with_models(models.clone());
                    registry.register(Arc::new(backend));
                }
                Err(_) => {
                    warn!(backend = %name, env_var = %api_key_env, "skipping hosted backend: API key env var not set");
                }
            },
        }
    }
    registry
}
