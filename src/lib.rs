//! egressguard -- egress anomaly detection and remediation for the research
//! workbench.
//!
//! This crate ingests anomalous-egress signals from the upstream traffic
//! monitor, deduplicates them into persisted events, clusters each user's
//! history into incidents, evaluates an escalating policy ladder, and
//! executes remediation (compute suspension, account disablement) with
//! idempotent status transitions, retrying downstream calls, and debounced
//! notification emails.

pub mod api;
pub mod clients;
pub mod config;
pub mod detect;
pub mod policy;
pub mod queue;
pub mod remediate;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::api::state::AppState;
use crate::clients::accounts::HttpAccountService;
use crate::clients::compute::HttpComputeControl;
use crate::clients::mail::HttpMailer;
use crate::clients::ticket::HttpTicketing;
use crate::config::AppConfig;
use crate::detect::dedup::Deduplicator;
use crate::detect::VmNameResolver;
use crate::queue::TaskQueue;
use crate::remediate::executor::{RemediationConfig, RemediationExecutor};
use crate::remediate::notify::Notifier;
use crate::remediate::Collaborators;
use crate::storage::EventStore;

/// Start the egressguard daemon: ingest API plus remediation worker.
pub async fn serve(cfg: AppConfig) -> Result<()> {
    tracing::info!(db_path = %cfg.database.path, "initializing database");
    let pool = storage::open_pool(&cfg.database.path)?;
    let store = EventStore::new(pool.clone());
    let queue = TaskQueue::new(pool);

    let http = clients::build_http_client(Duration::from_secs(cfg.services.request_timeout_secs))?;
    let accounts = Arc::new(HttpAccountService::new(
        http.clone(),
        cfg.services.accounts_base_url.clone(),
        cfg.retry.clone(),
    ));
    let ticketing = Arc::new(HttpTicketing::new(
        http.clone(),
        cfg.services.ticketing_base_url.clone(),
        cfg.retry.clone(),
    ));
    let collaborators = Collaborators {
        compute: Arc::new(HttpComputeControl::new(
            http.clone(),
            cfg.services.compute_base_url.clone(),
            cfg.retry.clone(),
        )),
        accounts: accounts.clone(),
        bypass: accounts,
        mailer: Arc::new(HttpMailer::new(
            http,
            cfg.services.mail_base_url.clone(),
            cfg.retry.clone(),
        )),
        ticketing: ticketing.clone(),
    };

    let notifier = Notifier::new(
        store.clone(),
        collaborators.mailer.clone(),
        chrono::Duration::seconds(cfg.notification.cooldown_secs),
        cfg.notification.support_email.clone(),
    );
    let executor = Arc::new(RemediationExecutor::new(
        store.clone(),
        collaborators,
        notifier,
        RemediationConfig::from_app(&cfg),
    ));

    let worker_queue = queue.clone();
    let worker_cfg = cfg.tasks.clone();
    tokio::spawn(async move {
        queue::run_worker_loop(worker_queue, executor, worker_cfg).await;
    });

    let deduplicator = Arc::new(Deduplicator::new(
        store.clone(),
        queue.clone(),
        Arc::new(VmNameResolver::new(cfg.resolver.vm_prefix.clone())),
        ticketing,
    ));
    let app = api::router(AppState {
        store,
        queue,
        deduplicator,
    });

    let addr: std::net::SocketAddr = cfg.server.bind.parse()?;
    tracing::info!(%addr, "egressguard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
