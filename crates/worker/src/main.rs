//! The CoverCRM event worker.
//!
//! One process per deployment unit: joins the shared consumer group on
//! every consumed stream, drives the handler chain against Postgres, and
//! drains gracefully on SIGINT.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use covercrm_events::{EventKind, EventPublisher, HandlerRegistry, StreamName};
use covercrm_infra::{
    EventAudit, FilesystemContractRenderer, LogMailer, PgCommissionStore, PgDirectory,
    PgPolicyStore, PgQuoteStore, PostgresEventAudit, Publisher, RedisTransport, StreamConsumer,
    WorkerConfig,
};
use covercrm_sales::handlers::{
    BrokerAssignmentHandler, CommissionCalculationHandler, ContractGenerationHandler,
    PolicyCreationHandler, PolicyNotificationHandler, WelcomeEmailHandler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    covercrm_observability::init();
    let config = WorkerConfig::from_env();

    let pool = PgPool::connect(&config.database_url).await?;
    let transport = RedisTransport::connect(&config.redis_url, config.stream_maxlen)?;
    let audit: Arc<dyn EventAudit> = Arc::new(PostgresEventAudit::new(pool.clone()));
    let publisher: Arc<dyn EventPublisher> =
        Arc::new(Publisher::new(transport.clone(), audit.clone()));

    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let quotes = Arc::new(PgQuoteStore::new(pool.clone()));
    let policies = Arc::new(PgPolicyStore::new(pool.clone()));
    let commissions = Arc::new(PgCommissionStore::new(pool));
    let renderer = Arc::new(FilesystemContractRenderer::new(&config.contract_dir));
    let mailer = Arc::new(LogMailer);

    let mut registry = HandlerRegistry::new();
    registry
        .register(
            EventKind::ProspectCreated,
            Arc::new(WelcomeEmailHandler::new(mailer.clone())),
        )
        .register(
            EventKind::ProspectCreated,
            Arc::new(BrokerAssignmentHandler::new(
                directory.clone(),
                mailer.clone(),
            )),
        )
        .register(
            EventKind::QuoteAccepted,
            Arc::new(PolicyCreationHandler::new(
                policies.clone(),
                quotes,
                publisher,
            )),
        )
        .register(
            EventKind::PolicyCreated,
            Arc::new(ContractGenerationHandler::new(policies, renderer)),
        )
        .register(
            EventKind::PolicyCreated,
            Arc::new(CommissionCalculationHandler::new(
                commissions,
                directory.clone(),
                directory.clone(),
            )),
        )
        .register(
            EventKind::PolicyCreated,
            Arc::new(PolicyNotificationHandler::new(directory, mailer)),
        );
    let registry = Arc::new(registry);
    info!(registry = ?registry, "handler registry built");

    let handles: Vec<_> = StreamName::CONSUMED
        .iter()
        .map(|stream| {
            StreamConsumer::new(
                transport.clone(),
                registry.clone(),
                audit.clone(),
                config.clone(),
                *stream,
            )
            .spawn()
        })
        .collect();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining consumers");
    for handle in handles {
        handle.shutdown().await;
    }
    info!("worker stopped");
    Ok(())
}
