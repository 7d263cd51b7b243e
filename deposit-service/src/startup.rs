//! Application startup and lifecycle management.

use crate::clock::{Clock, ControllableClock};
use crate::config::DepositConfig;
use crate::handlers::{admin, health, ledger};
use crate::services::lookups::RequestStreams;
use crate::services::{
    init_metrics, AccountLocks, AccountRepository, AccountService, AccrualEngine,
    BroadcastEventPublisher, CorrelatedLookups, EnquiryCache, InMemoryStore, PgStore,
    PricingRuleResolver, RedemptionEngine, WalletLedger, WalletRepository,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

const REQUEST_CHANNEL_BUFFER: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Backing store selected at startup.
#[derive(Clone)]
pub enum StoreHandle {
    Memory(Arc<InMemoryStore>),
    Postgres(Arc<PgStore>),
}

impl StoreHandle {
    fn accounts(&self) -> Arc<dyn AccountRepository> {
        match self {
            Self::Memory(store) => store.clone(),
            Self::Postgres(store) => store.clone(),
        }
    }

    fn wallets(&self) -> Arc<dyn WalletRepository> {
        match self {
            Self::Memory(store) => store.clone(),
            Self::Postgres(store) => store.clone(),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DepositConfig,
    pub store: StoreHandle,
    pub clock: Arc<ControllableClock>,
    pub wallet: Arc<WalletLedger>,
    pub accounts: Arc<AccountService>,
    pub accrual: Arc<AccrualEngine>,
    pub redemption: Arc<RedemptionEngine>,
    pub events: Arc<BroadcastEventPublisher>,
}

impl AppState {
    /// Wires every engine over `store` with correlated lookups.
    pub fn assemble(
        config: DepositConfig,
        store: StoreHandle,
        clock: Arc<ControllableClock>,
        lookups: &CorrelatedLookups,
    ) -> Self {
        let business_clock: Arc<dyn Clock> = clock.clone();
        let accounts_store = store.accounts();
        let locks = AccountLocks::new();
        let cache = Arc::new(EnquiryCache::new());
        let events = Arc::new(BroadcastEventPublisher::new(EVENT_CHANNEL_CAPACITY));

        let pricing = Arc::new(PricingRuleResolver::new(lookups.catalog.clone()));
        let wallet = Arc::new(WalletLedger::new(
            store.wallets(),
            lookups.customers.clone(),
            business_clock.clone(),
            config.treasury.customer_id.clone(),
            config.treasury.currency.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            accounts_store.clone(),
            lookups.catalog.clone(),
            lookups.customers.clone(),
            lookups.calculator.clone(),
            pricing.clone(),
            locks.clone(),
            cache.clone(),
            business_clock.clone(),
        ));
        let accrual = Arc::new(AccrualEngine::new(
            accounts_store.clone(),
            wallet.clone(),
            pricing,
            lookups.catalog.clone(),
            locks.clone(),
            cache.clone(),
            business_clock.clone(),
            config.accrual.max_catch_up_iterations,
        ));
        let redemption = Arc::new(RedemptionEngine::new(
            accounts_store,
            wallet.clone(),
            events.clone(),
            locks,
            cache,
            business_clock,
        ));

        Self {
            config,
            store,
            clock,
            wallet,
            accounts,
            accrual,
            redemption,
            events,
        }
    }

    pub async fn store_health(&self) -> Result<(), AppError> {
        match &self.store {
            StoreHandle::Memory(_) => Ok(()),
            StoreHandle::Postgres(pg) => pg.health_check().await,
        }
    }

    pub fn store_kind(&self) -> &'static str {
        match &self.store {
            StoreHandle::Memory(_) => "memory",
            StoreHandle::Postgres(_) => "postgres",
        }
    }
}

/// HTTP surface: probes, metrics, reconciliation summary, admin clock.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/ledger/summary", get(ledger::ledger_summary))
        .route("/admin/clock", get(admin::get_clock))
        .route("/admin/clock/set", post(admin::set_clock))
        .route("/admin/clock/advance", post(admin::advance_clock))
        .route("/admin/clock/reset", post(admin::reset_clock))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    request_streams: RequestStreams,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: DepositConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = match &config.database {
            Some(database) => {
                let pg = PgStore::new(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                pg.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                StoreHandle::Postgres(Arc::new(pg))
            }
            None => {
                tracing::warn!("DATABASE_URL not set - using the in-memory store");
                StoreHandle::Memory(Arc::new(InMemoryStore::new()))
            }
        };

        let lookups =
            CorrelatedLookups::over_channels(config.correlator.timeout, REQUEST_CHANNEL_BUFFER);
        let clock = Arc::new(ControllableClock::new());
        let state = AppState::assemble(config.clone(), store, clock, &lookups);

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, store = state.store_kind(), "Deposit service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
            request_streams: lookups.streams,
        })
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let cancel = CancellationToken::new();
        // Stops the scheduler however this future ends, including being dropped.
        let _stop_scheduler = cancel.clone().drop_guard();

        // No message transport is bridged in-process; callers time out and degrade.
        tracing::warn!("No transport bridge attached - lookups will time out and degrade");
        self.request_streams.drain_unbridged();

        let scheduler = self
            .state
            .accrual
            .clone()
            .spawn(self.state.config.accrual.interval, cancel.clone());

        let app = router(self.state);

        tracing::info!(
            service = "deposit-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, app).await;
        cancel.cancel();
        scheduler.await.ok();

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
