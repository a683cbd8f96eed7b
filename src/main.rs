use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use wxpay_callback_service::config::StorageBackend;
use wxpay_callback_service::http::{router, AppState};
use wxpay_callback_service::logging::init_tracing;
use wxpay_callback_service::notify::{NotificationCodec, NotifyVerifier};
use wxpay_callback_service::shopping::{
    AccessTokenSource, RedisAccessTokenSource, StaticAccessTokenSource, WxShoppingInfoUploader,
};
use wxpay_callback_service::store::{
    self, InMemoryNotificationStore, InMemoryOrderStore, NotificationStore, OrderStore,
    PgNotificationStore, PgOrderStore,
};
use wxpay_callback_service::task_pool::TaskPool;
use wxpay_callback_service::{
    LifecycleSettings, NotificationProcessor, OrderLifecycleManager, ServiceConfig, WxPayClient,
};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

/// `--config <path>` wins over `WXPAY_CONFIG`.
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
    }
    std::env::var("WXPAY_CONFIG").ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cfg = ServiceConfig::load(config_path().as_deref()).context("load configuration")?;
    init_tracing(&cfg.log).context("install tracing subscriber")?;
    info!(mch_id = %cfg.merchant.mch_id, "starting wxpay callback service");

    let private_key_pem = cfg.read_private_key_pem()?;
    let client = Arc::new(
        WxPayClient::new(cfg.client_config(private_key_pem)?)
            .await
            .context("initialise gateway client")?,
    );

    let (orders, notifications): (Arc<dyn OrderStore>, Arc<dyn NotificationStore>) =
        match cfg.storage.backend {
            StorageBackend::Memory => {
                warn!("using in-memory storage, data is lost on restart");
                (
                    Arc::new(InMemoryOrderStore::new()),
                    Arc::new(InMemoryNotificationStore::new()),
                )
            }
            StorageBackend::Postgres => {
                let url = cfg
                    .storage
                    .database_url
                    .as_deref()
                    .context("storage.database_url is not set")?;
                let pool = store::connect(url, cfg.storage.max_connections).await?;
                (
                    Arc::new(PgOrderStore::new(pool.clone())),
                    Arc::new(PgNotificationStore::new(pool)),
                )
            }
        };

    let tokens: Arc<dyn AccessTokenSource> = match &cfg.cache.redis_url {
        Some(url) => Arc::new(RedisAccessTokenSource::connect(url).await?),
        None => {
            warn!("cache.redis_url is not set, shopping info uploads are disabled");
            Arc::new(StaticAccessTokenSource::new())
        }
    };
    let uploader = Arc::new(WxShoppingInfoUploader::new(tokens)?);

    let tasks = Arc::new(TaskPool::new(
        cfg.task_pool.workers,
        cfg.task_pool.capacity,
        cfg.task_pool.overflow,
    ));

    let lifecycle = Arc::new(OrderLifecycleManager::new(
        client.clone(),
        orders.clone(),
        client.signing_key(),
        LifecycleSettings {
            merchant_id: cfg.merchant.mch_id.clone(),
            notify_url: cfg.merchant.notify_url.clone(),
            supported_app_ids: cfg.supported_app_ids(),
            payment_expire_minutes: cfg.merchant.payment_expire_minutes,
        },
    ));

    let verifier: Option<Arc<dyn NotifyVerifier>> = if cfg.notify.verify_signature {
        Some(client.clone() as Arc<dyn NotifyVerifier>)
    } else {
        warn!("notification signature verification is disabled");
        None
    };
    let processor = Arc::new(NotificationProcessor::new(
        NotificationCodec::new(&cfg.merchant.api_v3_key),
        verifier,
        orders,
        notifications,
        uploader,
        Arc::clone(&tasks),
    ));

    let app = router(
        AppState::new(lifecycle, processor),
        cfg.server.request_timeout(),
    );

    let listener = TcpListener::bind(&cfg.server.http_addr)
        .await
        .with_context(|| format!("bind {}", cfg.server.http_addr))?;
    info!(address = %cfg.server.http_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.shutdown().await;
    info!("server shutdown complete");
    Ok(())
}
