// src/lib.rs

pub mod alerts;
pub mod config;
pub mod detectors;
pub mod logging;
pub mod model;
pub mod oracle;
pub mod pipeline;
pub mod platform;
pub mod scheduler;
pub mod server;
pub mod state;

use anyhow::{Context as _, Result};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};

use alerts::AlertSink;
use config::{OracleKind, Settings};
use detectors::{DeletionSpikeDetector, ImpersonationDetector, IntentClassifier, TyposquatDetector};
use model::{ChatId, UserId};
use oracle::{ComparisonOracle, ImageComparer, ahash::AverageHashComparer, openai::OpenAiComparer};
use pipeline::Pipeline;
use platform::{ChatPlatform, telegram::TelegramClient};
use scheduler::ProbeScheduler;
use state::DetectorState;

/// Application context: settings, the platform client and the assembled pipeline.
pub struct AppContext {
    pub settings: Settings,
    pub telegram: Arc<TelegramClient>,
    pub pipeline: Arc<Pipeline>,
    pub scheduler: ProbeScheduler,
}

impl AppContext {
    /// Bootstrap:
    /// - logging
    /// - Telegram client + comparison oracle
    /// - admin image preload, detector chain
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        logging::init(&settings);

        let telegram = Arc::new(
            TelegramClient::new(&settings.telegram.api_base, settings.telegram.token.clone())
                .context("telegram client")?,
        );
        let oracle = build_oracle(&settings)?;
        let scheduler = ProbeScheduler::start();

        let pipeline = build_pipeline(&settings, telegram.clone(), oracle, scheduler.clone()).await;
        info!(stages = ?pipeline.stages(), "pipeline ready");

        Ok(Arc::new(Self {
            settings,
            telegram,
            pipeline: Arc::new(pipeline),
            scheduler,
        }))
    }
}

/// Picks the comparison backend; `openai` without a key degrades to `ahash`.
pub fn build_oracle(settings: &Settings) -> Result<ComparisonOracle> {
    let imp = &settings.impersonation;
    let backend: Arc<dyn ImageComparer> = match (imp.oracle, imp.openai.api_key.as_deref()) {
        (OracleKind::Openai, Some(key)) if !key.is_empty() => Arc::new(
            OpenAiComparer::new(&imp.openai.base_url, key, &imp.openai.model)
                .context("openai comparer")?,
        ),
        (OracleKind::Openai, _) => {
            warn!("impersonation.oracle = openai but no api key, using local ahash");
            Arc::new(AverageHashComparer)
        }
        (OracleKind::Ahash, _) => Arc::new(AverageHashComparer),
    };
    Ok(ComparisonOracle::new(backend))
}

/// Preloads admin images and assembles the detector chain in its fixed order:
/// typosquat → intent → deletion probes → impersonation.
pub async fn build_pipeline(
    settings: &Settings,
    platform: Arc<dyn ChatPlatform>,
    oracle: ComparisonOracle,
    scheduler: ProbeScheduler,
) -> Pipeline {
    let admins: Vec<UserId> = settings.admin.user_ids.iter().copied().map(UserId).collect();
    let admin_images = detectors::impersonation::load_admin_images(platform.as_ref(), &admins).await;
    info!(loaded = admin_images.len(), configured = admins.len(), "admin images cached");

    let state = Arc::new(DetectorState::new(admin_images));
    let alerts = AlertSink::new(platform.clone(), ChatId(settings.admin_chat_id()));

    let typosquat = TyposquatDetector::new(
        settings.admin.usernames.clone(),
        settings.typosquat.distance_threshold,
        alerts.clone(),
    );
    let intent = IntentClassifier::new(alerts.clone());
    let deletion = DeletionSpikeDetector::new(
        platform.clone(),
        alerts.clone(),
        state.clone(),
        scheduler,
        settings.deletion.threshold,
        settings.deletion.probe_delay(),
    );
    let impersonation = ImpersonationDetector::new(
        platform,
        oracle,
        state.clone(),
        alerts,
        settings.impersonation.similarity_threshold,
    );

    Pipeline::new(state)
        .with(Arc::new(typosquat))
        .with(Arc::new(intent))
        .with(Arc::new(deletion))
        .with(Arc::new(impersonation))
}

/// Registers the webhook (when configured) and serves until Ctrl-C.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let s = &ctx.settings;

    if let Some(base) = s.telegram.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        let url = format!("{}{}", base.trim_end_matches('/'), s.server.webhook_path);
        ctx.telegram
            .set_webhook(
                &url,
                s.telegram.drop_pending_updates,
                s.telegram.webhook_secret.as_deref(),
            )
            .await
            .context("setWebhook")?;
        info!("Webhook set to {}", url);
    } else {
        warn!("telegram.webhook_url not set, webhook registration skipped");
    }

    let (events, worker) = server::spawn_worker(ctx.pipeline.clone());
    let app = server::router(
        &s.server.webhook_path,
        server::WebhookState::new(events, s.telegram.webhook_secret.clone()),
    );
    let addr: SocketAddr = format!("{}:{}", s.server.host, s.server.port)
        .parse()
        .context("server.host/server.port")?;

    let served = server::serve(addr, app).await;
    // router (and its sender) is gone; let the worker drain what was queued
    let _ = worker.await;
    served
}
