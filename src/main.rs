//! PautaRadar — real-time ingestion, clustering, scoring and broadcast
//! pipeline for journalism desks. Wires every module in `lib.rs` into one
//! process: a scheduler tick loop, a broker, and one worker pool per
//! `Pool` that fetches, extracts, anchors, clusters, scores, transitions
//! and broadcasts each document, plus the axum HTTP/WebSocket surface.

use anyhow::{Context, Result};
use chrono::Utc;
use pautaradar::alerts::AlertDispatcher;
use pautaradar::anchors;
use pautaradar::api::{self, AppState};
use pautaradar::broadcast::{Broadcaster, SequenceCounters};
use pautaradar::broker::{AmqpBroker, Broker, InProcessBroker};
use pautaradar::config::Config;
use pautaradar::db::Db;
use pautaradar::engine::EventEngine;
use pautaradar::error::ContentError;
use pautaradar::extract::{self, api_json::SpaApiContract, pdf::NullOcr, ExtractedCandidate};
use pautaradar::fetch::{
    self,
    circuit_breaker::CircuitBreaker,
    rate_limiter::{Admission, DomainRateLimiter},
    FetchOutcome, FetchRequest,
};
use pautaradar::kv::KvStore;
use pautaradar::model::{Event, EventDoc, EventStatus, FetchErrorClass, Pool, Strategy};
use pautaradar::organizer::merge::{plan_merge, resolve_canonical, EventMergeCandidate};
use pautaradar::organizer::{self, ClusterIndex, DocFingerprint, OrganizerConfig};
use pautaradar::profile::{SourceProfile, SourceProfileRegistry};
use pautaradar::scheduler::{FetchJob, Scheduler};
use pautaradar::yield_monitor::{CalendarProfile, YieldMonitor};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Everything a pool worker needs to run the fetch -> extract -> organize ->
/// score -> transition -> alert -> broadcast pipeline for one job, shared
/// across every pool task. Scoring/transition/canonicalisation themselves
/// live in `EventEngine`, shared with the editorial HTTP handlers.
#[derive(Clone)]
struct Pipeline {
    db: Arc<Db>,
    registry: Arc<SourceProfileRegistry>,
    client: Client,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<DomainRateLimiter>,
    kv: Option<Arc<KvStore>>,
    cluster_index: Arc<ClusterIndex>,
    scheduler: Arc<Scheduler>,
    engine: Arc<EventEngine>,
    organizer_config: Arc<OrganizerConfig>,
    config: Arc<Config>,
}

impl Pipeline {
    async fn run_job(&self, job: FetchJob) {
        let outcome = self.process_job(&job).await;
        if let Err(err) = outcome {
            warn!(error = %err, source_id = %job.source_id, "pipeline job failed");
        }
        self.scheduler.mark_terminal(&job.source_id);
    }

    async fn process_job(&self, job: &FetchJob) -> Result<()> {
        let Some(profile) = self.registry.by_id(&job.source_id) else {
            warn!(source_id = %job.source_id, "job dispatched for unknown source");
            return Ok(());
        };
        let profile = profile.clone();

        if self.circuit_breaker.is_open(&job.source_id) {
            debug!(source_id = %job.source_id, "circuit open, skipping fetch");
            return Ok(());
        }

        let admission = self.rate_limiter.try_admit(
            &profile.source.source_domain,
            profile.limits.concurrency_per_domain,
            profile.limits.rate_limit_req_per_min,
        );
        if admission != Admission::Allowed {
            debug!(source_id = %job.source_id, ?admission, "rate limited, skipping fetch");
            return Ok(());
        }
        let release_domain = profile.source.source_domain.clone();
        let result = self.fetch_and_process(&profile).await;
        self.rate_limiter.release(&release_domain);
        result
    }

    fn pick_url(&self, profile: &SourceProfile) -> Option<String> {
        match profile.source.strategy {
            Strategy::Rss => profile.endpoints.feed.clone(),
            Strategy::Html => profile.endpoints.latest.clone(),
            Strategy::Api | Strategy::SpaApi => profile
                .endpoints
                .api
                .clone()
                .or_else(|| profile.endpoints.latest.clone()),
            Strategy::SpaHeadless => profile
                .endpoints
                .latest
                .clone()
                .or_else(|| profile.endpoints.api.clone()),
            Strategy::Pdf => profile.endpoints.latest.clone(),
        }
    }

    async fn fetch_and_process(&self, profile: &SourceProfile) -> Result<()> {
        let Some(url) = self.pick_url(profile) else {
            warn!(source_id = %profile.source.source_id, "profile has no usable endpoint for its strategy");
            return Ok(());
        };

        let request = FetchRequest {
            url: url.clone(),
            source_id: profile.source.source_id.clone(),
            user_agent: self.config.institutional_user_agent.clone(),
            max_bytes: profile.limits.max_bytes,
            timeout: StdDuration::from_secs(profile.limits.timeout_seconds),
            etag: None,
            last_modified: None,
        };

        let (latency, outcome) = match profile.source.pool {
            Pool::FastPool => fetch::fast::fetch(&self.client, &request).await,
            Pool::HeavyRenderPool => match profile.source.strategy {
                Strategy::SpaApi => fetch::render::fetch_spa_api(&self.client, &request).await,
                _ => {
                    use fetch::render::HeadlessRenderer;
                    let renderer = fetch::render::HttpFallbackRenderer;
                    renderer.render(&self.client, &request).await
                }
            },
            Pool::DeepExtractPool => fetch::deep::fetch(&self.client, &request).await,
        };

        self.record_outcome(profile, &request, latency, &outcome);

        let body = match outcome {
            FetchOutcome::Fresh { body, .. } => {
                self.circuit_breaker.record_success(&profile.source.source_id);
                if let Some(kv) = &self.kv {
                    kv.reset_circuit(&profile.source.source_id).await.ok();
                }
                body
            }
            FetchOutcome::NotModified => return Ok(()),
            FetchOutcome::Failed(failure) => {
                self.circuit_breaker.record_failure(&profile.source.source_id);
                if let Some(kv) = &self.kv {
                    kv.record_circuit_failure(&profile.source.source_id, self.config.circuit_breaker_cooldown)
                        .await
                        .ok();
                }
                debug!(source_id = %profile.source.source_id, ?failure, "fetch failed");
                return Ok(());
            }
        };

        let candidates = self.extract_candidates(profile, &url, &body).await?;
        for candidate in candidates {
            if let Err(err) = self.ingest_candidate(profile, candidate) {
                warn!(error = %err, source_id = %profile.source.source_id, "failed to ingest candidate");
            }
        }
        Ok(())
    }

    fn record_outcome(
        &self,
        profile: &SourceProfile,
        request: &FetchRequest,
        latency: StdDuration,
        outcome: &FetchOutcome,
    ) {
        let (status, error_class, bytes_read) = match outcome {
            FetchOutcome::Fresh { status, body, .. } => (Some(*status), FetchErrorClass::None, body.len() as u64),
            FetchOutcome::NotModified => (Some(304), FetchErrorClass::None, 0),
            FetchOutcome::Failed(failure) => (None, failure.error_class(), 0),
        };
        let attempt = fetch::record_attempt(
            profile.source.pool,
            request,
            status,
            error_class,
            latency,
            bytes_read,
            None,
        );
        if let Err(err) = self.db.insert_fetch_attempt(&attempt) {
            warn!(error = %err, "failed to persist fetch attempt");
        }
    }

    async fn extract_candidates(
        &self,
        profile: &SourceProfile,
        url: &str,
        body: &[u8],
    ) -> Result<Vec<ExtractedCandidate>, ContentError> {
        match profile.source.strategy {
            Strategy::Rss => extract::rss::extract(body),
            Strategy::Html => extract::html::extract(url, body).map(|c| vec![c]),
            Strategy::Pdf => {
                let ocr = NullOcr;
                extract::pdf::extract(url, body, &ocr).await.map(|c| vec![c])
            }
            Strategy::Api | Strategy::SpaApi | Strategy::SpaHeadless => {
                let contract = profile
                    .metadata
                    .spa_api_contract
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<SpaApiContract>(v.clone()).ok())
                    .unwrap_or(SpaApiContract {
                        title_path: "title".to_string(),
                        text_path: "text".to_string(),
                        url_path: None,
                        published_at_path: None,
                    });
                extract::api_json::extract(url, body, &contract).map(|c| vec![c])
            }
        }
    }

    /// Runs one extracted candidate through versioning, anchoring, evidence
    /// scoring, clustering, Event creation/attachment, dual scoring, state
    /// transition and broadcast. Synchronous: the database and in-memory
    /// indexes this touches are all synchronous/blocking-friendly (§5).
    fn ingest_candidate(&self, profile: &SourceProfile, candidate: ExtractedCandidate) -> Result<()> {
        let latest = self.db.latest_document_for_url(&candidate.url)?;
        let (latest_hash, latest_version) = match &latest {
            Some(doc) => (Some(doc.content_hash.as_str()), doc.version_no),
            None => (None, 0),
        };

        let Some(doc) = extract::decide_version(
            candidate,
            latest_hash,
            latest_version,
            &profile.source.source_id,
            None,
        ) else {
            return Ok(());
        };

        self.db.insert_document(&doc)?;

        let anchors = anchors::extract_anchors(&doc.clean_text);
        let evidence = anchors::evidence_features(&doc.clean_text, &anchors, profile.source.is_official);
        self.db.insert_anchors(doc.doc_id, &anchors)?;
        self.db.upsert_evidence(doc.doc_id, &evidence)?;

        let entities = anchors::extract_entities(&doc.clean_text);
        self.db.insert_entities(doc.doc_id, &entities)?;

        let now = Utc::now();
        let title_tokens: HashSet<String> = doc
            .title
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        let anchor_pairs: Vec<_> = anchors.iter().map(|a| (a.anchor_type, a.value.clone())).collect();
        let entity_keys: HashSet<String> = entities.iter().map(|e| e.entity_key.clone()).collect();
        let candidate_event_id = Uuid::new_v4();
        let fingerprint = DocFingerprint {
            doc_id: doc.doc_id,
            event_id: candidate_event_id,
            anchors: anchor_pairs,
            simhash: organizer::simhash::simhash(&doc.clean_text),
            title_tokens,
            entities: entity_keys,
            seen_at: now,
        };

        let decision = organizer::decide(&self.cluster_index, &fingerprint, &self.organizer_config, now);

        let event_id = match decision {
            organizer::ClusterDecision::Attach { event_id, .. } => {
                self.db.attach_document(&EventDoc {
                    event_id,
                    doc_id: doc.doc_id,
                    seen_at: now,
                    is_primary: false,
                })?;
                let mut attached = fingerprint.clone();
                attached.event_id = event_id;
                self.cluster_index.record(attached);
                event_id
            }
            organizer::ClusterDecision::NewEvent => {
                let event = Event {
                    event_id: candidate_event_id,
                    status: EventStatus::Hydrating,
                    flags: HashSet::new(),
                    canonical_event_id: None,
                    first_seen_at: now,
                    last_seen_at: now,
                    summary: doc.title.clone(),
                    lane: format!("{:?}", profile.source.strategy).to_lowercase(),
                    seq: 0,
                };
                self.db.insert_event(&event)?;
                self.db.attach_document(&EventDoc {
                    event_id: candidate_event_id,
                    doc_id: doc.doc_id,
                    seen_at: now,
                    is_primary: true,
                })?;
                self.cluster_index.record(fingerprint.clone());
                candidate_event_id
            }
        };

        self.engine.score_and_transition(event_id, now)?;
        Ok(())
    }
}

/// C2 tick loop: asks the Scheduler for the ordered dispatch plan and hands
/// each job to the broker, independent of which pool worker eventually
/// picks it up.
async fn run_scheduler_loop(scheduler: Arc<Scheduler>, registry: Arc<SourceProfileRegistry>, broker: Arc<dyn Broker>) {
    let mut ticker = tokio::time::interval(StdDuration::from_secs(5));
    loop {
        ticker.tick().await;
        let jobs = scheduler.plan_tick(&registry, Utc::now());
        for job in jobs {
            if let Err(err) = broker.enqueue(job.clone()).await {
                error!(error = %err, source_id = %job.source_id, "failed to enqueue fetch job");
                scheduler.mark_terminal(&job.source_id);
            }
        }
    }
}

/// One worker loop per pool: dequeues deliveries and runs each through the
/// pipeline on a bounded number of concurrent tasks (§4.3 per-pool
/// concurrency budgets).
async fn run_pool_worker(pool: Pool, broker: Arc<dyn Broker>, pipeline: Pipeline, concurrency: usize) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    loop {
        match broker.dequeue(pool).await {
            Ok(Some(delivery)) => {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let job = delivery.job.clone();
                    pipeline.run_job(job).await;
                    if let Err(err) = delivery.ack().await {
                        warn!(error = %err, "failed to ack delivery");
                    }
                });
            }
            Ok(None) => tokio::time::sleep(StdDuration::from_millis(200)).await,
            Err(err) => {
                error!(error = %err, ?pool, "broker dequeue failed");
                tokio::time::sleep(StdDuration::from_secs(1)).await;
            }
        }
    }
}

/// C11 sweep: folds each tick's fetch attempts into the per-source yield
/// window and logs a warning on starvation (alerting wiring is left to the
/// same AlertDispatcher path an operator dashboard would subscribe to).
async fn run_yield_monitor_loop(db: Arc<Db>, registry: Arc<SourceProfileRegistry>) {
    let mut monitors: std::collections::HashMap<String, YieldMonitor> = std::collections::HashMap::new();
    let mut last_tick = Utc::now();
    let mut ticker = tokio::time::interval(StdDuration::from_secs(300));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        for profile in registry.enabled_profiles() {
            let monitor = monitors
                .entry(profile.source.source_id.clone())
                .or_insert_with(|| YieldMonitor::new(288, CalendarProfile::flat()));

            let http_200_count = db
                .count_http_ok_attempts_since(&profile.source.source_id, last_tick)
                .unwrap_or_else(|err| {
                    warn!(error = %err, source_id = %profile.source.source_id, "failed to count fetch attempts");
                    0
                });
            let useful_yield = db
                .count_useful_documents_since(&profile.source.source_id, last_tick)
                .unwrap_or_else(|err| {
                    warn!(error = %err, source_id = %profile.source.source_id, "failed to count useful documents");
                    0
                });

            monitor.record_bucket(now, useful_yield, http_200_count);
            if let Some(incident) = monitor.evaluate(&profile.source.source_id) {
                warn!(
                    source_id = %profile.source.source_id,
                    observed = incident.observed_yield,
                    expected = incident.expected_yield,
                    "data starvation incident"
                );
            }
        }
        last_tick = now;
    }
}

/// C6 sweep (§4.6 `DEFER_MERGE`): scans clusters sharing a strong anchor
/// pair, resolves each through its canonical pointer, picks the earliest
/// Event as canonical and folds the rest into it.
async fn run_canonicalization_loop(engine: Arc<EventEngine>, db: Arc<Db>, interval: StdDuration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = Utc::now();

        let groups = match db.strong_anchor_merge_groups() {
            Ok(groups) => groups,
            Err(err) => {
                warn!(error = %err, "failed to scan strong-anchor merge groups");
                continue;
            }
        };

        for (anchor_type, value) in groups {
            let event_ids = match db.events_sharing_anchor(anchor_type, &value) {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(error = %err, ?anchor_type, %value, "failed to load events sharing anchor");
                    continue;
                }
            };

            let pointer_of = |event_id: Uuid| db.get_event(event_id).ok().flatten().and_then(|e| e.canonical_event_id);
            let mut resolved: Vec<Uuid> = event_ids
                .into_iter()
                .map(|id| resolve_canonical(id, &pointer_of))
                .collect();
            resolved.sort();
            resolved.dedup();

            let mut candidates = Vec::new();
            for event_id in resolved {
                let Ok(Some(event)) = db.get_event(event_id) else {
                    continue;
                };
                if event.status == EventStatus::Merged {
                    continue;
                }
                let anchor_count = db.event_anchor_count(event_id).unwrap_or(0);
                candidates.push(EventMergeCandidate { event_id, first_seen_at: event.first_seen_at, anchor_count });
            }

            let Some(plan) = plan_merge(&candidates) else {
                continue;
            };
            if let Err(err) = engine.canonicalize(&plan, Some((anchor_type, value.clone())), now) {
                warn!(error = %err, ?anchor_type, %value, "failed to canonicalize merge group");
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pautaradar=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    info!(database = %config.database_path, "starting pautaradar");

    let db = Arc::new(Db::open(&config.database_path).context("failed to open database")?);

    let registry = Arc::new(
        SourceProfileRegistry::load_from_path(&config.profile_registry_path).unwrap_or_else(|err| {
            warn!(error = %err, path = %config.profile_registry_path, "failed to load source profiles, starting with an empty registry");
            SourceProfileRegistry::new()
        }),
    );
    info!(sources = registry.len(), "loaded source profile registry");

    let kv: Option<Arc<KvStore>> = match &config.kv_store_url {
        Some(url) => match KvStore::connect(url).await {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                warn!(error = %err, "failed to connect to kv store, continuing without it");
                None
            }
        },
        None => None,
    };

    let broker: Arc<dyn Broker> = match &config.broker_url {
        Some(addr) => Arc::new(
            AmqpBroker::connect(addr)
                .await
                .context("failed to connect to amqp broker")?,
        ),
        None => Arc::new(InProcessBroker::new(256)),
    };

    let client = Client::builder()
        .user_agent(config.institutional_user_agent.clone())
        .build()
        .context("failed to build http client")?;

    let circuit_breaker = Arc::new(CircuitBreaker::new(
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_cooldown,
    ));
    let rate_limiter = Arc::new(DomainRateLimiter::new());
    let cluster_index = Arc::new(ClusterIndex::new());
    let scheduler = Arc::new(Scheduler::new());
    let broadcaster = Broadcaster::new(1024, 64);
    let alert_cooldown = chrono::Duration::from_std(config.alert_cooldown).unwrap_or(chrono::Duration::minutes(10));
    let alert_dispatcher = Arc::new(AlertDispatcher::new(alert_cooldown));
    let sequences = Arc::new(SequenceCounters::default());
    let organizer_config = Arc::new(OrganizerConfig {
        hard_merge_window: chrono::Duration::from_std(config.same_event_time_window)
            .unwrap_or(chrono::Duration::hours(6)),
        near_dup_window: chrono::Duration::from_std(config.same_event_time_window)
            .unwrap_or(chrono::Duration::hours(6)),
        near_dup_hamming_threshold: config.near_dup_simhash_threshold,
        same_event_window: chrono::Duration::from_std(config.same_event_time_window)
            .unwrap_or(chrono::Duration::hours(6)),
        same_event_similarity_threshold: 0.5,
    });

    let engine = Arc::new(EventEngine {
        db: db.clone(),
        broadcaster: broadcaster.clone(),
        alert_dispatcher: alert_dispatcher.clone(),
        sequences,
        hot_score_threshold: config.hot_score_threshold,
        viral_velocity_threshold: config.viral_velocity_threshold,
    });

    let pipeline = Pipeline {
        db: db.clone(),
        registry: registry.clone(),
        client,
        circuit_breaker,
        rate_limiter,
        kv,
        cluster_index: cluster_index.clone(),
        scheduler: scheduler.clone(),
        engine: engine.clone(),
        organizer_config,
        config: config.clone(),
    };

    tokio::spawn(run_scheduler_loop(scheduler.clone(), registry.clone(), broker.clone()));
    tokio::spawn(run_pool_worker(Pool::FastPool, broker.clone(), pipeline.clone(), config.fast_pool_concurrency));
    tokio::spawn(run_pool_worker(
        Pool::HeavyRenderPool,
        broker.clone(),
        pipeline.clone(),
        config.render_pool_concurrency,
    ));
    tokio::spawn(run_pool_worker(
        Pool::DeepExtractPool,
        broker.clone(),
        pipeline.clone(),
        config.deep_pool_concurrency,
    ));
    tokio::spawn(run_yield_monitor_loop(db.clone(), registry.clone()));
    tokio::spawn(run_canonicalization_loop(engine.clone(), db.clone(), config.deferred_merge_interval));

    let app_state = AppState {
        db,
        broadcaster,
        alert_dispatcher,
        cluster_index,
        scheduler,
        engine,
    };
    let app = api::router(app_state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind http listener")?;
    info!(%addr, "api server listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
