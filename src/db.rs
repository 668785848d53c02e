//! Ambient persistence layer (§5 "the database is the source of truth").
//!
//! A single rusqlite connection behind a `parking_lot::Mutex`, schema and
//! access patterns grounded directly on the teacher's `DbSignalStorage`
//! (`signals/db_storage.rs`): WAL pragmas, a schema constant applied with
//! `execute_batch`, `prepare_cached` statements, and thin `row_to_*` mapping
//! helpers. Every write here is synchronous; callers already run on a
//! blocking-friendly pool-worker task, the same assumption the teacher's
//! storage layer makes.

use crate::model::*;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::collections::HashSet;
use std::sync::Arc;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sources (
    source_id TEXT PRIMARY KEY,
    source_domain TEXT NOT NULL,
    tier INTEGER NOT NULL,
    is_official INTEGER NOT NULL,
    lang TEXT NOT NULL,
    pool TEXT NOT NULL,
    strategy TEXT NOT NULL,
    enabled INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS fetch_attempts (
    attempt_id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    url TEXT NOT NULL,
    status_code INTEGER,
    error_class TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    bytes_read INTEGER NOT NULL,
    pool TEXT NOT NULL,
    snapshot_hash TEXT,
    attempted_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_fetch_attempts_source_time
    ON fetch_attempts(source_id, attempted_at DESC);

CREATE TABLE IF NOT EXISTS snapshots (
    content_hash TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    headers_json TEXT NOT NULL,
    blob_ref TEXT NOT NULL,
    byte_len INTEGER NOT NULL,
    fetched_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS documents (
    doc_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    version_no INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    clean_text TEXT NOT NULL,
    title TEXT NOT NULL,
    lang TEXT,
    canonical_url TEXT,
    published_at TEXT,
    modified_at TEXT,
    snapshot_hash TEXT,
    source_id TEXT NOT NULL,
    discovered_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_documents_url ON documents(url);
CREATE INDEX IF NOT EXISTS idx_documents_clean_text ON documents(clean_text);
CREATE INDEX IF NOT EXISTS idx_documents_title ON documents(title);

CREATE TABLE IF NOT EXISTS doc_anchors (
    doc_id TEXT NOT NULL,
    anchor_type TEXT NOT NULL,
    anchor_value TEXT NOT NULL,
    span_start INTEGER NOT NULL,
    span_end INTEGER NOT NULL,
    confidence REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doc_anchors_type_value
    ON doc_anchors(anchor_type, anchor_value);
CREATE INDEX IF NOT EXISTS idx_doc_anchors_doc ON doc_anchors(doc_id);

CREATE TABLE IF NOT EXISTS doc_evidence (
    doc_id TEXT PRIMARY KEY,
    evidence_score REAL NOT NULL,
    has_pdf INTEGER NOT NULL,
    has_official_domain INTEGER NOT NULL,
    anchor_count INTEGER NOT NULL,
    strong_anchor_count INTEGER NOT NULL,
    money_mention_count INTEGER NOT NULL,
    has_table_like INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS doc_entities (
    doc_id TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    label TEXT NOT NULL,
    span_start INTEGER NOT NULL,
    span_end INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doc_entities_doc ON doc_entities(doc_id);

CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    flags_json TEXT NOT NULL,
    canonical_event_id TEXT,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    summary TEXT NOT NULL,
    lane TEXT NOT NULL,
    seq INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_events_status_last_seen ON events(status, last_seen_at);

CREATE TABLE IF NOT EXISTS event_docs (
    event_id TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    seen_at TEXT NOT NULL,
    is_primary INTEGER NOT NULL,
    PRIMARY KEY (event_id, doc_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_event_docs_doc ON event_docs(doc_id);

CREATE TABLE IF NOT EXISTS event_scores (
    event_id TEXT PRIMARY KEY,
    score_plantao REAL NOT NULL,
    score_oceano_azul REAL NOT NULL,
    reasons_json TEXT NOT NULL,
    computed_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_event_scores_plantao ON event_scores(score_plantao);
CREATE INDEX IF NOT EXISTS idx_event_scores_oceano_azul ON event_scores(score_oceano_azul);

CREATE TABLE IF NOT EXISTS event_state_history (
    event_id TEXT NOT NULL,
    status TEXT NOT NULL,
    reason_code TEXT NOT NULL,
    at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_event_state_history_event ON event_state_history(event_id, at);

CREATE TABLE IF NOT EXISTS event_alert_state (
    event_id TEXT PRIMARY KEY,
    last_fingerprint TEXT NOT NULL,
    last_alerted_at TEXT NOT NULL,
    cooldown_until TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS merge_audit (
    from_event_id TEXT NOT NULL,
    to_event_id TEXT NOT NULL,
    reason_code TEXT NOT NULL,
    evidence_anchor_type TEXT,
    evidence_anchor_value TEXT,
    merged_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_merge_audit_from ON merge_audit(from_event_id);

CREATE TABLE IF NOT EXISTS feedback_events (
    feedback_id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL,
    action TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    received_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_feedback_events_event ON feedback_events(event_id);
"#;

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

/// Thin wrapper over a single rusqlite connection, the same shape as the
/// teacher's `DbSignalStorage`: `Arc<Mutex<Connection>>` plus narrow
/// per-entity methods, each locking for the duration of one statement or
/// one transaction.
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("failed to open database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize schema")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn upsert_source(&self, source: &Source) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sources (source_id, source_domain, tier, is_official, lang, pool, strategy, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source_id) DO UPDATE SET
                source_domain=excluded.source_domain, tier=excluded.tier, is_official=excluded.is_official,
                lang=excluded.lang, pool=excluded.pool, strategy=excluded.strategy, enabled=excluded.enabled",
            params![
                source.source_id,
                source.source_domain,
                source.tier as u8,
                source.is_official,
                source.lang,
                serde_json::to_string(&source.pool).map_err(json_err)?,
                serde_json::to_string(&source.strategy).map_err(json_err)?,
                source.enabled,
            ],
        )?;
        Ok(())
    }

    pub fn insert_fetch_attempt(&self, attempt: &FetchAttempt) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fetch_attempts (attempt_id, source_id, url, status_code, error_class, latency_ms, bytes_read, pool, snapshot_hash, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                attempt.attempt_id.to_string(),
                attempt.source_id,
                attempt.url,
                attempt.status_code,
                serde_json::to_string(&attempt.error_class).map_err(json_err)?,
                attempt.latency_ms,
                attempt.bytes_read,
                serde_json::to_string(&attempt.pool).map_err(json_err)?,
                attempt.snapshot_hash,
                ts(attempt.attempted_at),
            ],
        )?;
        Ok(())
    }

    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO snapshots (content_hash, url, headers_json, blob_ref, byte_len, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.content_hash,
                snapshot.url,
                serde_json::to_string(&snapshot.headers).map_err(json_err)?,
                snapshot.blob_ref,
                snapshot.byte_len,
                ts(snapshot.fetched_at),
            ],
        )?;
        Ok(())
    }

    /// Inserts a new Document version. Callers decide beforehand (via
    /// `extract::decide_version`) whether a new version is warranted — the
    /// content-hash-unchanged check never happens here (§3 invariant 1).
    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (doc_id, url, version_no, content_hash, clean_text, title, lang, canonical_url, published_at, modified_at, snapshot_hash, source_id, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                doc.doc_id.to_string(),
                doc.url,
                doc.version_no,
                doc.content_hash,
                doc.clean_text,
                doc.title,
                doc.lang,
                doc.canonical_url,
                doc.published_at.map(ts),
                doc.modified_at.map(ts),
                doc.snapshot_hash,
                doc.source_id,
                ts(doc.discovered_at),
            ],
        )?;
        Ok(())
    }

    pub fn latest_document_for_url(&self, url: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT doc_id, url, version_no, content_hash, clean_text, title, lang, canonical_url, published_at, modified_at, snapshot_hash, source_id, discovered_at
             FROM documents WHERE url = ?1 ORDER BY version_no DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([url])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_document(row)?)),
            None => Ok(None),
        }
    }

    pub fn insert_anchors(&self, doc_id: DocId, anchors: &[Anchor]) -> Result<()> {
        let conn = self.conn.lock();
        for anchor in anchors {
            conn.execute(
                "INSERT INTO doc_anchors (doc_id, anchor_type, anchor_value, span_start, span_end, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    doc_id.to_string(),
                    serde_json::to_string(&anchor.anchor_type).map_err(json_err)?,
                    anchor.value,
                    anchor.span_start,
                    anchor.span_end,
                    anchor.confidence,
                ],
            )?;
        }
        Ok(())
    }

    /// Every Document sharing an anchor `(type, value)` pair with `doc_id`'s
    /// anchors, across any Event — the hard-merge lookup (§4.6 rule 1).
    pub fn events_sharing_anchor(&self, anchor_type: AnchorType, value: &str) -> Result<Vec<EventId>> {
        let conn = self.conn.lock();
        let anchor_type_json = serde_json::to_string(&anchor_type).map_err(json_err)?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT ed.event_id FROM doc_anchors da
             JOIN event_docs ed ON ed.doc_id = da.doc_id
             WHERE da.anchor_type = ?1 AND da.anchor_value = ?2",
        )?;
        let ids = stmt
            .query_map(params![anchor_type_json, value], |row| {
                let s: String = row.get(0)?;
                Ok(s)
            })?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }

    pub fn upsert_evidence(&self, doc_id: DocId, evidence: &EvidenceFeatures) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO doc_evidence (doc_id, evidence_score, has_pdf, has_official_domain, anchor_count, strong_anchor_count, money_mention_count, has_table_like)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(doc_id) DO UPDATE SET
                evidence_score=excluded.evidence_score, has_pdf=excluded.has_pdf, has_official_domain=excluded.has_official_domain,
                anchor_count=excluded.anchor_count, strong_anchor_count=excluded.strong_anchor_count,
                money_mention_count=excluded.money_mention_count, has_table_like=excluded.has_table_like",
            params![
                doc_id.to_string(),
                evidence.evidence_score,
                evidence.has_pdf,
                evidence.has_official_domain,
                evidence.anchor_count,
                evidence.strong_anchor_count,
                evidence.money_mention_count,
                evidence.has_table_like,
            ],
        )?;
        Ok(())
    }

    pub fn insert_entities(&self, doc_id: DocId, entities: &[EntityMention]) -> Result<()> {
        let conn = self.conn.lock();
        for entity in entities {
            conn.execute(
                "INSERT INTO doc_entities (doc_id, entity_key, label, span_start, span_end)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![doc_id.to_string(), entity.entity_key, entity.label, entity.span_start, entity.span_end],
            )?;
        }
        Ok(())
    }

    pub fn insert_event(&self, event: &Event) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (event_id, status, flags_json, canonical_event_id, first_seen_at, last_seen_at, summary, lane, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.event_id.to_string(),
                serde_json::to_string(&event.status).map_err(json_err)?,
                serde_json::to_string(&event.flags).map_err(json_err)?,
                event.canonical_event_id.map(|id| id.to_string()),
                ts(event.first_seen_at),
                ts(event.last_seen_at),
                event.summary,
                event.lane,
                event.seq as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_event(&self, event_id: EventId) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, status, flags_json, canonical_event_id, first_seen_at, last_seen_at, summary, lane, seq
             FROM events WHERE event_id = ?1",
        )?;
        let mut rows = stmt.query([event_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_event(row)?)),
            None => Ok(None),
        }
    }

    /// Updates status using optimistic concurrency keyed on `last_seen_at`
    /// as the version stamp (§5 "on conflict the loser re-reads and
    /// retries"); returns `false` if the expected version didn't match.
    pub fn update_status_optimistic(
        &self,
        event_id: EventId,
        expected_last_seen_at: DateTime<Utc>,
        new_status: EventStatus,
        new_last_seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE events SET status = ?1, last_seen_at = ?2 WHERE event_id = ?3 AND last_seen_at = ?4",
            params![
                serde_json::to_string(&new_status).map_err(json_err)?,
                ts(new_last_seen_at),
                event_id.to_string(),
                ts(expected_last_seen_at),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn set_canonical(&self, event_id: EventId, canonical_event_id: EventId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE events SET canonical_event_id = ?1 WHERE event_id = ?2",
            params![canonical_event_id.to_string(), event_id.to_string()],
        )?;
        Ok(())
    }

    pub fn attach_document(&self, event_doc: &EventDoc) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO event_docs (event_id, doc_id, seen_at, is_primary)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event_doc.event_id.to_string(),
                event_doc.doc_id.to_string(),
                ts(event_doc.seen_at),
                event_doc.is_primary,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_score(&self, score: &EventScore) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_scores (event_id, score_plantao, score_oceano_azul, reasons_json, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(event_id) DO UPDATE SET
                score_plantao=excluded.score_plantao, score_oceano_azul=excluded.score_oceano_azul,
                reasons_json=excluded.reasons_json, computed_at=excluded.computed_at",
            params![
                score.event_id.to_string(),
                score.score_plantao,
                score.score_oceano_azul,
                serde_json::to_string(&score.reasons).map_err(json_err)?,
                ts(score.computed_at),
            ],
        )?;
        Ok(())
    }

    pub fn append_state_history(&self, entry: &EventStateHistory) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_state_history (event_id, status, reason_code, at) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.event_id.to_string(),
                serde_json::to_string(&entry.status).map_err(json_err)?,
                entry.reason_code,
                ts(entry.at),
            ],
        )?;
        Ok(())
    }

    pub fn get_alert_state(&self, event_id: EventId) -> Result<Option<EventAlertState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, last_fingerprint, last_alerted_at, cooldown_until FROM event_alert_state WHERE event_id = ?1",
        )?;
        let mut rows = stmt.query([event_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(EventAlertState {
                event_id: Uuid::from_str(&row.get::<_, String>(0)?).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                last_fingerprint: row.get(1)?,
                last_alerted_at: parse_ts(&row.get::<_, String>(2)?)?,
                cooldown_until: parse_ts(&row.get::<_, String>(3)?)?,
            })),
            None => Ok(None),
        }
    }

    pub fn upsert_alert_state(&self, state: &EventAlertState) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_alert_state (event_id, last_fingerprint, last_alerted_at, cooldown_until)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(event_id) DO UPDATE SET
                last_fingerprint=excluded.last_fingerprint, last_alerted_at=excluded.last_alerted_at, cooldown_until=excluded.cooldown_until",
            params![
                state.event_id.to_string(),
                state.last_fingerprint,
                ts(state.last_alerted_at),
                ts(state.cooldown_until),
            ],
        )?;
        Ok(())
    }

    pub fn insert_merge_audit(&self, audit: &MergeAudit) -> Result<()> {
        let conn = self.conn.lock();
        let (anchor_type, anchor_value) = match &audit.evidence_anchor {
            Some((t, v)) => (Some(serde_json::to_string(t).map_err(json_err)?), Some(v.clone())),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO merge_audit (from_event_id, to_event_id, reason_code, evidence_anchor_type, evidence_anchor_value, merged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                audit.from_event_id.to_string(),
                audit.to_event_id.to_string(),
                audit.reason_code,
                anchor_type,
                anchor_value,
                ts(audit.merged_at),
            ],
        )?;
        Ok(())
    }

    pub fn insert_feedback_event(&self, feedback: &FeedbackEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO feedback_events (feedback_id, event_id, action, payload_json, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feedback.feedback_id.to_string(),
                feedback.event_id.to_string(),
                serde_json::to_string(&feedback.action).map_err(json_err)?,
                serde_json::to_string(&feedback.payload).map_err(json_err)?,
                ts(feedback.received_at),
            ],
        )?;
        Ok(())
    }

    pub fn events_by_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, status, flags_json, canonical_event_id, first_seen_at, last_seen_at, summary, lane, seq
             FROM events WHERE status = ?1 ORDER BY last_seen_at DESC",
        )?;
        let status_json = serde_json::to_string(&status).map_err(json_err)?;
        let events = stmt
            .query_map([status_json], row_to_event)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(events)
    }

    pub fn update_flags(&self, event_id: EventId, flags: &HashSet<EventFlag>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE events SET flags_json = ?1 WHERE event_id = ?2",
            params![serde_json::to_string(flags).map_err(json_err)?, event_id.to_string()],
        )?;
        Ok(())
    }

    /// Rolls up every Document attached to an Event into the aggregate
    /// inputs the Scoring Engine needs (§4.7): velocity over the last two
    /// one-minute windows, source diversity, event-wide strong-anchor count,
    /// best source tier, and Tier-1 coverage lag relative to Event creation.
    pub fn event_rollup(&self, event_id: EventId, first_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<EventRollup> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT d.source_id, s.tier, COALESCE(de.strong_anchor_count, 0), COALESCE(de.has_pdf, 0), COALESCE(de.has_official_domain, 0), d.discovered_at
             FROM event_docs ed
             JOIN documents d ON d.doc_id = ed.doc_id
             LEFT JOIN doc_evidence de ON de.doc_id = d.doc_id
             LEFT JOIN sources s ON s.source_id = d.source_id
             WHERE ed.event_id = ?1",
        )?;
        let rows = stmt.query_map([event_id.to_string()], |row| {
            let source_id: String = row.get(0)?;
            let tier: Option<i64> = row.get(1)?;
            let strong_anchor_count: i64 = row.get(2)?;
            let has_pdf: bool = row.get(3)?;
            let has_official_domain: bool = row.get(4)?;
            let discovered_at: String = row.get(5)?;
            Ok((source_id, tier, strong_anchor_count, has_pdf, has_official_domain, discovered_at))
        })?;

        let mut doc_count = 0u32;
        let mut sources = std::collections::HashSet::new();
        let mut docs_last_minute = 0u32;
        let mut docs_prev_minute = 0u32;
        let mut strong_anchor_count = 0u32;
        let mut has_pdf = false;
        let mut has_official_domain = false;
        let mut best_tier = Tier::Three;
        let mut tier1_confirmed = false;
        let mut earliest_tier1: Option<DateTime<Utc>> = None;

        for row in rows {
            let (source_id, tier_raw, anchor_count, pdf, official, discovered_at_raw) = row?;
            doc_count += 1;
            sources.insert(source_id);
            let discovered_at = parse_ts(&discovered_at_raw)?;
            let age = now.signed_duration_since(discovered_at);
            if age <= chrono::Duration::minutes(1) {
                docs_last_minute += 1;
            } else if age <= chrono::Duration::minutes(2) {
                docs_prev_minute += 1;
            }
            strong_anchor_count += anchor_count as u32;
            has_pdf |= pdf;
            has_official_domain |= official;
            if let Some(t) = tier_raw.and_then(|v| Tier::from_u8(v as u8)) {
                if t < best_tier {
                    best_tier = t;
                }
                if t == Tier::One {
                    tier1_confirmed = true;
                    earliest_tier1 = Some(match earliest_tier1 {
                        Some(existing) if existing <= discovered_at => existing,
                        _ => discovered_at,
                    });
                }
            }
        }

        let coverage_lag = earliest_tier1.map(|t| t.signed_duration_since(first_seen_at));

        Ok(EventRollup {
            doc_count,
            source_diversity: sources.len() as u32,
            docs_last_minute,
            docs_prev_minute,
            strong_anchor_count,
            has_pdf,
            has_official_domain,
            best_tier,
            tier1_confirmed,
            coverage_lag,
        })
    }

    /// Total anchor mentions (any type) attached across an Event's
    /// documents — the tie-break input for [`crate::organizer::merge::plan_merge`].
    pub fn event_anchor_count(&self, event_id: EventId) -> Result<u32> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM doc_anchors da JOIN event_docs ed ON ed.doc_id = da.doc_id WHERE ed.event_id = ?1",
        )?;
        let count: i64 = stmt.query_row([event_id.to_string()], |row| row.get(0))?;
        Ok(count as u32)
    }

    /// Strong anchor `(type, value)` pairs currently attached to more than
    /// one distinct, non-canonicalized Event — the discovery query for the
    /// deferred canonicalisation sweep (§4.6 `DEFER_MERGE`).
    pub fn strong_anchor_merge_groups(&self) -> Result<Vec<(AnchorType, String)>> {
        let conn = self.conn.lock();
        let merged_json = serde_json::to_string(&EventStatus::Merged).map_err(json_err)?;
        let mut stmt = conn.prepare_cached(
            "SELECT da.anchor_type, da.anchor_value
             FROM doc_anchors da
             JOIN event_docs ed ON ed.doc_id = da.doc_id
             JOIN events e ON e.event_id = ed.event_id
             WHERE e.status != ?1 AND e.canonical_event_id IS NULL
             GROUP BY da.anchor_type, da.anchor_value
             HAVING COUNT(DISTINCT ed.event_id) > 1",
        )?;
        let pairs = stmt
            .query_map([merged_json], |row| {
                let anchor_type_json: String = row.get(0)?;
                let value: String = row.get(1)?;
                Ok((anchor_type_json, value))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(t, v)| serde_json::from_str::<AnchorType>(&t).ok().map(|t| (t, v)))
            .filter(|(t, _)| t.is_strong())
            .collect();
        Ok(pairs)
    }

    /// Re-homes every `EventDoc` edge from `from_event_id` to `to_event_id`,
    /// deduplicating on `(event_id, doc_id)` via the table's primary key
    /// (§4.6 invariant 5), then drops the now-empty source rows.
    pub fn rehome_event_docs(&self, from_event_id: EventId, to_event_id: EventId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO event_docs (event_id, doc_id, seen_at, is_primary)
             SELECT ?1, doc_id, seen_at, 0 FROM event_docs WHERE event_id = ?2",
            params![to_event_id.to_string(), from_event_id.to_string()],
        )?;
        conn.execute(
            "DELETE FROM event_docs WHERE event_id = ?1",
            params![from_event_id.to_string()],
        )?;
        Ok(())
    }

    /// Moves a named subset of an Event's documents onto a brand-new Event
    /// (§4.12 `SPLIT`), leaving the remaining edges on the source Event.
    pub fn move_event_docs(&self, from_event_id: EventId, to_event_id: EventId, doc_ids: &[DocId]) -> Result<()> {
        let conn = self.conn.lock();
        for doc_id in doc_ids {
            conn.execute(
                "INSERT OR IGNORE INTO event_docs (event_id, doc_id, seen_at, is_primary)
                 SELECT ?1, doc_id, seen_at, is_primary FROM event_docs WHERE event_id = ?2 AND doc_id = ?3",
                params![to_event_id.to_string(), from_event_id.to_string(), doc_id.to_string()],
            )?;
            conn.execute(
                "DELETE FROM event_docs WHERE event_id = ?1 AND doc_id = ?2",
                params![from_event_id.to_string(), doc_id.to_string()],
            )?;
        }
        Ok(())
    }

    /// Count of HTTP 2xx fetch attempts for `source_id` since `since` — the
    /// "traffic kept flowing" half of the Yield Monitor's bucket input
    /// (§4.11).
    pub fn count_http_ok_attempts_since(&self, source_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM fetch_attempts
             WHERE source_id = ?1 AND attempted_at > ?2 AND status_code BETWEEN 200 AND 299",
        )?;
        let count: i64 = stmt.query_row(params![source_id, ts(since)], |row| row.get(0))?;
        Ok(count as u32)
    }

    /// Count of Documents discovered for `source_id` since `since` that
    /// carry non-zero evidence — the "useful yield" half of the Yield
    /// Monitor's bucket input (§4.11).
    pub fn count_useful_documents_since(&self, source_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM documents d
             JOIN doc_evidence de ON de.doc_id = d.doc_id
             WHERE d.source_id = ?1 AND d.discovered_at > ?2 AND (de.anchor_count > 0 OR de.evidence_score > 0)",
        )?;
        let count: i64 = stmt.query_row(params![source_id, ts(since)], |row| row.get(0))?;
        Ok(count as u32)
    }
}

/// Per-Event aggregate over its attached Documents, computed fresh on every
/// scoring pass (§4.7) — not persisted itself, the Documents/Anchors/Evidence
/// rows it's derived from are.
#[derive(Debug, Clone)]
pub struct EventRollup {
    pub doc_count: u32,
    pub source_diversity: u32,
    pub docs_last_minute: u32,
    pub docs_prev_minute: u32,
    pub strong_anchor_count: u32,
    pub has_pdf: bool,
    pub has_official_domain: bool,
    pub best_tier: Tier,
    pub tier1_confirmed: bool,
    pub coverage_lag: Option<chrono::Duration>,
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    Ok(Document {
        doc_id: Uuid::from_str(&row.get::<_, String>(0)?).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        url: row.get(1)?,
        version_no: row.get(2)?,
        content_hash: row.get(3)?,
        clean_text: row.get(4)?,
        title: row.get(5)?,
        lang: row.get(6)?,
        canonical_url: row.get(7)?,
        published_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(&s)).transpose()?,
        modified_at: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(&s)).transpose()?,
        snapshot_hash: row.get(10)?,
        source_id: row.get(11)?,
        discovered_at: parse_ts(&row.get::<_, String>(12)?)?,
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let status_json: String = row.get(1)?;
    let flags_json: String = row.get(2)?;
    Ok(Event {
        event_id: Uuid::from_str(&row.get::<_, String>(0)?).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        status: serde_json::from_str(&status_json).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        flags: serde_json::from_str(&flags_json).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        canonical_event_id: row
            .get::<_, Option<String>>(3)?
            .map(|s| Uuid::from_str(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        first_seen_at: parse_ts(&row.get::<_, String>(4)?)?,
        last_seen_at: parse_ts(&row.get::<_, String>(5)?)?,
        summary: row.get(6)?,
        lane: row.get(7)?,
        seq: row.get::<_, i64>(8)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    fn sample_event() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            status: EventStatus::Hydrating,
            flags: HashSet::new(),
            canonical_event_id: None,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            summary: "Decreto abre credito extraordinario".to_string(),
            lane: "orcamento".to_string(),
            seq: 1,
        }
    }

    #[test]
    fn round_trips_an_event() {
        let db = Db::open_in_memory().unwrap();
        let event = sample_event();
        db.insert_event(&event).unwrap();
        let fetched = db.get_event(event.event_id).unwrap().unwrap();
        assert_eq!(fetched.event_id, event.event_id);
        assert_eq!(fetched.status, EventStatus::Hydrating);
    }

    #[test]
    fn optimistic_update_fails_on_stale_version() {
        let db = Db::open_in_memory().unwrap();
        let event = sample_event();
        db.insert_event(&event).unwrap();

        let stale = event.last_seen_at - Duration::seconds(5);
        let ok = db
            .update_status_optimistic(event.event_id, stale, EventStatus::Hot, Utc::now())
            .unwrap();
        assert!(!ok);

        let ok = db
            .update_status_optimistic(event.event_id, event.last_seen_at, EventStatus::Hot, Utc::now())
            .unwrap();
        assert!(ok);
        assert_eq!(db.get_event(event.event_id).unwrap().unwrap().status, EventStatus::Hot);
    }

    #[test]
    fn events_sharing_anchor_finds_cross_event_matches() {
        let db = Db::open_in_memory().unwrap();
        let e1 = sample_event();
        let mut e2 = sample_event();
        e2.event_id = Uuid::new_v4();
        db.insert_event(&e1).unwrap();
        db.insert_event(&e2).unwrap();

        let doc1 = Uuid::new_v4();
        let doc2 = Uuid::new_v4();
        let anchor = Anchor {
            anchor_type: AnchorType::Cnj,
            value: "0001234-56.2025.1.00.0000".to_string(),
            span_start: 0,
            span_end: 1,
            confidence: 0.98,
        };
        db.insert_anchors(doc1, std::slice::from_ref(&anchor)).unwrap();
        db.insert_anchors(doc2, std::slice::from_ref(&anchor)).unwrap();
        db.attach_document(&EventDoc { event_id: e1.event_id, doc_id: doc1, seen_at: Utc::now(), is_primary: true }).unwrap();
        db.attach_document(&EventDoc { event_id: e2.event_id, doc_id: doc2, seen_at: Utc::now(), is_primary: true }).unwrap();

        let sharing = db.events_sharing_anchor(AnchorType::Cnj, "0001234-56.2025.1.00.0000").unwrap();
        assert_eq!(sharing.len(), 2);
        assert!(sharing.contains(&e1.event_id));
        assert!(sharing.contains(&e2.event_id));
    }

    #[test]
    fn document_versioning_keeps_latest_by_version_no() {
        let db = Db::open_in_memory().unwrap();
        let source_id = "diario-oficial".to_string();
        let url = "https://in.gov.br/decreto-11555".to_string();

        let v1 = Document {
            doc_id: Uuid::new_v4(),
            url: url.clone(),
            version_no: 1,
            content_hash: "h1".to_string(),
            clean_text: "texto original".to_string(),
            title: "Decreto".to_string(),
            lang: Some("pt".to_string()),
            canonical_url: None,
            published_at: None,
            modified_at: None,
            snapshot_hash: None,
            source_id: source_id.clone(),
            discovered_at: Utc::now(),
        };
        let mut v2 = v1.clone();
        v2.doc_id = Uuid::new_v4();
        v2.version_no = 2;
        v2.content_hash = "h2".to_string();
        v2.clean_text = "texto retificado".to_string();

        db.insert_document(&v1).unwrap();
        db.insert_document(&v2).unwrap();

        let latest = db.latest_document_for_url(&url).unwrap().unwrap();
        assert_eq!(latest.version_no, 2);
        assert_eq!(latest.content_hash, "h2");
    }
}
