use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Events on this target are persisted at any level.
pub const AUDIT_TARGET: &str = "audit";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        step TEXT,
        fields TEXT,
        session_id TEXT,
        case_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_log(session_id);
    CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);";

/// A persisted warning or orchestration decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub step: Option<String>,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub case_id: Option<String>,
}

/// Query parameters for searching persisted records.
#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub level: Option<String>,
    pub session_id: Option<String>,
    pub step: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink behind [`AuditLayer`].
pub struct AuditSink {
    conn: Mutex<Connection>,
}

impl AuditSink {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn insert(&self, record: &AuditInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO audit_log (timestamp, level, target, message, step, fields, session_id, case_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.step,
                record.fields,
                record.session_id,
                record.case_id,
            ],
        );
    }

    /// Newest first.
    pub fn query(&self, q: &AuditQuery) -> Result<Vec<AuditRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, step, fields, session_id, case_id
             FROM audit_log WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.clone()));
        }
        if let Some(session_id) = &q.session_id {
            sql.push_str(&format!(" AND session_id = ?{}", params.len() + 1));
            params.push(Box::new(session_id.clone()));
        }
        if let Some(step) = &q.step {
            sql.push_str(&format!(" AND step = ?{}", params.len() + 1));
            params.push(Box::new(step.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");
        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(AuditRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                step: row.get(5)?,
                fields: row.get(6)?,
                session_id: row.get(7)?,
                case_id: row.get(8)?,
            })
        })?;

        rows.collect()
    }

    /// The last `limit` records of one session in the order they happened,
    /// i.e. the decision path of its most recent turns.
    pub fn recent_for_session(&self, session_id: &str, limit: u32) -> Result<Vec<AuditRecord>, rusqlite::Error> {
        let mut records = self.query(&AuditQuery {
            session_id: Some(session_id.to_owned()),
            limit: Some(limit),
            ..Default::default()
        })?;
        records.reverse();
        Ok(records)
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
    }
}

struct AuditInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    step: Option<String>,
    fields: Option<String>,
    session_id: Option<String>,
    case_id: Option<String>,
}

/// tracing Layer that writes warn+ events and every `audit` event to SQLite.
pub struct AuditLayer {
    sink: Arc<AuditSink>,
}

impl AuditLayer {
    pub fn new(sink: Arc<AuditSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    step: Option<String>,
    session_id: Option<String>,
    case_id: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldVisitor {
    fn put(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "step" => self.step = Some(value),
            "session_id" => self.session_id = Some(value),
            "case_id" => self.case_id = Some(value),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        self.put(field.name(), val.trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

/// Stored on spans to propagate session_id / case_id to child events.
struct SpanFields {
    session_id: Option<String>,
    case_id: Option<String>,
}

impl<S> Layer<S> for AuditLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > tracing::Level::WARN && metadata.target() != AUDIT_TARGET {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if visitor.session_id.is_none() || visitor.case_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.session_id.is_none() {
                            visitor.session_id.clone_from(&fields.session_id);
                        }
                        if visitor.case_id.is_none() {
                            visitor.case_id.clone_from(&fields.case_id);
                        }
                    }
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&AuditInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            step: visitor.step,
            fields,
            session_id: visitor.session_id,
            case_id: visitor.case_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if visitor.session_id.is_some() || visitor.case_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    session_id: visitor.session_id,
                    case_id: visitor.case_id,
                });
            }
        }
    }
}
