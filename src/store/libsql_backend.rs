//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 text in a single canonical format so `<=` comparisons in SQL
//! match chronological order.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    AutomationStats, Customer, DueEnrollment, Enrollment, EnrollmentProgress, EnrollmentStatus,
    Flow, FlowRef, NewStep, Step, StepContent, StepKind,
};
use crate::store::migrations;
use crate::store::traits::Store;
use crate::webhook::WebhookRegistration;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let backend = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        // Cascades depend on this pragma; SQLite defaults it off
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to enable FKs: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Ordered steps for one flow.
    async fn steps_for_flow(&self, flow_id: Uuid) -> Result<Vec<Step>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, flow_id, kind, content, position, created_at
                 FROM steps WHERE flow_id = ?1 ORDER BY position ASC",
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("steps_for_flow: {e}")))?;

        let mut steps = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            steps.push(row_to_step(&row)?);
        }
        Ok(steps)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format for storage and SQL comparison.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str, entity: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|_| DatabaseError::Query(format!("invalid {entity} id '{s}'")))
}

async fn next_row(rows: &mut libsql::Rows) -> Result<Option<libsql::Row>, DatabaseError> {
    rows.next()
        .await
        .map_err(|e| DatabaseError::Query(format!("row fetch: {e}")))
}

fn get_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("column read: {e}"))
}

// ── Row mappers ─────────────────────────────────────────────────────

/// Columns: 0:id, 1:user_id, 2:name, 3:created_at, 4:updated_at
fn row_to_flow(row: &libsql::Row) -> Result<Flow, DatabaseError> {
    let id: String = row.get(0).map_err(get_err)?;
    Ok(Flow {
        id: parse_uuid(&id, "flow")?,
        user_id: row.get(1).map_err(get_err)?,
        name: row.get(2).map_err(get_err)?,
        created_at: parse_datetime(&row.get::<String>(3).map_err(get_err)?),
        updated_at: parse_datetime(&row.get::<String>(4).map_err(get_err)?),
    })
}

/// Columns: 0:id, 1:flow_id, 2:kind, 3:content, 4:position, 5:created_at
fn row_to_step(row: &libsql::Row) -> Result<Step, DatabaseError> {
    let id: String = row.get(0).map_err(get_err)?;
    let flow_id: String = row.get(1).map_err(get_err)?;
    let kind_str: String = row.get(2).map_err(get_err)?;
    let content_json: String = row.get(3).map_err(get_err)?;
    let position: i64 = row.get(4).map_err(get_err)?;

    let kind = StepKind::from_str(&kind_str)?;
    let content = StepContent::decode(kind, &content_json)?;

    Ok(Step {
        id: parse_uuid(&id, "step")?,
        flow_id: parse_uuid(&flow_id, "flow")?,
        kind,
        content,
        order: position as u32,
        created_at: parse_datetime(&row.get::<String>(5).map_err(get_err)?),
    })
}

/// Columns: 0:id, 1:email, 2:name, 3:created_at
fn row_to_customer(row: &libsql::Row) -> Result<Customer, DatabaseError> {
    let id: String = row.get(0).map_err(get_err)?;
    Ok(Customer {
        id: parse_uuid(&id, "customer")?,
        email: row.get(1).map_err(get_err)?,
        name: row.get(2).ok(),
        created_at: parse_datetime(&row.get::<String>(3).map_err(get_err)?),
    })
}

/// Columns: 0:id, 1:customer_id, 2:flow_id, 3:status, 4:current_step,
/// 5:next_action_at, 6:created_at, 7:completed_at
fn row_to_enrollment(row: &libsql::Row) -> Result<Enrollment, DatabaseError> {
    let id: String = row.get(0).map_err(get_err)?;
    let customer_id: String = row.get(1).map_err(get_err)?;
    let flow_id: String = row.get(2).map_err(get_err)?;
    let status_str: String = row.get(3).map_err(get_err)?;
    let current_step: i64 = row.get(4).map_err(get_err)?;
    let completed_at: Option<String> = row.get(7).ok();

    Ok(Enrollment {
        id: parse_uuid(&id, "enrollment")?,
        customer_id: parse_uuid(&customer_id, "customer")?,
        flow_id: parse_uuid(&flow_id, "flow")?,
        status: EnrollmentStatus::from_str(&status_str)?,
        current_step: current_step as usize,
        next_action_at: parse_datetime(&row.get::<String>(5).map_err(get_err)?),
        created_at: parse_datetime(&row.get::<String>(6).map_err(get_err)?),
        completed_at: parse_optional_datetime(&completed_at),
    })
}

/// Columns: 0:id, 1:user_id, 2:event, 3:target_url, 4:created_at
fn row_to_webhook(row: &libsql::Row) -> Result<WebhookRegistration, DatabaseError> {
    let id: String = row.get(0).map_err(get_err)?;
    Ok(WebhookRegistration {
        id: parse_uuid(&id, "webhook")?,
        user_id: row.get(1).map_err(get_err)?,
        event: row.get(2).map_err(get_err)?,
        target_url: row.get(3).map_err(get_err)?,
        created_at: parse_datetime(&row.get::<String>(4).map_err(get_err)?),
    })
}

const ENROLLMENT_COLUMNS: &str =
    "id, customer_id, flow_id, status, current_step, next_action_at, created_at, completed_at";

// ── Store impl ──────────────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create_flow(&self, user_id: &str, name: &str) -> Result<Flow, DatabaseError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO flows (id, user_id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.to_string(), user_id, name, fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_flow: {e}")))?;

        Ok(Flow {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_flow(&self, id: Uuid) -> Result<Option<(Flow, Vec<Step>)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, created_at, updated_at FROM flows WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_flow: {e}")))?;

        match next_row(&mut rows).await? {
            Some(row) => {
                let flow = row_to_flow(&row)?;
                let steps = self.steps_for_flow(id).await?;
                Ok(Some((flow, steps)))
            }
            None => Ok(None),
        }
    }

    async fn list_flows(&self, user_id: &str) -> Result<Vec<Flow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, created_at, updated_at FROM flows
                 WHERE user_id = ?1 ORDER BY created_at DESC",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_flows: {e}")))?;

        let mut flows = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            flows.push(row_to_flow(&row)?);
        }
        Ok(flows)
    }

    async fn rename_flow(&self, id: Uuid, name: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE flows SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, fmt_ts(Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("rename_flow: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "flow".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_flow(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM flows WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_flow: {e}")))?;
        Ok(())
    }

    async fn save_steps(
        &self,
        flow_id: Uuid,
        steps: Vec<NewStep>,
    ) -> Result<Vec<Step>, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();

        // Wholesale replace: positions are re-derived from list order, so
        // the (flow_id, position) sequence is always contiguous from 0.
        conn.execute(
            "DELETE FROM steps WHERE flow_id = ?1",
            params![flow_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_steps/delete: {e}")))?;

        let mut saved = Vec::with_capacity(steps.len());
        for (position, step) in steps.into_iter().enumerate() {
            let id = Uuid::new_v4();
            let kind = step.content.kind();
            let content_json = serde_json::to_string(&step.content)
                .map_err(|e| DatabaseError::Query(format!("save_steps/encode: {e}")))?;

            conn.execute(
                "INSERT INTO steps (id, flow_id, kind, content, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    flow_id.to_string(),
                    kind.as_str(),
                    content_json,
                    position as i64,
                    fmt_ts(now)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_steps/insert: {e}")))?;

            saved.push(Step {
                id,
                flow_id,
                kind,
                content: step.content,
                order: position as u32,
                created_at: now,
            });
        }

        conn.execute(
            "UPDATE flows SET updated_at = ?1 WHERE id = ?2",
            params![fmt_ts(now), flow_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_steps/touch: {e}")))?;

        Ok(saved)
    }

    async fn upsert_customer(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> Result<Customer, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO customers (id, email, name, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (email)
                 DO UPDATE SET name = COALESCE(excluded.name, customers.name)",
                params![
                    Uuid::new_v4().to_string(),
                    email,
                    opt_text(name),
                    fmt_ts(Utc::now())
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_customer: {e}")))?;

        self.get_customer_by_email(email)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "customer".to_string(),
                id: email.to_string(),
            })
    }

    async fn get_customer_by_email(&self, email: &str) -> Result<Option<Customer>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, email, name, created_at FROM customers WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_customer_by_email: {e}")))?;

        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_customer(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_enrollment(
        &self,
        customer_id: Uuid,
        flow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO enrollments
                     (id, customer_id, flow_id, status, current_step, next_action_at, created_at)
                 VALUES (?1, ?2, ?3, 'ACTIVE', 0, ?4, ?4)
                 ON CONFLICT (customer_id, flow_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    customer_id.to_string(),
                    flow_id.to_string(),
                    fmt_ts(now)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_enrollment: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
                     WHERE customer_id = ?1 AND flow_id = ?2"
                ),
                params![customer_id.to_string(), flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_enrollment/select: {e}")))?;

        match next_row(&mut rows).await? {
            Some(row) => row_to_enrollment(&row),
            None => Err(DatabaseError::NotFound {
                entity: "enrollment".to_string(),
                id: format!("{customer_id}/{flow_id}"),
            }),
        }
    }

    async fn list_due_enrollments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueEnrollment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT e.id, e.customer_id, e.flow_id, e.status, e.current_step,
                        e.next_action_at, e.created_at, e.completed_at,
                        c.id, c.email, c.name, c.created_at,
                        f.user_id, f.name
                 FROM enrollments e
                 JOIN customers c ON c.id = e.customer_id
                 JOIN flows f ON f.id = e.flow_id
                 WHERE e.status = 'ACTIVE' AND e.next_action_at <= ?1
                 ORDER BY e.next_action_at ASC",
                params![fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_due_enrollments: {e}")))?;

        let mut raw = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            let enrollment = row_to_enrollment(&row)?;
            let customer_id: String = row.get(8).map_err(get_err)?;
            let customer = Customer {
                id: parse_uuid(&customer_id, "customer")?,
                email: row.get(9).map_err(get_err)?,
                name: row.get(10).ok(),
                created_at: parse_datetime(&row.get::<String>(11).map_err(get_err)?),
            };
            let flow = FlowRef {
                id: enrollment.flow_id,
                user_id: row.get(12).map_err(get_err)?,
                name: row.get(13).map_err(get_err)?,
            };
            raw.push((enrollment, customer, flow));
        }

        // Hydrate steps once per flow. A flow whose steps fail to decode
        // poisons only its own enrollments; they stay due and are retried
        // (and logged) on the next pass.
        let mut steps_by_flow: HashMap<Uuid, Option<Vec<Step>>> = HashMap::new();
        let mut due = Vec::with_capacity(raw.len());
        for (enrollment, customer, flow) in raw {
            let entry = match steps_by_flow.get(&flow.id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = match self.steps_for_flow(flow.id).await {
                        Ok(steps) => Some(steps),
                        Err(e) => {
                            tracing::error!(flow_id = %flow.id, "Undecodable steps, skipping flow's due enrollments: {e}");
                            None
                        }
                    };
                    steps_by_flow.insert(flow.id, fetched.clone());
                    fetched
                }
            };

            if let Some(steps) = entry {
                due.push(DueEnrollment {
                    enrollment,
                    customer,
                    flow,
                    steps,
                });
            }
        }

        Ok(due)
    }

    async fn claim_enrollment(
        &self,
        id: Uuid,
        expected_step: usize,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE enrollments SET next_action_at = ?1
                 WHERE id = ?2 AND status = 'ACTIVE'
                   AND current_step = ?3 AND next_action_at <= ?4",
                params![
                    fmt_ts(lease_until),
                    id.to_string(),
                    expected_step as i64,
                    fmt_ts(now)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_enrollment: {e}")))?;
        Ok(changed > 0)
    }

    async fn advance_enrollment(
        &self,
        id: Uuid,
        from_step: usize,
        to_step: usize,
        next_action_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE enrollments SET current_step = ?1, next_action_at = ?2
                 WHERE id = ?3 AND status = 'ACTIVE' AND current_step = ?4",
                params![
                    to_step as i64,
                    fmt_ts(next_action_at),
                    id.to_string(),
                    from_step as i64
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_enrollment: {e}")))?;
        Ok(changed > 0)
    }

    async fn mark_enrollment_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE enrollments SET status = 'COMPLETED', completed_at = ?1
                 WHERE id = ?2 AND status = 'ACTIVE'",
                params![fmt_ts(completed_at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_enrollment_completed: {e}")))?;
        Ok(changed > 0)
    }

    async fn set_enrollment_status(
        &self,
        customer_id: Uuid,
        flow_id: Uuid,
        status: EnrollmentStatus,
        next_action_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let changed = match next_action_at {
            Some(at) => self
                .conn()
                .execute(
                    "UPDATE enrollments SET status = ?1, next_action_at = ?2
                     WHERE customer_id = ?3 AND flow_id = ?4",
                    params![
                        status.as_str(),
                        fmt_ts(at),
                        customer_id.to_string(),
                        flow_id.to_string()
                    ],
                )
                .await,
            None => self
                .conn()
                .execute(
                    "UPDATE enrollments SET status = ?1
                     WHERE customer_id = ?2 AND flow_id = ?3",
                    params![
                        status.as_str(),
                        customer_id.to_string(),
                        flow_id.to_string()
                    ],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("set_enrollment_status: {e}")))?;

        Ok(changed > 0)
    }

    async fn customer_progress(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<EnrollmentProgress>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT f.id, f.name, e.status, e.current_step, e.next_action_at,
                        (SELECT COUNT(*) FROM steps s WHERE s.flow_id = f.id)
                 FROM enrollments e
                 JOIN flows f ON f.id = e.flow_id
                 WHERE e.customer_id = ?1
                 ORDER BY e.created_at DESC",
                params![customer_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("customer_progress: {e}")))?;

        let mut progress = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            let flow_id: String = row.get(0).map_err(get_err)?;
            let status_str: String = row.get(2).map_err(get_err)?;
            let current_step: i64 = row.get(3).map_err(get_err)?;
            let total_steps: i64 = row.get(5).map_err(get_err)?;

            progress.push(EnrollmentProgress {
                flow_id: parse_uuid(&flow_id, "flow")?,
                flow_name: row.get(1).map_err(get_err)?,
                status: EnrollmentStatus::from_str(&status_str)?,
                current_step: current_step as usize,
                total_steps: total_steps as usize,
                progress_percentage: EnrollmentProgress::percentage(
                    current_step as usize,
                    total_steps as usize,
                ),
                next_action_at: parse_datetime(&row.get::<String>(4).map_err(get_err)?),
            });
        }
        Ok(progress)
    }

    async fn webhook_for_event(
        &self,
        user_id: &str,
        event: &str,
    ) -> Result<Option<WebhookRegistration>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, event, target_url, created_at
                 FROM webhooks WHERE user_id = ?1 AND event = ?2",
                params![user_id, event],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("webhook_for_event: {e}")))?;

        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(row_to_webhook(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_webhook(
        &self,
        user_id: &str,
        event: &str,
        target_url: &str,
    ) -> Result<WebhookRegistration, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO webhooks (id, user_id, event, target_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (user_id, event)
                 DO UPDATE SET target_url = excluded.target_url",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    event,
                    target_url,
                    fmt_ts(Utc::now())
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_webhook: {e}")))?;

        self.webhook_for_event(user_id, event)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "webhook".to_string(),
                id: format!("{user_id}/{event}"),
            })
    }

    async fn automation_stats(&self, now: DateTime<Utc>) -> Result<AutomationStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT
                    (SELECT COUNT(*) FROM flows),
                    (SELECT COUNT(*) FROM enrollments WHERE status = 'ACTIVE'),
                    (SELECT COUNT(*) FROM enrollments WHERE status = 'COMPLETED'),
                    (SELECT COUNT(*) FROM enrollments
                        WHERE status = 'ACTIVE' AND next_action_at <= ?1)",
                params![fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("automation_stats: {e}")))?;

        match next_row(&mut rows).await? {
            Some(row) => Ok(AutomationStats {
                flows: row.get::<i64>(0).map_err(get_err)? as u64,
                active_enrollments: row.get::<i64>(1).map_err(get_err)? as u64,
                completed_enrollments: row.get::<i64>(2).map_err(get_err)? as u64,
                due_now: row.get::<i64>(3).map_err(get_err)? as u64,
            }),
            None => Ok(AutomationStats::default()),
        }
    }
}
