//! The `Store` trait — single async interface for all persistence.
//!
//! The engine and the API layer only ever see this trait; the libSQL
//! backend implements it, and engine tests substitute fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    AutomationStats, Customer, DueEnrollment, Enrollment, EnrollmentProgress, EnrollmentStatus,
    Flow, NewStep, Step,
};
use crate::webhook::WebhookRegistration;

/// Backend-agnostic storage trait.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Flows ───────────────────────────────────────────────────────

    /// Create an empty flow owned by `user_id`.
    async fn create_flow(&self, user_id: &str, name: &str) -> Result<Flow, DatabaseError>;

    /// Get a flow with its steps ordered by position.
    async fn get_flow(&self, id: Uuid) -> Result<Option<(Flow, Vec<Step>)>, DatabaseError>;

    /// List flows owned by `user_id`, most recent first.
    async fn list_flows(&self, user_id: &str) -> Result<Vec<Flow>, DatabaseError>;

    /// Rename a flow.
    async fn rename_flow(&self, id: Uuid, name: &str) -> Result<(), DatabaseError>;

    /// Delete a flow. Cascades to its steps and enrollments.
    async fn delete_flow(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Replace a flow's steps wholesale. Existing steps are deleted and the
    /// new list is inserted with contiguous zero-based positions — steps are
    /// never mutated individually.
    async fn save_steps(&self, flow_id: Uuid, steps: Vec<NewStep>) -> Result<Vec<Step>, DatabaseError>;

    // ── Customers ───────────────────────────────────────────────────

    /// Create a customer, or update the name of the existing one with the
    /// same email (email is the natural key).
    async fn upsert_customer(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> Result<Customer, DatabaseError>;

    /// Look up a customer by email.
    async fn get_customer_by_email(&self, email: &str) -> Result<Option<Customer>, DatabaseError>;

    // ── Enrollments ─────────────────────────────────────────────────

    /// Enroll a customer in a flow: step 0, due immediately, Active.
    /// Idempotent per (customer, flow) pair — re-enrolling returns the
    /// existing record untouched.
    async fn create_enrollment(
        &self,
        customer_id: Uuid,
        flow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, DatabaseError>;

    /// All Active enrollments with `next_action_at <= now`, hydrated with
    /// their customer and their flow's ordered steps.
    async fn list_due_enrollments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueEnrollment>, DatabaseError>;

    /// Claim an enrollment for processing: push `next_action_at` to
    /// `lease_until`, but only if it is still Active, still at
    /// `expected_step`, and still due as of `now`. Returns whether the
    /// claim won — a losing pass must skip the enrollment entirely.
    async fn claim_enrollment(
        &self,
        id: Uuid,
        expected_step: usize,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Advance an enrollment's step index, conditional on the index still
    /// being `from_step`. Returns whether a row changed.
    async fn advance_enrollment(
        &self,
        id: Uuid,
        from_step: usize,
        to_step: usize,
        next_action_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Transition an Active enrollment to Completed, stamping
    /// `completed_at`. Returns false if the enrollment was not Active
    /// (already completed by an overlapping pass, or paused).
    async fn mark_enrollment_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Set an enrollment's status by (customer, flow) pair, optionally
    /// resetting `next_action_at` (resume sets it to now). Returns whether
    /// the enrollment existed.
    async fn set_enrollment_status(
        &self,
        customer_id: Uuid,
        flow_id: Uuid,
        status: EnrollmentStatus,
        next_action_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// A customer's progress across all their enrollments.
    async fn customer_progress(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<EnrollmentProgress>, DatabaseError>;

    // ── Webhooks ────────────────────────────────────────────────────

    /// The single webhook registered by `user_id` for `event`, if any.
    async fn webhook_for_event(
        &self,
        user_id: &str,
        event: &str,
    ) -> Result<Option<WebhookRegistration>, DatabaseError>;

    /// Register (or replace) the webhook URL for a (user, event) pair.
    async fn upsert_webhook(
        &self,
        user_id: &str,
        event: &str,
        target_url: &str,
    ) -> Result<WebhookRegistration, DatabaseError>;

    // ── Stats ───────────────────────────────────────────────────────

    /// Aggregate counters for the stats endpoint.
    async fn automation_stats(&self, now: DateTime<Utc>) -> Result<AutomationStats, DatabaseError>;
}
