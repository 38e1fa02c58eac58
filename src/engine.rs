//! Flow execution engine.
//!
//! One invocation is one bounded pass: fetch all due enrollments, then for
//! each one execute its current step, schedule the next, and persist. Each
//! enrollment advances at most one step per pass, and completion always
//! happens on the pass *after* the last step executed — an enrollment whose
//! index has reached the step count is transitioned to Completed, with no
//! send, the next time it comes up.
//!
//! Overlapping passes are safe: before any side effect the engine claims the
//! enrollment with a conditional update narrowing on the step index. A pass
//! that loses the claim skips the enrollment without sending anything.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{DueEnrollment, EnrollmentStatus, Progress, Step, StepContent};
use crate::notify::{Notification, NotificationSender};
use crate::store::Store;
use crate::webhook::{WebhookEvent, WebhookSink};

/// Counters for one engine pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PassSummary {
    /// Enrollments that advanced a step or completed.
    pub processed: usize,
    /// Enrollments whose claim was lost to an overlapping pass.
    pub skipped: usize,
    /// Enrollments whose processing failed; they retry next pass.
    pub failed: usize,
}

enum Outcome {
    Advanced,
    Completed,
    Skipped,
}

/// The flow execution engine.
pub struct FlowEngine {
    store: Arc<dyn Store>,
    sender: Arc<dyn NotificationSender>,
    webhooks: Arc<dyn WebhookSink>,
    config: EngineConfig,
}

impl FlowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn NotificationSender>,
        webhooks: Arc<dyn WebhookSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sender,
            webhooks,
            config,
        }
    }

    /// Run one pass over all currently due enrollments.
    ///
    /// A failure fetching the due set fails the pass; failures processing
    /// individual enrollments are isolated, logged, and counted.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass with an explicit clock, for deterministic tests.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassSummary> {
        let due = self.store.list_due_enrollments(now).await?;
        debug!(due = due.len(), "Engine pass starting");

        let mut summary = PassSummary::default();
        for enrollment in due {
            let id = enrollment.enrollment.id;
            let email = enrollment.customer.email.clone();
            match self.process_one(enrollment, now).await {
                Ok(Outcome::Advanced | Outcome::Completed) => summary.processed += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    error!(enrollment = %id, customer = %email, "Processing failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Engine pass completed"
        );
        Ok(summary)
    }

    /// Process a single due enrollment: at most one step advance.
    async fn process_one(&self, mut due: DueEnrollment, now: DateTime<Utc>) -> Result<Outcome> {
        // Positions are contiguous by construction, but sort anyway so a
        // hand-edited database cannot reorder execution.
        due.steps.sort_by_key(|s| s.order);

        let enrollment = &due.enrollment;
        match enrollment.progress(due.steps.len()) {
            Progress::Exhausted => self.complete(&due, now).await,
            Progress::OutOfRange => {
                // The flow shrank underneath this enrollment. Pause it so it
                // stops burning pass cycles; an operator resumes it after
                // fixing the index.
                self.store
                    .set_enrollment_status(
                        enrollment.customer_id,
                        enrollment.flow_id,
                        EnrollmentStatus::Paused,
                        None,
                    )
                    .await?;
                Err(EngineError::StepIndexOutOfRange {
                    id: enrollment.id,
                    index: enrollment.current_step,
                    len: due.steps.len(),
                }
                .into())
            }
            Progress::AtStep(index) => self.execute_step(&due, index, now).await,
        }
    }

    /// Transition an exhausted enrollment to Completed and announce it.
    async fn complete(&self, due: &DueEnrollment, now: DateTime<Utc>) -> Result<Outcome> {
        let changed = self
            .store
            .mark_enrollment_completed(due.enrollment.id, now)
            .await?;
        if !changed {
            // Another pass got here first
            debug!(enrollment = %due.enrollment.id, "Completion already recorded, skipping");
            return Ok(Outcome::Skipped);
        }

        info!(
            customer = %due.customer.email,
            flow = %due.flow.name,
            "Onboarding completed"
        );

        self.webhooks
            .dispatch(
                &due.flow.user_id,
                WebhookEvent::OnboardingCompleted,
                serde_json::json!({
                    "customer": due.customer,
                    "onboarding": { "id": due.flow.id, "name": due.flow.name },
                    "completedAt": now,
                }),
            )
            .await;

        Ok(Outcome::Completed)
    }

    /// Claim the enrollment, execute `steps[index]`, and schedule the next
    /// step. The send happens before the advance is persisted, so a crash
    /// in between re-sends on the next pass (at-least-once delivery).
    async fn execute_step(
        &self,
        due: &DueEnrollment,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let enrollment = &due.enrollment;
        let lease_until = now + chrono_duration(self.config.claim_lease);

        let claimed = self
            .store
            .claim_enrollment(enrollment.id, index, now, lease_until)
            .await?;
        if !claimed {
            debug!(enrollment = %enrollment.id, "Claim lost to an overlapping pass, skipping");
            return Ok(Outcome::Skipped);
        }

        let step = &due.steps[index];
        info!(
            customer = %due.customer.email,
            flow = %due.flow.name,
            step = index + 1,
            total = due.steps.len(),
            kind = %step.kind,
            "Executing step"
        );

        // Delay steps send nothing; their effect is purely in scheduling.
        if let Some(notification) = Notification::from_step(&step.content, &due.customer, &self.config) {
            self.sender.send(notification).await?;
        }

        self.webhooks
            .dispatch(
                &due.flow.user_id,
                WebhookEvent::StepCompleted,
                serde_json::json!({
                    "customer": due.customer,
                    "onboarding": { "id": due.flow.id, "name": due.flow.name },
                    "step": {
                        "type": step.kind.as_str(),
                        "content": step.content,
                        "order": step.order,
                    },
                    "completedAt": now,
                }),
            )
            .await;

        let next_index = index + 1;
        let next_action_at = self.schedule_next(&due.steps, next_index, now);

        let advanced = self
            .store
            .advance_enrollment(enrollment.id, index, next_index, next_action_at)
            .await?;
        if !advanced {
            // Claim was ours, so this means external interference (pause,
            // deletion) between send and persist. The send is not undone.
            warn!(enrollment = %enrollment.id, "Advance did not apply after a won claim");
            return Ok(Outcome::Skipped);
        }

        Ok(Outcome::Advanced)
    }

    /// When the step at `next_index` should run.
    ///
    /// Delays are look-ahead: a pending Delay step pushes the due time out
    /// by its full day count. Any other pending step gets a small buffer so
    /// the enrollment is effectively immediate without tight re-processing.
    /// Past the end of the list the enrollment is due at once, so the next
    /// pass performs the completion transition.
    fn schedule_next(&self, steps: &[Step], next_index: usize, now: DateTime<Utc>) -> DateTime<Utc> {
        match steps.get(next_index).map(|s| &s.content) {
            Some(StepContent::Delay { delay_in_days }) => {
                now + chrono::Duration::days(i64::from(*delay_in_days))
            }
            Some(_) => now + chrono_duration(self.config.step_buffer),
            None => now,
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

/// Spawn the background ticker that runs an engine pass whenever the cron
/// schedule fires. The ticker checks the schedule every `tick_interval`.
pub fn spawn_cron_ticker(
    engine: Arc<FlowEngine>,
    schedule: cron::Schedule,
    tick_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        // Skip immediate first tick
        ticker.tick().await;

        let mut next_fire = schedule.upcoming(Utc).next();

        loop {
            ticker.tick().await;

            let Some(fire_at) = next_fire else {
                warn!("Cron schedule has no upcoming fire times, ticker idle");
                return;
            };
            if Utc::now() < fire_at {
                continue;
            }

            if let Err(e) = engine.run_pass().await {
                error!("Scheduled engine pass failed: {e}");
            }
            next_fire = schedule.upcoming(Utc).next();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::result::Result;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::{DatabaseError, NotifyError};
    use crate::model::{
        AutomationStats, Customer, Enrollment, EnrollmentProgress, Flow, FlowRef, NewStep,
    };
    use crate::webhook::WebhookRegistration;

    // ── Fakes ───────────────────────────────────────────────────────

    /// In-memory store fake covering the engine-facing surface.
    #[derive(Default)]
    struct FakeStore {
        due: Mutex<Vec<DueEnrollment>>,
        /// Enrollment state the conditional updates operate on.
        state: Mutex<HashMap<Uuid, Enrollment>>,
        /// Claims to reject, simulating a lost race.
        reject_claims: Mutex<Vec<Uuid>>,
        advances: Mutex<Vec<(Uuid, usize, usize, DateTime<Utc>)>>,
        completions: Mutex<Vec<Uuid>>,
        status_changes: Mutex<Vec<(Uuid, Uuid, EnrollmentStatus)>>,
    }

    impl FakeStore {
        fn seed(&self, due: Vec<DueEnrollment>) {
            let mut state = self.state.lock().unwrap();
            for d in &due {
                state.insert(d.enrollment.id, d.enrollment.clone());
            }
            *self.due.lock().unwrap() = due;
        }
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn create_flow(&self, _: &str, _: &str) -> Result<Flow, DatabaseError> {
            unimplemented!()
        }

        async fn get_flow(&self, _: Uuid) -> Result<Option<(Flow, Vec<Step>)>, DatabaseError> {
            unimplemented!()
        }

        async fn list_flows(&self, _: &str) -> Result<Vec<Flow>, DatabaseError> {
            unimplemented!()
        }

        async fn rename_flow(&self, _: Uuid, _: &str) -> Result<(), DatabaseError> {
            unimplemented!()
        }

        async fn delete_flow(&self, _: Uuid) -> Result<(), DatabaseError> {
            unimplemented!()
        }

        async fn save_steps(&self, _: Uuid, _: Vec<NewStep>) -> Result<Vec<Step>, DatabaseError> {
            unimplemented!()
        }

        async fn upsert_customer(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> Result<Customer, DatabaseError> {
            unimplemented!()
        }

        async fn get_customer_by_email(&self, _: &str) -> Result<Option<Customer>, DatabaseError> {
            unimplemented!()
        }

        async fn create_enrollment(
            &self,
            _: Uuid,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> Result<Enrollment, DatabaseError> {
            unimplemented!()
        }

        async fn list_due_enrollments(
            &self,
            _: DateTime<Utc>,
        ) -> Result<Vec<DueEnrollment>, DatabaseError> {
            Ok(self.due.lock().unwrap().clone())
        }

        async fn claim_enrollment(
            &self,
            id: Uuid,
            expected_step: usize,
            now: DateTime<Utc>,
            lease_until: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            if self.reject_claims.lock().unwrap().contains(&id) {
                return Ok(false);
            }
            let mut state = self.state.lock().unwrap();
            let Some(e) = state.get_mut(&id) else {
                return Ok(false);
            };
            if e.status != EnrollmentStatus::Active
                || e.current_step != expected_step
                || e.next_action_at > now
            {
                return Ok(false);
            }
            e.next_action_at = lease_until;
            Ok(true)
        }

        async fn advance_enrollment(
            &self,
            id: Uuid,
            from_step: usize,
            to_step: usize,
            next_action_at: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            let mut state = self.state.lock().unwrap();
            let Some(e) = state.get_mut(&id) else {
                return Ok(false);
            };
            if e.status != EnrollmentStatus::Active || e.current_step != from_step {
                return Ok(false);
            }
            e.current_step = to_step;
            e.next_action_at = next_action_at;
            self.advances
                .lock()
                .unwrap()
                .push((id, from_step, to_step, next_action_at));
            Ok(true)
        }

        async fn mark_enrollment_completed(
            &self,
            id: Uuid,
            completed_at: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            let mut state = self.state.lock().unwrap();
            let Some(e) = state.get_mut(&id) else {
                return Ok(false);
            };
            if e.status != EnrollmentStatus::Active {
                return Ok(false);
            }
            e.status = EnrollmentStatus::Completed;
            e.completed_at = Some(completed_at);
            self.completions.lock().unwrap().push(id);
            Ok(true)
        }

        async fn set_enrollment_status(
            &self,
            customer_id: Uuid,
            flow_id: Uuid,
            status: EnrollmentStatus,
            _next_action_at: Option<DateTime<Utc>>,
        ) -> Result<bool, DatabaseError> {
            self.status_changes
                .lock()
                .unwrap()
                .push((customer_id, flow_id, status));
            let mut state = self.state.lock().unwrap();
            for e in state.values_mut() {
                if e.customer_id == customer_id && e.flow_id == flow_id {
                    e.status = status;
                }
            }
            Ok(true)
        }

        async fn customer_progress(
            &self,
            _: Uuid,
        ) -> Result<Vec<EnrollmentProgress>, DatabaseError> {
            unimplemented!()
        }

        async fn webhook_for_event(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<WebhookRegistration>, DatabaseError> {
            Ok(None)
        }

        async fn upsert_webhook(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<WebhookRegistration, DatabaseError> {
            unimplemented!()
        }

        async fn automation_stats(&self, _: DateTime<Utc>) -> Result<AutomationStats, DatabaseError> {
            unimplemented!()
        }
    }

    /// Recording sender; fails for any recipient in `fail_for`.
    #[derive(Default)]
    struct FakeSender {
        sent: Mutex<Vec<Notification>>,
        fail_for: Mutex<Vec<String>>,
    }

    fn recipient(n: &Notification) -> &str {
        match n {
            Notification::Email { to, .. } => to,
            Notification::Sms { phone, .. } => phone,
            Notification::Telegram { chat_id, .. } => chat_id,
            Notification::Push { token, .. } => token,
        }
    }

    #[async_trait]
    impl NotificationSender for FakeSender {
        async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
            if self
                .fail_for
                .lock()
                .unwrap()
                .iter()
                .any(|r| r == recipient(&notification))
            {
                return Err(NotifyError::SendFailed {
                    channel: notification.channel().to_string(),
                    reason: "simulated outage".to_string(),
                });
            }
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }
    }

    /// Recording webhook sink.
    #[derive(Default)]
    struct FakeSink {
        dispatched: Mutex<Vec<(String, WebhookEvent, serde_json::Value)>>,
    }

    #[async_trait]
    impl WebhookSink for FakeSink {
        async fn dispatch(&self, owner: &str, event: WebhookEvent, payload: serde_json::Value) {
            self.dispatched
                .lock()
                .unwrap()
                .push((owner.to_string(), event, payload));
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    fn customer(email: &str) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: Some("Ana".to_string()),
            created_at: Utc::now(),
        }
    }

    fn step(flow_id: Uuid, order: u32, content: StepContent) -> Step {
        Step {
            id: Uuid::new_v4(),
            flow_id,
            kind: content.kind(),
            content,
            order,
            created_at: Utc::now(),
        }
    }

    /// [Email, Delay(2), SMS] — the canonical three-step flow.
    fn drip_steps(flow_id: Uuid) -> Vec<Step> {
        vec![
            step(
                flow_id,
                0,
                StepContent::Email {
                    subject: Some("Hi {{name}}".to_string()),
                    body: "Welcome aboard".to_string(),
                },
            ),
            step(flow_id, 1, StepContent::Delay { delay_in_days: 2 }),
            step(
                flow_id,
                2,
                StepContent::Sms {
                    phone: "+15550001111".to_string(),
                    message: "Checking in".to_string(),
                },
            ),
        ]
    }

    fn due_enrollment(email: &str, current_step: usize, steps: Vec<Step>) -> DueEnrollment {
        let cust = customer(email);
        let flow_id = steps.first().map(|s| s.flow_id).unwrap_or_else(Uuid::new_v4);
        DueEnrollment {
            enrollment: Enrollment {
                id: Uuid::new_v4(),
                customer_id: cust.id,
                flow_id,
                status: EnrollmentStatus::Active,
                current_step,
                next_action_at: Utc::now() - chrono::Duration::minutes(5),
                created_at: Utc::now() - chrono::Duration::days(1),
                completed_at: None,
            },
            customer: cust,
            flow: FlowRef {
                id: flow_id,
                user_id: "owner-1".to_string(),
                name: "Welcome drip".to_string(),
            },
            steps,
        }
    }

    struct Harness {
        store: Arc<FakeStore>,
        sender: Arc<FakeSender>,
        sink: Arc<FakeSink>,
        engine: FlowEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(FakeStore::default());
        let sender = Arc::new(FakeSender::default());
        let sink = Arc::new(FakeSink::default());
        let engine = FlowEngine::new(
            store.clone(),
            sender.clone(),
            sink.clone(),
            EngineConfig::default(),
        );
        Harness {
            store,
            sender,
            sink,
            engine,
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_step_sends_email_and_schedules_the_delay() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let due = due_enrollment("ana@example.com", 0, drip_steps(flow_id));
        let id = due.enrollment.id;
        h.store.seed(vec![due]);

        let now = Utc::now();
        let summary = h.engine.run_pass_at(now).await.unwrap();
        assert_eq!(summary, PassSummary { processed: 1, skipped: 0, failed: 0 });

        // One email, personalized
        let sent = h.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let Notification::Email { to, subject, .. } = &sent[0] else {
            panic!("expected email");
        };
        assert_eq!(to, "ana@example.com");
        assert_eq!(subject, "Hi Ana");

        // Advanced to index 1 with the pending delay applied exactly
        let advances = h.store.advances.lock().unwrap();
        assert_eq!(advances.len(), 1);
        let (aid, from, to_step, next_at) = advances[0];
        assert_eq!((aid, from, to_step), (id, 0, 1));
        assert_eq!(next_at, now + chrono::Duration::days(2));

        // step.completed fired with the step's kind
        let dispatched = h.sink.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        let (owner, event, payload) = &dispatched[0];
        assert_eq!(owner, "owner-1");
        assert_eq!(*event, WebhookEvent::StepCompleted);
        assert_eq!(payload["step"]["type"], "EMAIL");
        assert_eq!(payload["step"]["order"], 0);
        assert_eq!(payload["customer"]["email"], "ana@example.com");
    }

    #[tokio::test]
    async fn delay_step_sends_nothing_but_still_announces() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let due = due_enrollment("ana@example.com", 1, drip_steps(flow_id));
        h.store.seed(vec![due]);

        let now = Utc::now();
        let summary = h.engine.run_pass_at(now).await.unwrap();
        assert_eq!(summary.processed, 1);

        assert!(h.sender.sent.lock().unwrap().is_empty());

        let dispatched = h.sink.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].2["step"]["type"], "DELAY");

        // Next step is SMS, so scheduling is the small buffer
        let advances = h.store.advances.lock().unwrap();
        let (_, _, to_step, next_at) = advances[0];
        assert_eq!(to_step, 2);
        assert_eq!(next_at, now + chrono::Duration::seconds(60));
        assert!(next_at > now);
    }

    #[tokio::test]
    async fn last_step_leaves_enrollment_active_and_immediately_due() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let due = due_enrollment("ana@example.com", 2, drip_steps(flow_id));
        let id = due.enrollment.id;
        h.store.seed(vec![due]);

        let now = Utc::now();
        h.engine.run_pass_at(now).await.unwrap();

        // SMS sent, index ran past the end, due immediately, still Active
        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
        let state = h.store.state.lock().unwrap();
        let e = state.get(&id).unwrap();
        assert_eq!(e.current_step, 3);
        assert_eq!(e.next_action_at, now);
        assert_eq!(e.status, EnrollmentStatus::Active);
        assert!(h.store.completions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_is_a_distinct_pass() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let due = due_enrollment("ana@example.com", 3, drip_steps(flow_id));
        let id = due.enrollment.id;
        h.store.seed(vec![due]);

        let now = Utc::now();
        let summary = h.engine.run_pass_at(now).await.unwrap();
        assert_eq!(summary.processed, 1);

        // No send, status flipped, onboarding.completed fired
        assert!(h.sender.sent.lock().unwrap().is_empty());
        assert_eq!(*h.store.completions.lock().unwrap(), vec![id]);

        let state = h.store.state.lock().unwrap();
        let e = state.get(&id).unwrap();
        assert_eq!(e.status, EnrollmentStatus::Completed);
        assert!(e.completed_at.is_some());

        let dispatched = h.sink.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        let (_, event, payload) = &dispatched[0];
        assert_eq!(*event, WebhookEvent::OnboardingCompleted);
        assert_eq!(payload["onboarding"]["name"], "Welcome drip");
        assert!(payload["completedAt"].is_string());
    }

    #[tokio::test]
    async fn empty_flow_completes_on_first_pass() {
        let h = harness();
        let due = due_enrollment("ana@example.com", 0, vec![]);
        h.store.seed(vec![due]);

        let summary = h.engine.run_pass_at(Utc::now()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(h.store.completions.lock().unwrap().len(), 1);
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_step_per_pass_even_when_wildly_overdue() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let steps: Vec<Step> = (0..3)
            .map(|i| {
                step(
                    flow_id,
                    i,
                    StepContent::Telegram {
                        chat_id: "42".to_string(),
                        message: format!("msg {i}"),
                    },
                )
            })
            .collect();
        let mut due = due_enrollment("ana@example.com", 0, steps);
        due.enrollment.next_action_at = Utc::now() - chrono::Duration::days(30);
        let id = due.enrollment.id;
        h.store.seed(vec![due]);

        h.engine.run_pass_at(Utc::now()).await.unwrap();

        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
        assert_eq!(h.store.state.lock().unwrap().get(&id).unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_enrollment() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let first = due_enrollment("ok-one@example.com", 0, drip_steps(flow_id));
        let second = due_enrollment("broken@example.com", 0, drip_steps(flow_id));
        let third = due_enrollment("ok-two@example.com", 0, drip_steps(flow_id));
        let (first_id, second_id, third_id) = (
            first.enrollment.id,
            second.enrollment.id,
            third.enrollment.id,
        );
        h.store.seed(vec![first, second, third]);
        h.sender
            .fail_for
            .lock()
            .unwrap()
            .push("broken@example.com".to_string());

        let summary = h.engine.run_pass_at(Utc::now()).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);

        let state = h.store.state.lock().unwrap();
        assert_eq!(state.get(&first_id).unwrap().current_step, 1);
        assert_eq!(state.get(&third_id).unwrap().current_step, 1);
        // The failing enrollment did not advance; it retries next pass
        assert_eq!(state.get(&second_id).unwrap().current_step, 0);
    }

    #[tokio::test]
    async fn lost_claim_skips_without_side_effects() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let due = due_enrollment("ana@example.com", 0, drip_steps(flow_id));
        let id = due.enrollment.id;
        h.store.seed(vec![due]);
        h.store.reject_claims.lock().unwrap().push(id);

        let summary = h.engine.run_pass_at(Utc::now()).await.unwrap();
        assert_eq!(summary, PassSummary { processed: 0, skipped: 1, failed: 0 });
        assert!(h.sender.sent.lock().unwrap().is_empty());
        assert!(h.sink.dispatched.lock().unwrap().is_empty());
        assert!(h.store.advances.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_index_pauses_the_enrollment() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        // Flow shrank to one step while the enrollment sat at index 5
        let steps = vec![step(
            flow_id,
            0,
            StepContent::Email {
                subject: None,
                body: "hi".to_string(),
            },
        )];
        let due = due_enrollment("ana@example.com", 5, steps);
        let (customer_id, flow_ref_id) = (due.customer.id, due.flow.id);
        h.store.seed(vec![due]);

        let summary = h.engine.run_pass_at(Utc::now()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(h.sender.sent.lock().unwrap().is_empty());

        let changes = h.store.status_changes.lock().unwrap();
        assert_eq!(
            *changes,
            vec![(customer_id, flow_ref_id, EnrollmentStatus::Paused)]
        );
    }

    #[tokio::test]
    async fn steps_are_sorted_defensively_before_execution() {
        let h = harness();
        let flow_id = Uuid::new_v4();
        let mut steps = drip_steps(flow_id);
        steps.reverse();
        let due = due_enrollment("ana@example.com", 0, steps);
        h.store.seed(vec![due]);

        h.engine.run_pass_at(Utc::now()).await.unwrap();

        // Step 0 is the email regardless of fetch order
        let sent = h.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Notification::Email { .. }));
    }
}
