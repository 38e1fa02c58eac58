//! Domain models: flows, steps, customers, enrollments.
//!
//! Step content is a tagged union keyed by step kind. Rows are decoded and
//! validated at the storage boundary via [`StepContent::decode`] — the engine
//! never sees raw JSON blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

// ── Step kinds & content ────────────────────────────────────────────

/// The closed set of step kinds a flow can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Email,
    Sms,
    Telegram,
    Push,
    Whatsapp,
    Delay,
}

impl StepKind {
    /// Database/wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Telegram => "TELEGRAM",
            Self::Push => "PUSH",
            Self::Whatsapp => "WHATSAPP_MSG",
            Self::Delay => "DELAY",
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(Self::Email),
            "SMS" => Ok(Self::Sms),
            "TELEGRAM" => Ok(Self::Telegram),
            "PUSH" => Ok(Self::Push),
            "WHATSAPP_MSG" => Ok(Self::Whatsapp),
            "DELAY" => Ok(Self::Delay),
            other => Err(DatabaseError::InvalidStepContent {
                kind: other.to_string(),
                message: "unknown step kind".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific step payload.
///
/// Field names in the serialized form match the flow editor's JSON
/// (`delayInDays`, `chat_id`, ...), so webhook consumers see the same
/// content shape the editor produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepContent {
    Email {
        #[serde(skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        body: String,
    },
    Sms {
        phone: String,
        message: String,
    },
    Telegram {
        chat_id: String,
        message: String,
    },
    Push {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Whatsapp {
        phone: String,
        message: String,
    },
    Delay {
        #[serde(rename = "delayInDays")]
        delay_in_days: u32,
    },
}

/// Raw deserialization targets for [`StepContent::decode`]. Kept separate
/// so each kind gets a strict field set while legacy aliases (`message`
/// as the email body) still decode.
mod raw {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Email {
        #[serde(default)]
        pub subject: Option<String>,
        #[serde(default)]
        pub body: Option<String>,
        #[serde(default)]
        pub message: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Sms {
        pub phone: String,
        #[serde(default)]
        pub message: String,
    }

    #[derive(Deserialize)]
    pub struct Telegram {
        pub chat_id: String,
        #[serde(default)]
        pub message: String,
    }

    #[derive(Deserialize)]
    pub struct Push {
        pub token: String,
        #[serde(default)]
        pub title: Option<String>,
        #[serde(default)]
        pub message: String,
        #[serde(default)]
        pub data: Option<serde_json::Value>,
    }

    #[derive(Deserialize)]
    pub struct Delay {
        #[serde(rename = "delayInDays", default = "default_delay")]
        pub delay_in_days: u32,
    }

    pub fn default_delay() -> u32 {
        1
    }
}

impl StepContent {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Email { .. } => StepKind::Email,
            Self::Sms { .. } => StepKind::Sms,
            Self::Telegram { .. } => StepKind::Telegram,
            Self::Push { .. } => StepKind::Push,
            Self::Whatsapp { .. } => StepKind::Whatsapp,
            Self::Delay { .. } => StepKind::Delay,
        }
    }

    /// Decode a content JSON blob for the given kind.
    ///
    /// Recipient fields (phone, chat_id, token) are required; message text
    /// defaults to empty, matching what the flow editor may save.
    pub fn decode(kind: StepKind, json: &str) -> Result<Self, DatabaseError> {
        let invalid = |e: serde_json::Error| DatabaseError::InvalidStepContent {
            kind: kind.as_str().to_string(),
            message: e.to_string(),
        };

        match kind {
            StepKind::Email => {
                let c: raw::Email = serde_json::from_str(json).map_err(invalid)?;
                Ok(Self::Email {
                    subject: c.subject,
                    body: c.body.or(c.message).unwrap_or_default(),
                })
            }
            StepKind::Sms => {
                let c: raw::Sms = serde_json::from_str(json).map_err(invalid)?;
                Ok(Self::Sms {
                    phone: c.phone,
                    message: c.message,
                })
            }
            StepKind::Telegram => {
                let c: raw::Telegram = serde_json::from_str(json).map_err(invalid)?;
                Ok(Self::Telegram {
                    chat_id: c.chat_id,
                    message: c.message,
                })
            }
            StepKind::Push => {
                let c: raw::Push = serde_json::from_str(json).map_err(invalid)?;
                Ok(Self::Push {
                    token: c.token,
                    title: c.title,
                    message: c.message,
                    data: c.data,
                })
            }
            StepKind::Whatsapp => {
                let c: raw::Sms = serde_json::from_str(json).map_err(invalid)?;
                Ok(Self::Whatsapp {
                    phone: c.phone,
                    message: c.message,
                })
            }
            StepKind::Delay => {
                let c: raw::Delay = serde_json::from_str(json).map_err(invalid)?;
                Ok(Self::Delay {
                    delay_in_days: c.delay_in_days,
                })
            }
        }
    }
}

// ── Flows & steps ───────────────────────────────────────────────────

/// A user-owned onboarding flow (drip campaign template).
#[derive(Debug, Clone, Serialize)]
pub struct Flow {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One unit of a flow: a message send or a timed delay.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: Uuid,
    pub flow_id: Uuid,
    #[serde(rename = "type", serialize_with = "serialize_kind")]
    pub kind: StepKind,
    pub content: StepContent,
    /// Zero-based position within the flow; contiguous after any save.
    pub order: u32,
    pub created_at: DateTime<Utc>,
}

fn serialize_kind<S: serde::Serializer>(kind: &StepKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

/// A step as submitted by the flow editor; order is assigned on save.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub content: StepContent,
}

// ── Customers ───────────────────────────────────────────────────────

/// An external end-user, uniquely identified by email.
#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Display name, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

// ── Enrollments ─────────────────────────────────────────────────────

/// Lifecycle status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(DatabaseError::Query(format!(
                "unknown enrollment status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One customer's membership in one flow.
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub flow_id: Uuid,
    pub status: EnrollmentStatus,
    /// Index of the step to execute next. Equal to the step count once all
    /// steps have run and the enrollment awaits its completion pass.
    pub current_step: usize,
    pub next_action_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Where an enrollment stands relative to its flow's step list.
///
/// `Exhausted` is the explicit "all steps executed, completion pending"
/// state — completion always happens on the pass *after* the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The step at this index is due for execution.
    AtStep(usize),
    /// All steps executed; the next pass transitions to Completed.
    Exhausted,
    /// Index is beyond the step list — the flow was edited underneath
    /// this enrollment.
    OutOfRange,
}

impl Enrollment {
    /// Classify this enrollment against a flow with `step_count` steps.
    pub fn progress(&self, step_count: usize) -> Progress {
        if self.current_step < step_count {
            Progress::AtStep(self.current_step)
        } else if self.current_step == step_count {
            Progress::Exhausted
        } else {
            Progress::OutOfRange
        }
    }
}

/// Flow identity carried alongside a due enrollment (no step list — steps
/// travel separately, already ordered).
#[derive(Debug, Clone, Serialize)]
pub struct FlowRef {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
}

/// A due enrollment hydrated with its customer and flow steps.
#[derive(Debug, Clone)]
pub struct DueEnrollment {
    pub enrollment: Enrollment,
    pub customer: Customer,
    pub flow: FlowRef,
    pub steps: Vec<Step>,
}

// ── Reporting rows ──────────────────────────────────────────────────

/// A customer's progress through one flow, for the progress API.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentProgress {
    pub flow_id: Uuid,
    pub flow_name: String,
    pub status: EnrollmentStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub progress_percentage: u32,
    pub next_action_at: DateTime<Utc>,
}

impl EnrollmentProgress {
    /// Percentage of steps executed, rounded.
    pub fn percentage(current_step: usize, total_steps: usize) -> u32 {
        if total_steps == 0 {
            return 0;
        }
        ((current_step as f64 / total_steps as f64) * 100.0).round() as u32
    }
}

/// Aggregate counters for the stats API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutomationStats {
    pub flows: u64,
    pub active_enrollments: u64,
    pub completed_enrollments: u64,
    pub due_now: u64,
}
