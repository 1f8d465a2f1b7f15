use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An interactive form field as seen in one snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldInfo {
    /// CSS selector that resolves this field on the live page.
    pub selector: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub filled: bool,
}

/// A clickable control as seen in one snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ButtonInfo {
    pub selector: String,
    pub label: String,
    #[serde(default)]
    pub automation_id: Option<String>,
}

/// Normalized, comparable view of the live page. Captured once per step,
/// immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub text_inputs: Vec<FieldInfo>,
    #[serde(default)]
    pub password_inputs: Vec<FieldInfo>,
    #[serde(default)]
    pub selects: Vec<FieldInfo>,
    #[serde(default)]
    pub textareas: Vec<FieldInfo>,
    #[serde(default)]
    pub file_inputs: Vec<FieldInfo>,
    #[serde(default)]
    pub buttons: Vec<ButtonInfo>,
    #[serde(default)]
    pub text_sample: String,
    #[serde(default)]
    pub modal_count: usize,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

impl PageSnapshot {
    pub fn modal_present(&self) -> bool {
        self.modal_count > 0
    }

    /// A credential form is any page exposing a password input.
    pub fn has_credential_fields(&self) -> bool {
        !self.password_inputs.is_empty()
    }

    /// Credentials count as filled once the password field has a value.
    pub fn credentials_filled(&self) -> bool {
        self.password_inputs.iter().any(|f| f.filled)
    }

    pub fn filled_field_count(&self) -> usize {
        self.all_fields().filter(|f| f.filled).count()
    }

    pub fn empty_required_count(&self) -> usize {
        self.all_fields().filter(|f| f.required && !f.filled).count()
    }

    pub fn any_file_filled(&self) -> bool {
        self.file_inputs.iter().any(|f| f.filled)
    }

    pub fn all_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.text_inputs
            .iter()
            .chain(&self.password_inputs)
            .chain(&self.selects)
            .chain(&self.textareas)
            .chain(&self.file_inputs)
    }

    /// Stable fingerprint of the page's structural shape. Two snapshots of
    /// the same logical page must hash the same even when transient text
    /// or element ordering differs; a real navigation or modal change
    /// should hash differently. Collisions are treated as "same page".
    pub fn signature(&self) -> PageSignature {
        let base_url = self.url.split('?').next().unwrap_or("");

        let mut labels: Vec<String> = self
            .buttons
            .iter()
            .map(|b| b.label.chars().take(20).collect())
            .collect();
        labels.sort();
        labels.truncate(5);

        let mut hasher = blake3::Hasher::new();
        hasher.update(base_url.as_bytes());
        for n in [
            self.text_inputs.len(),
            self.password_inputs.len(),
            self.selects.len(),
            self.textareas.len(),
            self.file_inputs.len(),
            self.buttons.len(),
            self.modal_count,
        ] {
            hasher.update(&(n as u64).to_le_bytes());
        }
        for label in &labels {
            hasher.update(label.as_bytes());
            hasher.update(b"|");
        }
        PageSignature(hasher.finalize().to_hex().to_string())
    }
}

/// Fingerprint of a logical page state. Used as the memory key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageSignature(pub String);

impl std::fmt::Display for PageSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // short form is enough for logs
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// Closed set of things the agent knows how to do to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    FillCredentials,
    SubmitCredentials,
    FillFormFields,
    ClickProgress,
    AcceptNotice,
    AwaitManual,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FillCredentials => "fill-credentials",
            ActionKind::SubmitCredentials => "submit-credentials",
            ActionKind::FillFormFields => "fill-form-fields",
            ActionKind::ClickProgress => "click-progress",
            ActionKind::AcceptNotice => "accept-notice",
            ActionKind::AwaitManual => "await-manual",
        }
    }

    /// Best-effort mapping of free-form names (including the ones the
    /// generation service or older memory files may emit) onto the closed
    /// set. Unknown names fall back to a generic progression attempt.
    pub fn parse_lenient(raw: &str) -> ActionKind {
        let normalized: String = raw
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        match normalized.as_str() {
            "fill-credentials" | "fill-sign-in-form" | "fill-login" => ActionKind::FillCredentials,
            "submit-credentials" | "click-sign-in-button" | "sign-in" | "login" => {
                ActionKind::SubmitCredentials
            }
            "fill-form-fields" | "fill-form" | "upload-file" => ActionKind::FillFormFields,
            "click-progress" | "click-button" | "navigate" | "next" | "continue" | "submit" => {
                ActionKind::ClickProgress
            }
            "accept-notice" | "accept-cookies" | "cookies" => ActionKind::AcceptNotice,
            "await-manual" | "needs-user-input" | "manual" => ActionKind::AwaitManual,
            _ => ActionKind::ClickProgress,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the decision was reached. Logged only, never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// One candidate action for the current step. Produced fresh each step and
/// only persisted by value inside an [`ActionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// CSS selector or human-readable descriptor of the element to act on.
    /// May be empty when the executor should derive targets itself.
    #[serde(default)]
    pub target: String,
    pub rationale: String,
    pub confidence: Confidence,
}

/// Ground-truth classification of a before/after snapshot pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Success,
    LikelySuccess,
    Partial,
    NoChange,
    Failure,
}

impl Verdict {
    /// Whether the step is recorded as a success in memory. `NoChange` is a
    /// soft failure even when the attempted action raised no error.
    pub fn counts_as_success(&self) -> bool {
        matches!(
            self,
            Verdict::Success | Verdict::LikelySuccess | Verdict::Partial
        )
    }
}

/// Append-only ledger entry owned by the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub at: DateTime<Utc>,
    pub signature: PageSignature,
    pub action: Action,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
