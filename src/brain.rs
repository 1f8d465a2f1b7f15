use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::AgentError;
use crate::memory::MemoryStore;
use crate::types::{Action, ActionKind, ButtonInfo, Confidence, PageSignature, PageSnapshot};

/// Labels that mark a control as moving the flow forward.
const PROGRESS_WORDS: &[&str] = &["next", "continue", "submit", "apply", "save and continue"];
/// Labels/automation ids that mark a consent control.
const NOTICE_WORDS: &[&str] = &["accept", "agree", "allow", "got it"];
const NOTICE_AUTOMATION_IDS: &[&str] = &["legalNoticeAcceptButton", "cookieAccept"];
const SIGNIN_WORDS: &[&str] = &["sign in", "log in", "login", "signin"];

/// What the generation fallback is given to work with.
#[derive(Debug)]
pub struct GenerationContext<'a> {
    pub snapshot: &'a PageSnapshot,
    pub known_selectors: &'a [String],
    pub last_error: Option<&'a str>,
}

/// Free-form action description coming back from the generation service.
/// Untrusted: it is folded onto the closed [`ActionKind`] set and still
/// goes through the normal executor strategies and validation.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedAction {
    pub action_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reasoning: String,
}

/// External generation capability, fallback only. May be absent entirely.
#[async_trait]
pub trait ActionGenerator: Send + Sync {
    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<GeneratedAction, AgentError>;
}

/// Priority-ordered decision policy. First match wins:
/// escalation on stuck, replay of a remembered success, rule-based
/// classification of the snapshot, then the generation fallback.
pub struct DecisionEngine {
    generator: Option<Box<dyn ActionGenerator>>,
}

impl DecisionEngine {
    pub fn new(generator: Option<Box<dyn ActionGenerator>>) -> Self {
        Self { generator }
    }

    pub async fn decide(
        &self,
        snapshot: &PageSnapshot,
        signature: &PageSignature,
        memory: &MemoryStore,
        cfg: &Config,
        last_attempted: Option<ActionKind>,
        last_error: Option<&str>,
    ) -> Action {
        // 1. Escalation: a filled form that never advances must be
        // submitted, not refilled.
        if let Some(kind) = last_attempted {
            if memory.stuck().is_stuck(signature, kind, cfg.stuck_threshold) {
                let escalated = escalate(kind);
                debug!(from = %kind, to = %escalated, "stuck, escalating");
                return Action {
                    kind: escalated,
                    target: self.target_for(escalated, snapshot),
                    rationale: format!("{kind} repeated without progress, forcing {escalated}"),
                    confidence: Confidence::High,
                };
            }
        }

        // 2. Replay: an already-solved page should not re-derive a strategy.
        if last_error.is_none() {
            if let Some(record) = memory.last_success_for(signature) {
                debug!(kind = %record.action.kind, "replaying remembered success");
                return Action {
                    kind: record.action.kind,
                    target: record.action.target.clone(),
                    rationale: "this action succeeded on this page before".into(),
                    confidence: Confidence::High,
                };
            }
        }

        // 3. Rule-based classification of the snapshot.
        if let Some(action) = classify(snapshot, cfg) {
            return action;
        }

        // 4. Generation fallback, least preferred.
        if let Some(generator) = &self.generator {
            let ctx = GenerationContext {
                snapshot,
                known_selectors: memory.known_selectors_for(signature),
                last_error,
            };
            match generator.generate(&ctx).await {
                Ok(generated) => {
                    let kind = ActionKind::parse_lenient(&generated.action_type);
                    return Action {
                        kind,
                        target: generated.target,
                        rationale: if generated.reasoning.is_empty() {
                            "suggested by generation fallback".into()
                        } else {
                            generated.reasoning
                        },
                        confidence: Confidence::Low,
                    };
                }
                Err(err) => {
                    warn!(error = %err, "generation fallback failed, trying generic progression");
                }
            }
        }

        // Nothing matched and no generator: attempt generic progression.
        Action {
            kind: ActionKind::ClickProgress,
            target: String::new(),
            rationale: "no rule matched, probing for a progression control".into(),
            confidence: Confidence::Low,
        }
    }

    fn target_for(&self, kind: ActionKind, snapshot: &PageSnapshot) -> String {
        match kind {
            ActionKind::SubmitCredentials => signin_button(snapshot)
                .map(|b| b.selector.clone())
                .unwrap_or_default(),
            ActionKind::ClickProgress => progress_button(snapshot)
                .map(|b| b.selector.clone())
                .unwrap_or_default(),
            ActionKind::AcceptNotice => notice_button(snapshot)
                .map(|b| b.selector.clone())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// Phase-terminal action forced when the normal one keeps repeating.
pub fn escalate(kind: ActionKind) -> ActionKind {
    match kind {
        ActionKind::FillCredentials => ActionKind::SubmitCredentials,
        ActionKind::FillFormFields => ActionKind::ClickProgress,
        ActionKind::AcceptNotice => ActionKind::ClickProgress,
        ActionKind::SubmitCredentials | ActionKind::ClickProgress | ActionKind::AwaitManual => {
            ActionKind::AwaitManual
        }
    }
}

fn classify(snapshot: &PageSnapshot, cfg: &Config) -> Option<Action> {
    if snapshot.has_credential_fields() {
        if !snapshot.credentials_filled() {
            return Some(Action {
                kind: ActionKind::FillCredentials,
                target: String::new(),
                rationale: "credential form with an empty password field".into(),
                confidence: Confidence::Medium,
            });
        }
        return Some(Action {
            kind: ActionKind::SubmitCredentials,
            target: signin_button(snapshot)
                .map(|b| b.selector.clone())
                .unwrap_or_default(),
            rationale: "credential form is already filled, must submit".into(),
            confidence: Confidence::Medium,
        });
    }

    if snapshot.empty_required_count() > cfg.empty_required_threshold {
        return Some(Action {
            kind: ActionKind::FillFormFields,
            target: String::new(),
            rationale: format!(
                "{} required fields are still empty",
                snapshot.empty_required_count()
            ),
            confidence: Confidence::Medium,
        });
    }

    if let Some(button) = progress_button(snapshot) {
        return Some(Action {
            kind: ActionKind::ClickProgress,
            target: button.selector.clone(),
            rationale: format!("progression control \"{}\" present", button.label),
            confidence: Confidence::Medium,
        });
    }

    if let Some(button) = notice_button(snapshot) {
        return Some(Action {
            kind: ActionKind::AcceptNotice,
            target: button.selector.clone(),
            rationale: format!("consent control \"{}\" and nothing else actionable", button.label),
            confidence: Confidence::Medium,
        });
    }

    None
}

pub fn progress_button(snapshot: &PageSnapshot) -> Option<&ButtonInfo> {
    snapshot.buttons.iter().find(|b| {
        let label = b.label.to_ascii_lowercase();
        PROGRESS_WORDS.iter().any(|w| label.contains(w))
    })
}

pub fn signin_button(snapshot: &PageSnapshot) -> Option<&ButtonInfo> {
    snapshot
        .buttons
        .iter()
        .find(|b| {
            b.automation_id
                .as_deref()
                .is_some_and(|id| id.to_ascii_lowercase().contains("signin"))
        })
        .or_else(|| {
            snapshot.buttons.iter().find(|b| {
                let label = b.label.to_ascii_lowercase();
                SIGNIN_WORDS.iter().any(|w| label.contains(w))
            })
        })
}

pub fn notice_button(snapshot: &PageSnapshot) -> Option<&ButtonInfo> {
    snapshot
        .buttons
        .iter()
        .find(|b| {
            b.automation_id
                .as_deref()
                .is_some_and(|id| NOTICE_AUTOMATION_IDS.iter().any(|n| id.contains(n)))
        })
        .or_else(|| {
            snapshot.buttons.iter().find(|b| {
                let label = b.label.to_ascii_lowercase();
                NOTICE_WORDS.iter().any(|w| label.contains(w))
            })
        })
}

/// OpenAI-compatible chat-completions client used as the generation
/// fallback. Called with a timeout; any failure degrades to the caller's
/// generic progression handling, never crashes the loop.
pub struct LlmGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

const GENERATION_PROMPT: &str = r#"You are helping a browser automation agent that is stuck on a page it cannot classify. Reply with ONE JSON object and nothing else:
{"action_type":"fill-credentials"|"submit-credentials"|"fill-form-fields"|"click-progress"|"accept-notice"|"await-manual","target":"css selector or empty","reasoning":"one sentence"}"#;

impl LlmGenerator {
    pub fn new(api_key: String, model: String, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key,
            model,
        }
    }

    /// Present only when an API key is configured.
    pub fn from_env(timeout: std::time::Duration) -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
        let model =
            std::env::var("AUTOAPPLY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(api_key, model, timeout))
    }
}

#[async_trait]
impl ActionGenerator for LlmGenerator {
    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<GeneratedAction, AgentError> {
        let mut user = format!(
            "PAGE:\n{}\n",
            serde_json::to_string_pretty(ctx.snapshot).unwrap_or_default()
        );
        if !ctx.known_selectors.is_empty() {
            user.push_str(&format!(
                "\nSELECTORS THAT WORKED HERE BEFORE:\n{}\n",
                ctx.known_selectors.join("\n")
            ));
        }
        if let Some(err) = ctx.last_error {
            user.push_str(&format!("\nLAST ATTEMPT FAILED WITH: {err}\n"));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": GENERATION_PROMPT},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.2,
            }))
            .send()
            .await
            .map_err(|e| AgentError::ExternalServiceFailure(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::ExternalServiceFailure(e.to_string()))?;
        if !status.is_success() {
            let msg = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(AgentError::ExternalServiceFailure(format!(
                "{status}: {msg}"
            )));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                AgentError::ExternalServiceFailure("no content in response".into())
            })?;

        // strip markdown fences the model sometimes adds
        let cleaned = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        serde_json::from_str(cleaned)
            .map_err(|e| AgentError::ExternalServiceFailure(format!("unparseable action: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldInfo;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(None)
    }

    fn credential_page(password_filled: bool) -> PageSnapshot {
        PageSnapshot {
            url: "https://jobs.example.com/login".into(),
            title: "Sign In".into(),
            text_inputs: vec![FieldInfo {
                selector: "[data-eid=\"e0\"]".into(),
                label: Some("Email address".into()),
                filled: password_filled,
                ..Default::default()
            }],
            password_inputs: vec![FieldInfo {
                selector: "[data-eid=\"e1\"]".into(),
                label: Some("Password".into()),
                filled: password_filled,
                ..Default::default()
            }],
            buttons: vec![ButtonInfo {
                selector: "[data-eid=\"e2\"]".into(),
                label: "Sign In".into(),
                automation_id: Some("signInSubmitButton".into()),
            }],
            modal_count: 1,
            ..Default::default()
        }
    }

    fn cfg() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn empty_credential_form_yields_fill_credentials() {
        let snap = credential_page(false);
        let sig = snap.signature();
        let memory = MemoryStore::ephemeral(10, 5);
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, None)
            .await;
        assert_eq!(action.kind, ActionKind::FillCredentials);
        assert_eq!(action.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn filled_credential_form_yields_submit() {
        let snap = credential_page(true);
        let sig = snap.signature();
        let memory = MemoryStore::ephemeral(10, 5);
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, None)
            .await;
        assert_eq!(action.kind, ActionKind::SubmitCredentials);
        assert_eq!(action.target, "[data-eid=\"e2\"]");
    }

    #[tokio::test]
    async fn stuck_on_fill_escalates_to_submit_regardless_of_memory() {
        let snap = credential_page(true);
        let sig = snap.signature();
        let mut memory = MemoryStore::ephemeral(10, 5);
        // memory says fill worked here before
        memory.record_action(
            &sig,
            &Action {
                kind: ActionKind::FillCredentials,
                target: String::new(),
                rationale: "t".into(),
                confidence: Confidence::Medium,
            },
            true,
            None,
            None,
        );
        let c = cfg();
        for _ in 0..3 {
            memory
                .stuck_mut()
                .observe(&sig, ActionKind::FillCredentials, c.stuck_threshold, c.stuck_window);
        }
        let action = engine()
            .decide(&snap, &sig, &memory, &c, Some(ActionKind::FillCredentials), None)
            .await;
        assert_eq!(action.kind, ActionKind::SubmitCredentials);
        assert_eq!(action.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn replay_reuses_remembered_action_kind() {
        let snap = credential_page(false);
        let sig = snap.signature();
        let mut memory = MemoryStore::ephemeral(10, 5);
        memory.record_action(
            &sig,
            &Action {
                kind: ActionKind::AcceptNotice,
                target: "#accept".into(),
                rationale: "t".into(),
                confidence: Confidence::Medium,
            },
            true,
            None,
            None,
        );
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, None)
            .await;
        assert_eq!(action.kind, ActionKind::AcceptNotice);
        assert_eq!(action.target, "#accept");
    }

    #[tokio::test]
    async fn replay_is_skipped_when_an_error_is_pending() {
        let snap = credential_page(false);
        let sig = snap.signature();
        let mut memory = MemoryStore::ephemeral(10, 5);
        memory.record_action(
            &sig,
            &Action {
                kind: ActionKind::AcceptNotice,
                target: "#accept".into(),
                rationale: "t".into(),
                confidence: Confidence::Medium,
            },
            true,
            None,
            None,
        );
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, Some("element unavailable"))
            .await;
        // falls through to rules: empty credential form
        assert_eq!(action.kind, ActionKind::FillCredentials);
    }

    #[tokio::test]
    async fn form_page_with_empty_required_fields_yields_fill_form() {
        let mut snap = PageSnapshot {
            url: "https://jobs.example.com/apply/step-1".into(),
            ..Default::default()
        };
        for i in 0..4 {
            snap.text_inputs.push(FieldInfo {
                selector: format!("[data-eid=\"e{i}\"]"),
                required: true,
                ..Default::default()
            });
        }
        let sig = snap.signature();
        let memory = MemoryStore::ephemeral(10, 5);
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, None)
            .await;
        assert_eq!(action.kind, ActionKind::FillFormFields);
    }

    #[tokio::test]
    async fn cookie_banner_alone_yields_accept_notice() {
        let snap = PageSnapshot {
            url: "https://jobs.example.com/".into(),
            buttons: vec![ButtonInfo {
                selector: "[data-eid=\"e0\"]".into(),
                label: "Accept cookies".into(),
                automation_id: Some("legalNoticeAcceptButton".into()),
            }],
            ..Default::default()
        };
        let sig = snap.signature();
        let memory = MemoryStore::ephemeral(10, 5);
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, None)
            .await;
        assert_eq!(action.kind, ActionKind::AcceptNotice);
    }

    #[tokio::test]
    async fn unclassifiable_page_without_generator_probes_progression() {
        let snap = PageSnapshot {
            url: "https://jobs.example.com/blank".into(),
            ..Default::default()
        };
        let sig = snap.signature();
        let memory = MemoryStore::ephemeral(10, 5);
        let action = engine()
            .decide(&snap, &sig, &memory, &cfg(), None, None)
            .await;
        assert_eq!(action.kind, ActionKind::ClickProgress);
        assert_eq!(action.confidence, Confidence::Low);
    }
}
