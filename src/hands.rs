use tracing::{debug, trace};

use crate::brain::{notice_button, progress_button, signin_button};
use crate::browser::{BrowserControl, Handle, Interaction};
use crate::errors::{AgentError, Result};
use crate::profile::Profile;
use crate::types::{Action, ActionKind, FieldInfo, PageSnapshot};

/// What one execution attempt did: which strategy performed an operation
/// and which locator resolved. "Performed" is not "succeeded"; the
/// validator owns ground truth.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub strategy: &'static str,
    pub selector: Option<String>,
    /// Fields actually written, for fill actions.
    pub fields_written: usize,
}

/// Canonical click strategy order. A strategy that performs without
/// error but produces no page change is not re-run on the step's retry;
/// the retry resumes at the next rung.
const CLICK_LADDER: [&str; 4] = ["direct-click", "forced-click", "form-submit", "press-enter"];

/// Thin adapter over the browser capability. Attempts an action through an
/// ordered list of strategies; each strategy failing falls through to the
/// next, and only when all of them raise does the executor report a hard
/// failure. Holds no state across calls.
pub struct ActionExecutor<'a, B: BrowserControl> {
    browser: &'a B,
    profile: &'a Profile,
}

impl<'a, B: BrowserControl> ActionExecutor<'a, B> {
    pub fn new(browser: &'a B, profile: &'a Profile) -> Self {
        Self { browser, profile }
    }

    /// `known_selectors` come from memory for the current page signature
    /// and are tried before anything derived from the snapshot.
    /// `resume_after` is the strategy a previous attempt of this same
    /// action already performed to no effect; the ladder starts past it
    /// so a silently-swallowed click does not starve the later rungs.
    pub fn execute(
        &self,
        action: &Action,
        snapshot: &PageSnapshot,
        known_selectors: &[String],
        resume_after: Option<&str>,
    ) -> Result<ExecutionReport> {
        match action.kind {
            ActionKind::FillCredentials => self.fill_credentials(snapshot),
            ActionKind::FillFormFields => self.fill_form_fields(snapshot),
            ActionKind::SubmitCredentials | ActionKind::ClickProgress | ActionKind::AcceptNotice => {
                self.click_control(action, snapshot, known_selectors, resume_after)
            }
            ActionKind::AwaitManual => Ok(ExecutionReport {
                strategy: "await-manual",
                selector: None,
                fields_written: 0,
            }),
        }
    }

    fn click_control(
        &self,
        action: &Action,
        snapshot: &PageSnapshot,
        known_selectors: &[String],
        resume_after: Option<&str>,
    ) -> Result<ExecutionReport> {
        let candidates = self.click_candidates(action, snapshot, known_selectors);
        if candidates.is_empty() {
            return Err(AgentError::ElementUnavailable(format!(
                "no candidate control for {}",
                action.kind
            )));
        }

        let start = resume_after
            .and_then(|done| CLICK_LADDER.iter().position(|s| *s == done))
            .map_or(0, |i| i + 1);

        for (rung, (strategy, interaction)) in [
            ("direct-click", Interaction::Click),
            ("forced-click", Interaction::ForcedClick),
        ]
        .into_iter()
        .enumerate()
        {
            if rung < start {
                continue;
            }
            for selector in &candidates {
                match self.try_interact(selector, &interaction) {
                    Ok(true) => {
                        debug!(strategy, selector = selector.as_str(), "control engaged");
                        return Ok(ExecutionReport {
                            strategy,
                            selector: Some(selector.clone()),
                            fields_written: 0,
                        });
                    }
                    Ok(false) => trace!(strategy, selector = selector.as_str(), "not found"),
                    Err(err) => {
                        if err.is_fatal() {
                            return Err(err);
                        }
                        trace!(strategy, selector = selector.as_str(), error = %err, "strategy failed");
                    }
                }
            }
        }

        // submit the owning form through any field that resolves
        if let Some(field) = credential_anchor(snapshot) {
            for (rung, (strategy, interaction)) in [
                ("form-submit", Interaction::SubmitForm),
                ("press-enter", Interaction::PressEnter),
            ]
            .into_iter()
            .enumerate()
            {
                if rung + 2 < start {
                    continue;
                }
                match self.try_interact(&field.selector, &interaction) {
                    Ok(true) => {
                        return Ok(ExecutionReport {
                            strategy,
                            selector: Some(field.selector.clone()),
                            fields_written: 0,
                        });
                    }
                    Ok(false) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => trace!(strategy, error = %err, "strategy failed"),
                }
            }
        }

        Err(AgentError::ElementUnavailable(format!(
            "all strategies exhausted for {}",
            action.kind
        )))
    }

    fn click_candidates(
        &self,
        action: &Action,
        snapshot: &PageSnapshot,
        known_selectors: &[String],
    ) -> Vec<String> {
        let mut candidates: Vec<String> = known_selectors.to_vec();
        if !action.target.is_empty() {
            candidates.push(action.target.clone());
        }
        let derived = match action.kind {
            ActionKind::SubmitCredentials => signin_button(snapshot).or_else(|| progress_button(snapshot)),
            ActionKind::AcceptNotice => notice_button(snapshot),
            _ => progress_button(snapshot),
        };
        if let Some(button) = derived {
            candidates.push(button.selector.clone());
        }
        candidates.dedup();
        candidates
    }

    fn fill_credentials(&self, snapshot: &PageSnapshot) -> Result<ExecutionReport> {
        let mut written = 0;
        let mut last_selector = None;

        if let Some(field) = email_field(snapshot) {
            let value = self.profile.value_for(field_descriptor(field));
            let value = if value.is_empty() {
                self.profile.value_for("email")
            } else {
                value
            };
            if !value.is_empty() && self.type_with_fallback(&field.selector, &value)? {
                written += 1;
                last_selector = Some(field.selector.clone());
            }
        }

        if let Some(field) = snapshot.password_inputs.first() {
            let value = self.profile.value_for("password");
            if !value.is_empty() && self.type_with_fallback(&field.selector, &value)? {
                written += 1;
                last_selector = Some(field.selector.clone());
            }
        }

        if written == 0 {
            return Err(AgentError::ElementUnavailable(
                "no credential field could be written".into(),
            ));
        }
        Ok(ExecutionReport {
            strategy: "fill-credentials",
            selector: last_selector,
            fields_written: written,
        })
    }

    fn fill_form_fields(&self, snapshot: &PageSnapshot) -> Result<ExecutionReport> {
        let mut written = 0;
        let mut last_selector = None;

        for field in snapshot
            .text_inputs
            .iter()
            .chain(&snapshot.textareas)
            .chain(&snapshot.selects)
            .filter(|f| !f.filled)
        {
            let value = self.profile.value_for(field_descriptor(field));
            if value.is_empty() {
                continue;
            }
            if self.type_with_fallback(&field.selector, &value)? {
                written += 1;
                last_selector = Some(field.selector.clone());
            }
        }

        for field in snapshot.file_inputs.iter().filter(|f| !f.filled) {
            let path = self.profile.value_for("resume_path");
            if path.is_empty() {
                continue;
            }
            if self.try_interact(&field.selector, &Interaction::Upload(path))? {
                written += 1;
                last_selector = Some(field.selector.clone());
            }
        }

        if written == 0 {
            return Err(AgentError::ElementUnavailable(
                "no form field could be written".into(),
            ));
        }
        Ok(ExecutionReport {
            strategy: "fill-form-fields",
            selector: last_selector,
            fields_written: written,
        })
    }

    /// Direct typing first, scripted value assignment second.
    fn type_with_fallback(&self, selector: &str, value: &str) -> Result<bool> {
        match self.try_interact(selector, &Interaction::Type(value.to_string())) {
            Ok(true) => return Ok(true),
            Ok(false) => return Ok(false),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => trace!(selector, error = %err, "typing failed, trying scripted set"),
        }
        match self.try_interact(selector, &Interaction::SetValue(value.to_string())) {
            Ok(performed) => Ok(performed),
            Err(err) if err.is_fatal() => Err(err),
            Err(_) => Ok(false),
        }
    }

    /// Ok(false) means the element was absent; errors from the
    /// interaction itself propagate to the caller's strategy loop.
    fn try_interact(&self, selector: &str, interaction: &Interaction) -> Result<bool> {
        let Some(handle) = self.browser.locate(selector)? else {
            return Ok(false);
        };
        self.browser.interact(&handle, interaction)?;
        Ok(true)
    }
}

fn field_descriptor(field: &FieldInfo) -> &str {
    field
        .label
        .as_deref()
        .or(field.name.as_deref())
        .unwrap_or("")
}

/// The field a form-level submit or confirm key should anchor to.
fn credential_anchor(snapshot: &PageSnapshot) -> Option<&FieldInfo> {
    snapshot
        .password_inputs
        .first()
        .or_else(|| snapshot.text_inputs.first())
}

fn email_field(snapshot: &PageSnapshot) -> Option<&FieldInfo> {
    snapshot
        .text_inputs
        .iter()
        .find(|f| {
            let hint = format!(
                "{} {}",
                f.label.as_deref().unwrap_or(""),
                f.name.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();
            hint.contains("email") || hint.contains("user")
        })
        .or_else(|| snapshot.text_inputs.first())
}
