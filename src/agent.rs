use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::brain::DecisionEngine;
use crate::browser::BrowserControl;
use crate::config::Config;
use crate::errors::AgentError;
use crate::hands::ActionExecutor;
use crate::judge;
use crate::memory::MemoryStore;
use crate::profile::Profile;
use crate::types::{ActionKind, PageSignature, PageSnapshot, Verdict};

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalStatus {
    /// A confirmation-style page was observed.
    Success,
    /// Cancelled, or the browser session became unusable.
    Aborted(String),
    /// Step budget spent without reaching confirmation.
    BudgetExhausted,
}

/// Orchestrates the step sequence: snapshot, fingerprint, decide, execute
/// with retries, validate against the pre-step snapshot, remember. Steps
/// run strictly sequentially; the browser session is exclusively owned by
/// the in-flight step.
pub struct Agent<B: BrowserControl> {
    browser: B,
    profile: Profile,
    engine: DecisionEngine,
    memory: MemoryStore,
    cfg: Config,
    cancel: CancellationToken,
}

impl<B: BrowserControl> Agent<B> {
    pub fn new(
        browser: B,
        profile: Profile,
        engine: DecisionEngine,
        memory: MemoryStore,
        cfg: Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            browser,
            profile,
            engine,
            memory,
            cfg,
            cancel,
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Run until a terminal state. The memory store is flushed on every
    /// terminal transition, including aborts.
    pub async fn run(&mut self) -> FinalStatus {
        let mut last_attempted: Option<(PageSignature, ActionKind)> = None;

        for step in 1..=self.cfg.max_steps {
            // cancellation is honored before starting a step, never mid-step
            if self.cancel.is_cancelled() {
                return self.finish(FinalStatus::Aborted("cancelled".into()));
            }

            // let any in-flight navigation settle before reading; a
            // lapsed wait is not an error, the snapshot decides
            self.browser.wait_for("body", self.cfg.wait_timeout);

            let pre = match self.browser.snapshot() {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    error!(error = %err, "snapshot failed");
                    return self.finish(FinalStatus::Aborted(err.to_string()));
                }
            };

            if self.is_confirmation(&pre) {
                info!(step, url = %pre.url, "confirmation page reached");
                return self.finish(FinalStatus::Success);
            }

            let signature = pre.signature();
            info!(step, url = %pre.url, signature = %signature, "step start");

            match self.run_step(step, &pre, &signature, &mut last_attempted).await {
                Ok(StepEnd::Continue) => {}
                Ok(StepEnd::Confirmed) => return self.finish(FinalStatus::Success),
                Err(err) => {
                    error!(error = %err, "unrecoverable driver error");
                    return self.finish(FinalStatus::Aborted(err.to_string()));
                }
            }
        }

        self.finish(FinalStatus::BudgetExhausted)
    }

    /// One bounded step: decide, execute, validate, record, with up to
    /// `max_retries` decision regenerations when the attempt hard-fails
    /// or has no observable effect. A retry of the same action kind
    /// resumes the executor's strategy ladder past the rung that already
    /// ran to no effect. Only `DriverFatal` escapes.
    async fn run_step(
        &mut self,
        step: usize,
        pre: &PageSnapshot,
        signature: &PageSignature,
        last_attempted: &mut Option<(PageSignature, ActionKind)>,
    ) -> Result<StepEnd, AgentError> {
        let stuck_kind = match last_attempted {
            Some((sig, kind)) if *sig == *signature => Some(*kind),
            _ => None,
        };
        let mut last_error: Option<String> = None;
        // strategy the previous ineffective attempt already performed;
        // the next attempt of the same kind resumes past it
        let mut resume_after: Option<(ActionKind, &'static str)> = None;

        for attempt in 1..=self.cfg.max_retries {
            let action = self
                .engine
                .decide(
                    pre,
                    signature,
                    &self.memory,
                    &self.cfg,
                    stuck_kind,
                    last_error.as_deref(),
                )
                .await;
            info!(
                step,
                attempt,
                kind = %action.kind,
                confidence = ?action.confidence,
                rationale = %action.rationale,
                "action decided"
            );
            *last_attempted = Some((signature.clone(), action.kind));

            let resume = match resume_after {
                Some((kind, strategy)) if kind == action.kind => Some(strategy),
                _ => None,
            };
            let known = self.memory.known_selectors_for(signature).to_vec();
            let executor = ActionExecutor::new(&self.browser, &self.profile);
            let report = match executor.execute(&action, pre, &known, resume) {
                Ok(report) => report,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(step, attempt, error = %err, "execution hard-failed");
                    self.observe_and_record(signature, &action, false, Some(err.to_string()), None);
                    last_error = Some(err.to_string());
                    resume_after = None;
                    continue;
                }
            };

            // a human gets the full wait; normal actions get the settle delay
            let settle = if action.kind == ActionKind::AwaitManual {
                self.cfg.wait_timeout
            } else {
                self.cfg.settle_delay
            };
            tokio::time::sleep(settle).await;

            let post = self.browser.snapshot()?;
            let (verdict, reason) = judge::verdict(pre, &post, self.cfg.text_change_ratio);
            info!(
                step,
                attempt,
                verdict = ?verdict,
                reason = %reason,
                strategy = report.strategy,
                fields = report.fields_written,
                "step validated"
            );

            let success = verdict.counts_as_success();
            let error = (!success).then(|| reason.clone());
            self.observe_and_record(signature, &action, success, error, report.selector.as_deref());

            if success {
                if self.is_confirmation(&post) {
                    return Ok(StepEnd::Confirmed);
                }
                return Ok(StepEnd::Continue);
            }

            resume_after = Some((action.kind, report.strategy));
            if verdict == Verdict::NoChange {
                last_error = Some(AgentError::NoObservableEffect(reason).to_string());
            } else {
                last_error = Some(reason);
            }
        }

        warn!(step, "retry budget spent without effect, moving on");
        Ok(StepEnd::Continue)
    }

    /// Memory writes for one attempt: stuck counter, ledger entry, flush.
    fn observe_and_record(
        &mut self,
        signature: &PageSignature,
        action: &crate::types::Action,
        success: bool,
        error: Option<String>,
        selector: Option<&str>,
    ) {
        self.memory.stuck_mut().observe(
            signature,
            action.kind,
            self.cfg.stuck_threshold,
            self.cfg.stuck_window,
        );
        self.memory
            .record_action(signature, action, success, error, selector);
        if let Err(err) = self.memory.save() {
            warn!(error = %err, "memory flush failed");
        }
    }

    fn is_confirmation(&self, snapshot: &PageSnapshot) -> bool {
        let url = snapshot.url.to_ascii_lowercase();
        let title = snapshot.title.to_ascii_lowercase();
        self.cfg
            .confirmation_url_markers
            .iter()
            .any(|m| url.contains(m.as_str()))
            || self
                .cfg
                .confirmation_title_markers
                .iter()
                .any(|m| title.contains(m.as_str()))
    }

    fn finish(&mut self, status: FinalStatus) -> FinalStatus {
        if let Err(err) = self.memory.save() {
            warn!(error = %err, "final memory flush failed");
        }
        match &status {
            FinalStatus::Success => info!("flow completed"),
            FinalStatus::Aborted(reason) => warn!(reason = %reason, "flow aborted"),
            FinalStatus::BudgetExhausted => warn!("step budget exhausted"),
        }
        status
    }
}

enum StepEnd {
    Continue,
    Confirmed,
}
