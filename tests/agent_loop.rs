//! End-to-end loop tests over a scripted browser: a sign-in flow that
//! reaches confirmation, an inert page that burns the step budget, and
//! cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use autoapply::browser::{BrowserControl, Handle, Interaction};
use autoapply::errors::AgentError;
use autoapply::types::{ActionKind, ButtonInfo, FieldInfo, PageSnapshot};
use autoapply::{Agent, Config, DecisionEngine, FinalStatus, MemoryStore, Profile};

fn fast_config() -> Config {
    Config {
        settle_delay: Duration::ZERO,
        wait_timeout: Duration::ZERO,
        ..Config::default()
    }
}

fn profile() -> Profile {
    Profile::from_value(json!({
        "email": "dana@example.com",
        "password": "hunter2"
    }))
}

fn field(selector: &str, label: &str, filled: bool) -> FieldInfo {
    FieldInfo {
        selector: selector.into(),
        label: Some(label.into()),
        filled,
        ..Default::default()
    }
}

fn login_page(filled: bool) -> PageSnapshot {
    PageSnapshot {
        url: "https://jobs.example.com/login".into(),
        title: "Sign In".into(),
        text_inputs: vec![field("#email", "Email address", filled)],
        password_inputs: vec![field("#pw", "Password", filled)],
        buttons: vec![ButtonInfo {
            selector: "#signin".into(),
            label: "Sign In".into(),
            automation_id: Some("signInSubmitButton".into()),
        }],
        ..Default::default()
    }
}

fn confirmation_page() -> PageSnapshot {
    PageSnapshot {
        url: "https://jobs.example.com/application/success".into(),
        title: "Thank you".into(),
        ..Default::default()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    Login,
    LoginFilled,
    Done,
}

/// Sign-in flow: typing the password fills the form, clicking the sign-in
/// button on a filled form navigates to confirmation. Clicks on anything
/// other than the button are rejected, like real inputs would.
struct SignInBrowser {
    phase: Mutex<Phase>,
}

impl SignInBrowser {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Login),
        }
    }
}

impl BrowserControl for SignInBrowser {
    fn snapshot(&self) -> autoapply::errors::Result<PageSnapshot> {
        Ok(match *self.phase.lock().unwrap() {
            Phase::Login => login_page(false),
            Phase::LoginFilled => login_page(true),
            Phase::Done => confirmation_page(),
        })
    }

    fn locate(&self, selector: &str) -> autoapply::errors::Result<Option<Handle>> {
        let present = match *self.phase.lock().unwrap() {
            Phase::Done => false,
            _ => matches!(selector, "#email" | "#pw" | "#signin"),
        };
        Ok(present.then(|| Handle::new(selector)))
    }

    fn interact(
        &self,
        handle: &Handle,
        interaction: &Interaction,
    ) -> autoapply::errors::Result<()> {
        let mut phase = self.phase.lock().unwrap();
        match interaction {
            Interaction::Type(_) | Interaction::SetValue(_) => {
                if handle.selector == "#pw" {
                    *phase = Phase::LoginFilled;
                }
                Ok(())
            }
            Interaction::Click | Interaction::ForcedClick => {
                if handle.selector != "#signin" {
                    return Err(AgentError::ElementUnavailable(
                        "not a clickable control".into(),
                    ));
                }
                if *phase == Phase::LoginFilled {
                    *phase = Phase::Done;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn current_url(&self) -> autoapply::errors::Result<String> {
        self.snapshot().map(|s| s.url)
    }

    fn current_title(&self) -> autoapply::errors::Result<String> {
        self.snapshot().map(|s| s.title)
    }

    fn wait_for(&self, _selector: &str, _timeout: Duration) -> bool {
        true
    }
}

/// A page that accepts every click and never changes.
struct InertBrowser {
    page: PageSnapshot,
    waits: Arc<Mutex<usize>>,
}

impl InertBrowser {
    fn new() -> Self {
        Self {
            waits: Arc::new(Mutex::new(0)),
            page: PageSnapshot {
                url: "https://jobs.example.com/apply/questions".into(),
                title: "Additional questions".into(),
                buttons: vec![ButtonInfo {
                    selector: "#next".into(),
                    label: "Next".into(),
                    automation_id: None,
                }],
                text_sample: "a page that refuses to move".into(),
                ..Default::default()
            },
        }
    }
}

impl BrowserControl for InertBrowser {
    fn snapshot(&self) -> autoapply::errors::Result<PageSnapshot> {
        Ok(self.page.clone())
    }

    fn locate(&self, selector: &str) -> autoapply::errors::Result<Option<Handle>> {
        Ok((selector == "#next").then(|| Handle::new(selector)))
    }

    fn interact(
        &self,
        _handle: &Handle,
        _interaction: &Interaction,
    ) -> autoapply::errors::Result<()> {
        Ok(())
    }

    fn current_url(&self) -> autoapply::errors::Result<String> {
        Ok(self.page.url.clone())
    }

    fn current_title(&self) -> autoapply::errors::Result<String> {
        Ok(self.page.title.clone())
    }

    fn wait_for(&self, _selector: &str, _timeout: Duration) -> bool {
        *self.waits.lock().unwrap() += 1;
        false
    }
}

/// An overlay swallows plain clicks on the progress control: the click
/// raises no error and does nothing. Only the scripted click gets
/// through, after which the flow lands on confirmation.
struct OverlayBrowser {
    done: Mutex<bool>,
}

impl OverlayBrowser {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
        }
    }

    fn review_page() -> PageSnapshot {
        PageSnapshot {
            url: "https://jobs.example.com/apply/review".into(),
            title: "Review your application".into(),
            buttons: vec![ButtonInfo {
                selector: "#next".into(),
                label: "Submit application".into(),
                automation_id: None,
            }],
            text_sample: "review your answers before submitting".into(),
            ..Default::default()
        }
    }
}

impl BrowserControl for OverlayBrowser {
    fn snapshot(&self) -> autoapply::errors::Result<PageSnapshot> {
        Ok(if *self.done.lock().unwrap() {
            confirmation_page()
        } else {
            Self::review_page()
        })
    }

    fn locate(&self, selector: &str) -> autoapply::errors::Result<Option<Handle>> {
        let present = !*self.done.lock().unwrap() && selector == "#next";
        Ok(present.then(|| Handle::new(selector)))
    }

    fn interact(
        &self,
        handle: &Handle,
        interaction: &Interaction,
    ) -> autoapply::errors::Result<()> {
        if handle.selector == "#next" && matches!(interaction, Interaction::ForcedClick) {
            *self.done.lock().unwrap() = true;
        }
        Ok(())
    }

    fn current_url(&self) -> autoapply::errors::Result<String> {
        self.snapshot().map(|s| s.url)
    }

    fn current_title(&self) -> autoapply::errors::Result<String> {
        self.snapshot().map(|s| s.title)
    }

    fn wait_for(&self, _selector: &str, _timeout: Duration) -> bool {
        true
    }
}

#[tokio::test]
async fn sign_in_flow_runs_to_confirmation() {
    let browser = SignInBrowser::new();
    let mut agent = Agent::new(
        browser,
        profile(),
        DecisionEngine::new(None),
        MemoryStore::ephemeral(200, 5),
        fast_config(),
        CancellationToken::new(),
    );

    let status = agent.run().await;
    assert_eq!(status, FinalStatus::Success);

    // filled both fields, wasted one replay, then submitted
    let sig = login_page(false).signature();
    assert_eq!(agent.memory().record_count(), 3);
    let last = agent.memory().last_success_for(&sig).expect("a success");
    assert_eq!(last.action.kind, ActionKind::SubmitCredentials);
    // the selector that finally worked is remembered first
    assert_eq!(agent.memory().known_selectors_for(&sig)[0], "#signin");
}

#[tokio::test]
async fn inert_page_exhausts_the_budget_and_escalates() {
    let browser = InertBrowser::new();
    let cfg = Config {
        max_steps: 3,
        max_retries: 2,
        ..fast_config()
    };
    let sig = browser.snapshot().unwrap().signature();
    let waits = browser.waits.clone();
    let mut agent = Agent::new(
        browser,
        profile(),
        DecisionEngine::new(None),
        MemoryStore::ephemeral(200, 5),
        cfg,
        CancellationToken::new(),
    );

    let status = agent.run().await;
    assert_eq!(status, FinalStatus::BudgetExhausted);

    // every attempt was recorded and none of them succeeded
    assert_eq!(agent.memory().record_count(), 6);
    assert!(agent.memory().last_success_for(&sig).is_none());
    // the repeated click crossed the stuck threshold
    assert!(agent.memory().stuck().is_stuck(&sig, ActionKind::ClickProgress, 3));
    // failed clicks teach no selectors
    assert!(agent.memory().known_selectors_for(&sig).is_empty());
    // readiness was awaited once per step, and a lapsed wait never aborts
    assert_eq!(*waits.lock().unwrap(), 3);
}

#[tokio::test]
async fn swallowed_click_is_retried_with_the_forced_strategy() {
    let browser = OverlayBrowser::new();
    let mut agent = Agent::new(
        browser,
        profile(),
        DecisionEngine::new(None),
        MemoryStore::ephemeral(200, 5),
        fast_config(),
        CancellationToken::new(),
    );

    let status = agent.run().await;
    assert_eq!(status, FinalStatus::Success);

    // one ineffective direct click, then the forced click advanced
    let sig = OverlayBrowser::review_page().signature();
    assert_eq!(agent.memory().record_count(), 2);
    let last = agent.memory().last_success_for(&sig).expect("a success");
    assert_eq!(last.action.kind, ActionKind::ClickProgress);
    assert_eq!(agent.memory().known_selectors_for(&sig), ["#next".to_string()]);
}

#[tokio::test]
async fn cancellation_aborts_before_the_next_step() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut agent = Agent::new(
        SignInBrowser::new(),
        profile(),
        DecisionEngine::new(None),
        MemoryStore::ephemeral(200, 5),
        fast_config(),
        cancel,
    );

    let status = agent.run().await;
    assert_eq!(status, FinalStatus::Aborted("cancelled".into()));
    assert_eq!(agent.memory().record_count(), 0);
}
