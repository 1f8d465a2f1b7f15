use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::browser::{BrowserControl, Handle, Interaction};
use crate::dom::{parse_snapshot, SNAPSHOT_JS};
use crate::errors::{AgentError, Result};
use crate::types::PageSnapshot;

/// Live Chrome session. Attaches to an already-running instance on the
/// devtools port when one is available (so an operator can pre-authorize
/// logins), otherwise launches its own.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    pub fn launch(headless: bool) -> anyhow::Result<Self> {
        if let Ok(browser) = Browser::connect("http://127.0.0.1:9222".to_string()) {
            info!("attached to existing Chrome on port 9222");
            let tab = {
                let tabs = browser.get_tabs().lock().unwrap().clone();
                match tabs.into_iter().next() {
                    Some(tab) => tab,
                    None => browser.new_tab()?,
                }
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        info!(headless, "launching Chrome");
        let options = LaunchOptions {
            headless,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let browser = Browser::new(options)?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| AgentError::DriverFatal(format!("navigation failed: {e}")))?;
        let _ = self.tab.wait_for_element("body");
        Ok(())
    }

    fn eval_string(&self, js: &str) -> Result<Option<String>> {
        let result = self
            .tab
            .evaluate(js, false)
            .map_err(|e| AgentError::DriverFatal(format!("evaluate failed: {e}")))?;
        Ok(result.value.and_then(|v| v.as_str().map(String::from)))
    }

    fn eval_quiet(&self, js: &str) {
        if let Err(err) = self.tab.evaluate(js, false) {
            debug!(error = %err, "script evaluation failed");
        }
    }
}

/// Selector embedded into injected scripts; single quotes and backslashes
/// must not break out of the string literal.
fn js_escape(selector: &str) -> String {
    selector.replace('\\', "\\\\").replace('\'', "\\'")
}

impl BrowserControl for ChromeSession {
    fn snapshot(&self) -> Result<PageSnapshot> {
        // dynamic content settles before we read
        std::thread::sleep(Duration::from_millis(500));
        let url = self.current_url()?;
        let title = self.current_title().unwrap_or_default();
        match self.eval_string(SNAPSHOT_JS) {
            Ok(Some(raw)) => Ok(parse_snapshot(&raw, &url, &title)),
            Ok(None) => {
                warn!("snapshot script returned nothing, degrading to bare snapshot");
                Ok(PageSnapshot {
                    url,
                    title,
                    ..Default::default()
                })
            }
            Err(err) => Err(err),
        }
    }

    fn locate(&self, selector: &str) -> Result<Option<Handle>> {
        match self.tab.find_element(selector) {
            Ok(_) => Ok(Some(Handle::new(selector))),
            Err(_) => Ok(None),
        }
    }

    fn interact(&self, handle: &Handle, interaction: &Interaction) -> Result<()> {
        let selector = handle.selector.as_str();
        let escaped = js_escape(selector);
        match interaction {
            Interaction::Click => {
                let el = self.tab.find_element(selector).map_err(|e| {
                    AgentError::ElementUnavailable(format!("{selector}: {e}"))
                })?;
                el.click()
                    .map_err(|e| AgentError::ElementUnavailable(format!("click failed: {e}")))?;
            }
            Interaction::ForcedClick => {
                // strip the attributes hostile flows use to hide the real
                // control, then click from script to bypass overlays
                self.eval_quiet(&format!(
                    "(() => {{ const el = document.querySelector('{escaped}'); if (!el) throw 'gone'; \
                     el.removeAttribute('tabindex'); el.removeAttribute('aria-hidden'); \
                     el.removeAttribute('disabled'); el.scrollIntoView({{block:'center'}}); }})()"
                ));
                let clicked = self.eval_string(&format!(
                    "(() => {{ const el = document.querySelector('{escaped}'); \
                     if (!el) return 'missing'; el.click(); return 'ok'; }})()"
                ))?;
                if clicked.as_deref() != Some("ok") {
                    return Err(AgentError::ElementUnavailable(format!(
                        "forced click found no element for {selector}"
                    )));
                }
            }
            Interaction::Type(value) => {
                let el = self.tab.find_element(selector).map_err(|e| {
                    AgentError::ElementUnavailable(format!("{selector}: {e}"))
                })?;
                el.click()
                    .map_err(|e| AgentError::ElementUnavailable(format!("focus failed: {e}")))?;
                self.eval_quiet(&format!(
                    "document.querySelector('{escaped}').value = ''"
                ));
                self.tab
                    .type_str(value)
                    .map_err(|e| AgentError::ElementUnavailable(format!("typing failed: {e}")))?;
            }
            Interaction::SetValue(value) => {
                let escaped_value = js_escape(value);
                let set = self.eval_string(&format!(
                    "(() => {{ const el = document.querySelector('{escaped}'); \
                     if (!el) return 'missing'; el.value = '{escaped_value}'; \
                     el.dispatchEvent(new Event('input', {{bubbles: true}})); \
                     el.dispatchEvent(new Event('change', {{bubbles: true}})); return 'ok'; }})()"
                ))?;
                if set.as_deref() != Some("ok") {
                    return Err(AgentError::ElementUnavailable(format!(
                        "scripted set found no element for {selector}"
                    )));
                }
            }
            Interaction::SubmitForm => {
                let submitted = self.eval_string(&format!(
                    "(() => {{ const el = document.querySelector('{escaped}'); \
                     const form = el ? el.closest('form') : document.querySelector('form'); \
                     if (!form) return 'missing'; form.submit(); return 'ok'; }})()"
                ))?;
                if submitted.as_deref() != Some("ok") {
                    return Err(AgentError::ElementUnavailable(
                        "no owning form to submit".into(),
                    ));
                }
            }
            Interaction::PressEnter => {
                let el = self.tab.find_element(selector).map_err(|e| {
                    AgentError::ElementUnavailable(format!("{selector}: {e}"))
                })?;
                el.click()
                    .map_err(|e| AgentError::ElementUnavailable(format!("focus failed: {e}")))?;
                self.tab
                    .press_key("Enter")
                    .map_err(|e| AgentError::ElementUnavailable(format!("enter failed: {e}")))?;
            }
            Interaction::Upload(path) => {
                let el = self.tab.find_element(selector).map_err(|e| {
                    AgentError::ElementUnavailable(format!("{selector}: {e}"))
                })?;
                el.set_input_files(&[path.as_str()]).map_err(|e| {
                    AgentError::ElementUnavailable(format!("file attach failed: {e}"))
                })?;
            }
        }
        Ok(())
    }

    fn current_url(&self) -> Result<String> {
        self.eval_string("window.location.href")
            .map(|v| v.unwrap_or_else(|| "unknown".into()))
    }

    fn current_title(&self) -> Result<String> {
        self.eval_string("document.title")
            .map(|v| v.unwrap_or_default())
    }

    fn wait_for(&self, selector: &str, timeout: Duration) -> bool {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .is_ok()
    }
}
