use std::time::Duration;

use crate::errors::Result;
use crate::types::PageSnapshot;

/// Resolved reference to an element on the live page. Only valid until the
/// next navigation; strategies re-locate rather than hold handles.
#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    pub selector: String,
}

impl Handle {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

/// The operations a single executor strategy may ask of the page.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    /// Plain click on the located element.
    Click,
    /// Scripted click that strips hiding attributes and bypasses
    /// intercepting overlays.
    ForcedClick,
    /// Focus the element and type the value.
    Type(String),
    /// Scripted value assignment, for fields that reject typed input.
    SetValue(String),
    /// Programmatically submit the form owning the element.
    SubmitForm,
    /// Confirm key inside the element.
    PressEnter,
    /// Attach a local file to a file input.
    Upload(String),
}

/// Narrow capability set the core drives the browser through. The core
/// never assumes a specific engine; `ChromeSession` is one implementation,
/// tests use a scripted fake.
pub trait BrowserControl {
    /// Read the live page into a normalized snapshot. Partial extraction
    /// failures degrade to empty collections, they never abort the
    /// snapshot; only a dead session is an error.
    fn snapshot(&self) -> Result<PageSnapshot>;

    /// Resolve a selector to an element, `None` when absent.
    fn locate(&self, selector: &str) -> Result<Option<Handle>>;

    fn interact(&self, handle: &Handle, interaction: &Interaction) -> Result<()>;

    fn current_url(&self) -> Result<String>;

    fn current_title(&self) -> Result<String>;

    /// Wait until the selector resolves, bounded by `timeout`. A lapsed
    /// wait is a failed strategy, not a crash.
    fn wait_for(&self, selector: &str, timeout: Duration) -> bool;
}
