//! Adaptive browser agent for unknown multi-step web flows.
//!
//! The agent has no prior map of the flow it drives. Each step it reads
//! the live page into a comparable snapshot, fingerprints it, asks a
//! priority-ordered policy for one action (escalating when the stuck
//! detector says the same move keeps repeating, replaying what worked on
//! this page before), attempts the action through ordered fallback
//! strategies, and judges ground truth by diffing the page before and
//! after: an action that raised no error but changed nothing counts as
//! a failure. Outcomes land in a persistent, bounded memory keyed by
//! page fingerprint so later runs start smarter.

pub mod agent;
pub mod brain;
pub mod browser;
pub mod config;
pub mod dom;
pub mod errors;
pub mod hands;
pub mod judge;
pub mod memory;
pub mod profile;
pub mod session;
pub mod stuck;
pub mod types;

pub use agent::{Agent, FinalStatus};
pub use brain::{ActionGenerator, DecisionEngine, GeneratedAction, GenerationContext, LlmGenerator};
pub use browser::{BrowserControl, Handle, Interaction};
pub use config::Config;
pub use errors::AgentError;
pub use hands::{ActionExecutor, ExecutionReport};
pub use memory::MemoryStore;
pub use profile::Profile;
pub use session::ChromeSession;
pub use stuck::StuckDetector;
pub use types::{
    Action, ActionKind, ActionRecord, ButtonInfo, Confidence, FieldInfo, PageSignature,
    PageSnapshot, Verdict,
};
