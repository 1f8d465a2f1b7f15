use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use autoapply::{
    Agent, ChromeSession, Config, DecisionEngine, FinalStatus, LlmGenerator, MemoryStore, Profile,
};

#[derive(Parser, Debug)]
#[command(name = "autoapply", about = "Drive a job-application web flow to completion")]
struct Args {
    /// URL of the posting to apply to.
    url: String,

    /// Applicant profile JSON used to answer form fields.
    #[arg(long, default_value = "profile.json")]
    profile: String,

    /// Persistent memory file (created on first run).
    #[arg(long, default_value = "agent_memory.json")]
    memory: String,

    /// Run Chrome without a visible window.
    #[arg(long)]
    headless: bool,

    /// Override the step budget.
    #[arg(long)]
    max_steps: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::from_env();
    if let Some(max_steps) = args.max_steps {
        cfg.max_steps = max_steps;
    }

    let profile = Profile::load(&args.profile)?.with_env_credentials();
    let memory = MemoryStore::load(&args.memory, cfg.record_cap, cfg.selector_cap);

    let generator = LlmGenerator::from_env(cfg.generation_timeout);
    if generator.is_none() {
        warn!("no OPENAI_API_KEY set, generation fallback disabled");
    }
    let engine = DecisionEngine::new(
        generator.map(|g| Box::new(g) as Box<dyn autoapply::ActionGenerator>),
    );

    let session = ChromeSession::launch(args.headless)?;
    session
        .navigate(&args.url)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            ctrl_c_cancel.cancel();
        }
    });

    let mut agent = Agent::new(session, profile, engine, memory, cfg, cancel);
    let status = agent.run().await;

    match status {
        FinalStatus::Success => {
            info!("application flow reached a confirmation page");
            Ok(())
        }
        FinalStatus::BudgetExhausted => {
            anyhow::bail!("step budget exhausted before reaching confirmation")
        }
        FinalStatus::Aborted(reason) => anyhow::bail!("aborted: {reason}"),
    }
}
