//! `delve research`: Run a research request, with interactive clarification.

use std::io::Write;
use std::sync::Arc;

use clap::Args;
use delve_config::AppConfig;
use delve_core::{EventBus, ResearchEvent, ResearchRequest};
use delve_engine::{DeepResearcher, RunOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

/// Answer used when the user skips a clarifying question.
const DEFAULT_ANSWER: &str = "Please proceed with comprehensive research on all aspects.";

#[derive(Args, Debug)]
pub struct ResearchArgs {
    /// The research question (prompted for when omitted)
    pub question: Vec<String>,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip the clarification step
    #[arg(long)]
    pub no_clarify: bool,

    /// Never read from stdin; print a clarifying question and exit
    #[arg(long)]
    pub no_input: bool,

    /// Maximum concurrent research units per round
    #[arg(long)]
    pub max_units: Option<usize>,

    /// Maximum supervisor rounds
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Maximum searches per research unit
    #[arg(long)]
    pub max_tool_calls: Option<usize>,

    /// Search backend: tavily, native or none
    #[arg(long)]
    pub search: Option<String>,
}

impl ResearchArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(n) = self.max_units {
            config.research.max_concurrent_research_units = n;
        }
        if let Some(n) = self.max_rounds {
            config.research.max_researcher_iterations = n;
        }
        if let Some(n) = self.max_tool_calls {
            config.research.max_react_tool_calls = n;
        }
        if let Some(search) = &self.search {
            config.research.search_api = search.clone();
        }
        if self.no_clarify {
            config.research.allow_clarification = false;
        }
    }
}

pub async fn run(args: ResearchArgs, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    args.apply(&mut config);
    config.validate()?;

    let researcher = DeepResearcher::from_config(&config)?;

    let question = if args.question.is_empty() {
        if args.no_input {
            return Err("No question given and --no-input is set".into());
        }
        prompt("  Research question > ").await?
    } else {
        args.question.join(" ")
    };
    if question.trim().is_empty() {
        return Err("The research question is empty".into());
    }

    let progress = (!args.json).then(|| Progress::spawn(researcher.events(), verbose));
    let interactive = !args.no_input && !args.json;
    let mut request = ResearchRequest::new(question.trim(), config.research.clone());

    let outcome = loop {
        match researcher.run(request.clone()).await? {
            RunOutcome::Clarification { question } if interactive => {
                eprintln!();
                println!("\n  Clarification needed:\n  {question}\n");
                let answer = prompt("  Your answer (Enter to skip) > ").await?;
                let answer = if answer.trim().is_empty() {
                    DEFAULT_ANSWER.to_string()
                } else {
                    answer
                };
                request = ResearchRequest::resume_after_clarification(&request, question, answer);
            }
            outcome => break outcome,
        }
    };

    if let Some(progress) = progress {
        progress.finish().await;
        eprintln!();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        RunOutcome::Report(report) => {
            println!("{}", report.markdown);
            if !report.stripped_citations.is_empty() {
                eprintln!(
                    "  ⚠️  Removed {} unsupported citation(s) from the report",
                    report.stripped_citations.len()
                );
            }
        }
        RunOutcome::Degraded { fallback, reason } => {
            eprintln!("  ⚠️  Could not write the final report: {reason}");
            eprintln!("  Showing the collected findings instead.\n");
            println!("{fallback}");
        }
        RunOutcome::Clarification { question } => {
            println!("Clarification needed: {question}");
        }
    }

    Ok(())
}

/// Progress rendering on stderr: one line per event when verbose, else a dot.
struct Progress {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Progress {
    fn spawn(events: Arc<EventBus>, verbose: bool) -> Self {
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(follow(events.subscribe(), stopped, move |event| {
            if verbose {
                eprintln!("  {}", describe(event));
            } else {
                eprint!(".");
                let _ = std::io::stderr().flush();
            }
        }));
        Self { stop, handle }
    }

    /// Render whatever is still buffered, then stop.
    async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

/// Feed events to `emit` until told to stop, then drain the buffer.
async fn follow(
    mut rx: broadcast::Receiver<Arc<ResearchEvent>>,
    mut stopped: oneshot::Receiver<()>,
    mut emit: impl FnMut(&ResearchEvent) + Send + 'static,
) {
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(event) => emit(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            },
            _ = &mut stopped => break,
        }
    }
    loop {
        match rx.try_recv() {
            Ok(event) => emit(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

/// One-line description of a progress event.
pub fn describe(event: &ResearchEvent) -> String {
    match event {
        ResearchEvent::RunStarted { question, .. } => format!("▶ Researching: {question}"),
        ResearchEvent::ClarificationRequested { .. } => "? Clarification requested".into(),
        ResearchEvent::PlanCreated { round, sub_topics, .. } => {
            format!("📋 Round {round} plan: {}", sub_topics.join(" | "))
        }
        ResearchEvent::UnitStarted { topic_id, topic, .. } => format!("🔎 {topic_id} started: {topic}"),
        ResearchEvent::SearchExecuted {
            topic_id,
            query,
            hits,
            success,
            ..
        } => {
            if *success {
                format!("   {topic_id} searched \"{query}\" ({hits} hits)")
            } else {
                format!("   {topic_id} search failed: \"{query}\"")
            }
        }
        ResearchEvent::UnitFinished {
            topic_id,
            status,
            search_calls,
            duration_ms,
            ..
        } => format!("✅ {topic_id} {status:?} after {search_calls} searches ({duration_ms} ms)"),
        ResearchEvent::RoundCompleted {
            round,
            completed,
            failed,
            ..
        } => format!("🔁 Round {round} done: {completed} completed, {failed} failed"),
        ResearchEvent::ReflectionDecided {
            continue_research,
            reason,
            ..
        } => {
            if *continue_research {
                format!("🧭 Continuing: {reason}")
            } else {
                format!("🧭 Stopping: {reason}")
            }
        }
        ResearchEvent::ReportSynthesized {
            citations,
            stripped_citations,
            ..
        } => format!("📝 Report written ({citations} sources, {stripped_citations} removed)"),
        ResearchEvent::RunFinished { rounds, degraded, .. } => {
            if *degraded {
                format!("⚠️  Finished after {rounds} round(s) without a report")
            } else {
                format!("🎉 Finished after {rounds} round(s)")
            }
        }
    }
}

async fn prompt(label: &str) -> Result<String, Box<dyn std::error::Error>> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}
