use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use glance_core::{update, AppState, DragPayload, Msg, PreviewStage, PreviewViewModel};
use glance_engine::{
    select_fetcher, spawn_worker, BypassRules, ChatClient, ExtractionPipeline, ExtractionSettings,
    FetchSettings, HeaderRuleManager, ModelEndpoint, ProxySettings, SessionRuleTable,
    StreamSettings, SummaryTransport, WorkerHandle, WorkerSettings,
};
use glance_logging::{glance_info, glance_warn};
use log::LevelFilter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::effects::{EffectRunner, Services};
use super::logging::{self, LogDestination};
use super::settings::{current_settings, Settings};
use super::surface::{PreviewSurface, TerminalSurface};

const ONCE_TIMEOUT: Duration = Duration::from_secs(90);

/// Owns the state and applies messages in arrival order: update, render, run effects.
pub struct Coordinator {
    state: AppState,
    runner: EffectRunner,
    surface: Arc<dyn PreviewSurface>,
    msg_tx: UnboundedSender<Msg>,
    msg_rx: UnboundedReceiver<Msg>,
}

impl Coordinator {
    pub fn new(state: AppState, services: Services, surface: Arc<dyn PreviewSurface>) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let runner = EffectRunner::new(services, state.identity(), surface.clone(), msg_tx.clone());
        Self {
            state,
            runner,
            surface,
            msg_tx,
            msg_rx,
        }
    }

    /// Inbox for results produced outside the loop.
    pub fn sender(&self) -> UnboundedSender<Msg> {
        self.msg_tx.clone()
    }

    pub fn view(&self) -> PreviewViewModel {
        self.state.view()
    }

    pub async fn dispatch(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (mut state, effects) = update(state, msg);
        if state.consume_dirty() {
            self.surface.render(&state.view());
        }
        self.state = state;
        self.runner.run(effects).await;
    }

    pub async fn next_msg(&mut self) -> Option<Msg> {
        self.msg_rx.recv().await
    }

    /// Processes queued messages until `done` holds for the view or `timeout` passes.
    pub async fn run_until<F>(&mut self, timeout: Duration, done: F) -> Option<PreviewViewModel>
    where
        F: Fn(&PreviewViewModel) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let view = self.view();
            if done(&view) {
                return Some(view);
            }
            match tokio::time::timeout_at(deadline, self.msg_rx.recv()).await {
                Ok(Some(msg)) => self.dispatch(msg).await,
                _ => return None,
            }
        }
    }
}

/// A line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Trigger(DragPayload),
    Close,
    Reload,
    Quit,
    Nothing,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" => Command::Nothing,
        "close" | "esc" => Command::Close,
        "reload" => Command::Reload,
        "quit" | "exit" => Command::Quit,
        _ => match line.strip_prefix("text:") {
            Some(snippet) => Command::Trigger(DragPayload::Text(snippet.trim().to_string())),
            None => match line.strip_prefix("image:") {
                Some(src) => Command::Trigger(DragPayload::Image(src.trim().to_string())),
                None => Command::Trigger(DragPayload::Link(line.to_string())),
            },
        },
    }
}

/// Builds the engine capabilities: through the worker when it runs, in-process otherwise.
pub fn build_services(worker: Option<WorkerHandle>) -> anyhow::Result<Services> {
    let fetcher = select_fetcher(worker.clone(), FetchSettings::default(), ProxySettings::default())
        .context("building the document fetcher")?;
    let (rules, summaries): (Arc<dyn BypassRules>, Arc<dyn SummaryTransport>) = match worker {
        Some(worker) => (Arc::new(worker.clone()), Arc::new(worker)),
        None => (
            Arc::new(HeaderRuleManager::new(Arc::new(SessionRuleTable::new()))),
            Arc::new(ChatClient::new(StreamSettings::default()).context("building the model client")?),
        ),
    };
    Ok(Services {
        fetcher,
        rules,
        pipeline: ExtractionPipeline::new(ExtractionSettings::default()),
        summaries,
    })
}

pub async fn run_app(args: &[String]) -> anyhow::Result<()> {
    let destination = LogDestination::from_env_value(std::env::var("GLANCE_LOG").ok().as_deref());
    logging::initialize(destination, LevelFilter::Info);

    let settings = current_settings();
    let worker = match spawn_worker(WorkerSettings::default(), Arc::new(SessionRuleTable::new())) {
        Ok(worker) => Some(worker),
        Err(err) => {
            glance_warn!("privileged worker unavailable, running in-process: {err}");
            None
        }
    };

    let outcome = match args.first().map(String::as_str) {
        Some("--test-connection") => test_connection(worker.as_ref(), &settings).await,
        Some("--once") => match args.get(1) {
            Some(url) => run_once(worker.clone(), &settings, url).await,
            None => Err(anyhow::anyhow!("--once needs a url")),
        },
        Some(other) => Err(anyhow::anyhow!(
            "unknown argument {other:?}; expected --test-connection or --once <url>"
        )),
        None => run_interactive(worker.clone(), &settings).await,
    };

    if let Some(worker) = worker {
        worker.shutdown();
    }
    outcome
}

fn initial_state(settings: &Settings) -> AppState {
    AppState::new()
        .with_model(settings.model_config())
        .with_search_template(settings.search_template.clone())
}

fn coordinator(worker: Option<WorkerHandle>, settings: &Settings) -> anyhow::Result<Coordinator> {
    let surface: Arc<dyn PreviewSurface> = Arc::new(TerminalSurface::new(std::io::stdout()));
    Ok(Coordinator::new(initial_state(settings), build_services(worker)?, surface))
}

async fn test_connection(worker: Option<&WorkerHandle>, settings: &Settings) -> anyhow::Result<()> {
    let model = settings.model_config();
    let endpoint = ModelEndpoint {
        provider: model.provider,
        base_url: model.base_url,
        model: model.model,
    };
    let credential = model.credential.unwrap_or_default();
    let result = match worker {
        Some(worker) => worker.test_connection(endpoint.clone(), credential).await,
        None => {
            ChatClient::new(StreamSettings::default())?
                .test_connection(&endpoint, &credential)
                .await
        }
    };
    result.with_context(|| format!("connecting to {}", endpoint.base_url))?;
    println!("connection to {} ok", endpoint.base_url);
    Ok(())
}

async fn run_once(worker: Option<WorkerHandle>, settings: &Settings, url: &str) -> anyhow::Result<()> {
    let mut coordinator = coordinator(worker, settings)?;
    coordinator
        .dispatch(Msg::Triggered(DragPayload::Link(url.to_string())))
        .await;
    let finished = coordinator
        .run_until(ONCE_TIMEOUT, |view| {
            view.stage.is_terminal() || view.stage == PreviewStage::Blocked
        })
        .await;
    coordinator.dispatch(Msg::CloseRequested).await;
    match finished {
        Some(view) if view.stage == PreviewStage::Error => {
            let message = view.error.map(|error| error.message).unwrap_or_default();
            Err(anyhow::anyhow!("preview failed: {message}"))
        }
        Some(_) => Ok(()),
        None => Err(anyhow::anyhow!("preview did not finish within {ONCE_TIMEOUT:?}")),
    }
}

async fn run_interactive(worker: Option<WorkerHandle>, settings: &Settings) -> anyhow::Result<()> {
    let mut coordinator = coordinator(worker, settings)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    glance_info!("reading triggers from stdin");
    println!("glance: paste a link (or text:<words>), `close` to dismiss, `quit` to exit");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Command::Trigger(payload) => coordinator.dispatch(Msg::Triggered(payload)).await,
                    Command::Close => coordinator.dispatch(Msg::CloseRequested).await,
                    Command::Reload => {
                        let model = current_settings().model_config();
                        coordinator.dispatch(Msg::ModelConfigRefreshed(model)).await;
                    }
                    Command::Quit => break,
                    Command::Nothing => {}
                }
            }
            Some(msg) = coordinator.next_msg() => coordinator.dispatch(msg).await,
        }
    }

    coordinator.dispatch(Msg::CloseRequested).await;
    Ok(())
}
