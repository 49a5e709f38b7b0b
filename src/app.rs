use crate::api::ApiClient;
use crate::commands::{self, CommandAction};
use crate::config::Config;
use crate::error::ApiError;
use crate::prompt::load_system_prompt;
use crate::session;
use crate::state::{ConversationLoop, ConversationState, TurnOutcome};
use crate::terminal::CancelWatcher;
use crate::tokens;
use crate::tools::ToolDispatcher;
use crate::ui::render;
use anyhow::{Context, Result};
use std::io::{self, Write};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EXIT_WORD: &str = "exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front end: reads input, dispatches slash commands, and
/// runs conversation turns against the configured server.
pub struct App {
    config: Config,
    conversation: ConversationLoop<ApiClient>,
    state: ConversationState,
    conversation_id: String,
    header: String,
}

impl App {
    pub fn new(config: Config) -> Self {
        let client = ApiClient::new(&config);
        let dispatcher =
            ToolDispatcher::new(config.working_dir.clone(), config.backup_dir.clone());
        let conversation = ConversationLoop::new(client, dispatcher, config.max_tool_rounds);
        let state =
            ConversationState::new(load_system_prompt(&config.working_dir, &config.api_base_url));
        let header = render::header_line(&config.api_base_url, config.context_limit);

        Self {
            config,
            conversation,
            state,
            conversation_id: session::new_conversation_id(),
            header,
        }
    }

    /// Checks that the chat server answers before the first prompt.
    pub async fn connect(&self) -> Result<(), ApiError> {
        self.conversation.backend().probe().await
    }

    pub async fn run(&mut self) -> Result<()> {
        self.redraw()?;
        println!("Connected! Start chatting below. Type \"exit\" to quit or \"/help\" for commands.\n");

        loop {
            let warning = tokens::pressure_warning(tokens::context_pressure(
                tokens::estimate_total_tokens(self.state.display()),
                self.config.context_limit,
            ));
            render::write_prompt(&mut io::stdout(), warning.as_deref())?;

            let Some(line) = read_line().await? else {
                debug!("stdin closed");
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input == EXIT_WORD {
                break;
            }

            if commands::is_command(input) {
                if self.apply_command(input).await? == Flow::Quit {
                    break;
                }
            } else {
                self.send(input).await;
            }
            self.redraw()?;
        }

        info!(conversation = %self.conversation_id, "session ended");
        Ok(())
    }

    async fn apply_command(&mut self, input: &str) -> Result<Flow> {
        let outcome = commands::execute(input);
        match outcome.action {
            CommandAction::Quit => {
                if let Some(message) = outcome.message {
                    println!("{message}");
                }
                return Ok(Flow::Quit);
            }
            CommandAction::Reset => {
                self.state.reset();
                if let Some(message) = outcome.message {
                    self.state.push_notice(message);
                }
            }
            CommandAction::Summarize => {
                if let Some(message) = outcome.message {
                    println!("{message}");
                }
                self.summarize().await;
            }
            CommandAction::Save => self.save(),
            CommandAction::None => {
                if let Some(message) = outcome.message {
                    self.state.push_notice(message);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn send(&mut self, input: &str) {
        let cancel = CancellationToken::new();
        let watcher = CancelWatcher::start(cancel.clone());
        let newline = watcher.newline();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conversation = &self.conversation;
        let state = &mut self.state;
        let cancel_ref = &cancel;
        let turn = async move {
            let outcome = conversation
                .run_turn(state, input, cancel_ref, Some(&tx))
                .await;
            drop(tx);
            outcome
        };
        let printer = async move {
            let mut stdout = io::stdout();
            while let Some(update) = rx.recv().await {
                if let Some(entry) = render::progress_entry(&update) {
                    let _ = render::write_entry(&mut stdout, &entry, newline);
                    let _ = stdout.flush();
                }
            }
        };

        let (outcome, ()) = tokio::join!(turn, printer);
        watcher.stop().await;

        match outcome {
            TurnOutcome::Reply(text) => debug!(chars = text.len(), "turn answered"),
            TurnOutcome::Cancelled => info!("turn cancelled"),
            TurnOutcome::Failed(reason) => warn!(%reason, "turn failed"),
        }
    }

    async fn summarize(&mut self) {
        let cancel = CancellationToken::new();
        let watcher = CancelWatcher::start(cancel.clone());
        let result = self.conversation.summarize(&mut self.state, &cancel).await;
        watcher.stop().await;

        // The failure notice is already in the display.
        if let Err(error) = result {
            debug!(%error, "summary not applied");
        }
    }

    fn save(&mut self) {
        match session::save_transcript(
            self.state.display(),
            &self.config.session_dir,
            Some(&self.conversation_id),
        ) {
            Ok(path) => self
                .state
                .push_notice(format!("Chat history saved to {}", path.display())),
            Err(error) => {
                warn!(%error, "failed to save transcript");
                self.state
                    .push_notice(format!("Failed to save chat history: {error}"));
            }
        }
    }

    fn redraw(&self) -> io::Result<()> {
        render::redraw(
            &mut io::stdout(),
            &self.header,
            self.state.display(),
            !self.config.debug,
        )
    }
}

async fn read_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let read = io::stdin().read_line(&mut line)?;
        Ok::<_, io::Error>((read > 0).then_some(line))
    })
    .await
    .context("stdin reader task failed")?
    .context("Failed to read input")
}
