//! Slash commands. Parsing and description only; the front end applies the
//! returned action to the conversation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    None,
    Reset,
    Summarize,
    Save,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub handled: bool,
    pub action: CommandAction,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

struct CommandSpec {
    name: &'static str,
    usage: &'static str,
    description: &'static str,
    action: CommandAction,
    message: Option<&'static str>,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        usage: "/help",
        description: "Show available commands",
        action: CommandAction::None,
        message: None,
    },
    CommandSpec {
        name: "clear",
        usage: "/clear",
        description: "Clear chat history and screen",
        action: CommandAction::Reset,
        message: Some("Chat history cleared"),
    },
    CommandSpec {
        name: "summarize",
        usage: "/summarize",
        description: "Summarize the conversation and replace history with the summary",
        action: CommandAction::Summarize,
        message: Some("Summarizing conversation..."),
    },
    CommandSpec {
        name: "quit",
        usage: "/quit",
        description: "Exit the application",
        action: CommandAction::Quit,
        message: Some("Goodbye!"),
    },
    CommandSpec {
        name: "save",
        usage: "/save",
        description: "Save current chat history to the session directory",
        action: CommandAction::Save,
        message: None,
    },
];

pub fn is_command(input: &str) -> bool {
    input.trim().starts_with('/')
}

pub fn parse(input: &str) -> Option<ParsedCommand> {
    let body = input.trim().strip_prefix('/')?;
    let mut parts = body.split_whitespace();
    let name = parts.next().unwrap_or_default().to_string();
    Some(ParsedCommand {
        name,
        args: parts.map(str::to_string).collect(),
    })
}

pub fn execute(input: &str) -> CommandOutcome {
    let Some(parsed) = parse(input) else {
        return CommandOutcome {
            handled: false,
            action: CommandAction::None,
            message: None,
        };
    };

    let Some(command) = COMMANDS.iter().find(|command| command.name == parsed.name) else {
        return CommandOutcome {
            handled: true,
            action: CommandAction::None,
            message: Some(format!(
                "Unknown command: /{}. Type /help for available commands.",
                parsed.name
            )),
        };
    };

    let message = match command.name {
        "help" => Some(help_text()),
        _ => command.message.map(str::to_string),
    };
    CommandOutcome {
        handled: true,
        action: command.action,
        message,
    }
}

pub fn help_text() -> String {
    let mut lines = vec!["Available Commands:".to_string(), String::new()];
    lines.extend(
        COMMANDS
            .iter()
            .map(|command| format!("  {} - {}", command.usage, command.description)),
    );
    lines.push(String::new());
    lines.push("Type \"exit\" to quit the application.".to_string());
    lines.join("\n")
}
