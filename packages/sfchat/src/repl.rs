//! Line commands for the interactive client.

/// One line of user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/connect [host[:port]]`. No address means the saved one.
    Connect(Option<String>),
    Disconnect,
    /// Cycle to the next chat mode.
    Mode,
    /// Queue a media reference for the next message.
    Attach(String),
    /// Drop queued attachments.
    Detach,
    /// Clear the visible transcript. The server keeps its history.
    Clear,
    History,
    Status,
    Help,
    Quit,
    Chat(String),
    Unknown(String),
    Empty,
}

pub const HELP: &str = "\
commands:
  /connect [host[:port]]  connect (uses the saved server when omitted)
  /disconnect             close the connection
  /mode                   switch to the next chat mode
  /attach <ref>           attach an image reference to the next message
  /detach                 drop pending attachments
  /clear                  clear the screen transcript (server history is kept)
  /history                reprint the transcript
  /status                 show connection status
  /help                   show this help
  /quit                   exit
anything else is sent as a chat message; start a line with // to send a leading slash";

pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Command::Empty;
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Command::Chat(format!("/{escaped}"));
    }
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Command::Chat(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "connect" | "c" => Command::Connect((!arg.is_empty()).then(|| arg.to_string())),
        "disconnect" | "dc" => Command::Disconnect,
        "mode" | "m" => Command::Mode,
        "attach" | "a" if !arg.is_empty() => Command::Attach(arg.to_string()),
        "detach" => Command::Detach,
        "clear" | "cls" => Command::Clear,
        "history" => Command::History,
        "status" | "s" => Command::Status,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => Command::Unknown(line.trim().to_string()),
    }
}
