use std::io::Write;
use std::sync::{Arc, Mutex};

use sfchat_session::{Origin, PresentCommand, Presenter, Transcript};

/// Where a rendered line goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

/// Prints session output to the terminal and keeps the visible transcript.
#[derive(Clone)]
pub struct TerminalPresenter {
    transcript: Arc<Mutex<Transcript>>,
}

impl TerminalPresenter {
    pub fn new() -> Self {
        Self {
            transcript: Arc::new(Mutex::new(Transcript::new())),
        }
    }

    pub fn transcript(&self) -> Arc<Mutex<Transcript>> {
        self.transcript.clone()
    }

    /// Wipe the local transcript. Returns how many turns were dropped.
    pub fn clear_page(&self) -> usize {
        match self.transcript.lock() {
            Ok(mut transcript) => {
                let dropped = transcript.len();
                transcript.clear();
                dropped
            }
            Err(_) => 0,
        }
    }
}

impl Default for TerminalPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for TerminalPresenter {
    fn present(&mut self, command: PresentCommand) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.apply(&command);
        }
        let Some((stream, line)) = render(&command) else {
            return;
        };
        let _ = match stream {
            Stream::Out => writeln!(std::io::stdout().lock(), "{line}"),
            Stream::Err => writeln!(std::io::stderr().lock(), "{line}"),
        };
    }
}

pub fn turn_line(origin: Origin, body: &str) -> String {
    let prefix = match origin {
        Origin::LocalUser => "you> ",
        Origin::RemotePeer => "bot> ",
    };
    let indent = " ".repeat(prefix.len());
    let mut line = String::new();
    for (i, part) in body.lines().enumerate() {
        if i > 0 {
            line.push('\n');
        }
        line.push_str(if i == 0 { prefix } else { &indent });
        line.push_str(part);
    }
    if line.is_empty() {
        line.push_str(prefix.trim_end());
    }
    line
}

fn render(command: &PresentCommand) -> Option<(Stream, String)> {
    match command {
        PresentCommand::AppendTurn { turn, .. } => {
            Some((Stream::Out, turn_line(turn.origin, &turn.body)))
        }
        PresentCommand::ClearTranscript => {
            Some((Stream::Err, "[sfchat: transcript reloaded]".to_string()))
        }
        PresentCommand::Pending(true) => {
            Some((Stream::Err, "[sfchat: waiting for reply...]".to_string()))
        }
        PresentCommand::Pending(false) => None,
        PresentCommand::Notice(notice) => Some((Stream::Err, format!("[sfchat: {notice}]"))),
        PresentCommand::Status(state) => Some((Stream::Err, format!("[sfchat: status {state}]"))),
        PresentCommand::ModeChanged(mode) => Some((
            Stream::Err,
            format!("[sfchat: mode {}]", mode.as_str().to_uppercase()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sfchat_session::{ChatTurn, ConnectionState, Mode, Notice, TurnId};

    fn append(origin: Origin, body: &str) -> PresentCommand {
        PresentCommand::AppendTurn {
            turn: ChatTurn {
                id: TurnId(1),
                origin,
                body: body.to_string(),
                timestamp: Utc::now(),
            },
            scroll_anchor: None,
        }
    }

    #[test]
    fn test_turn_lines() {
        assert_eq!(turn_line(Origin::LocalUser, "hi"), "you> hi");
        assert_eq!(
            turn_line(Origin::RemotePeer, "one\ntwo"),
            "bot> one\n     two"
        );
        assert_eq!(turn_line(Origin::LocalUser, ""), "you>");
    }

    #[test]
    fn test_render_streams() {
        assert_eq!(
            render(&append(Origin::RemotePeer, "hello")),
            Some((Stream::Out, "bot> hello".to_string()))
        );
        assert_eq!(
            render(&PresentCommand::Notice(Notice::CredentialRejected)),
            Some((Stream::Err, "[sfchat: password rejected]".to_string()))
        );
        assert_eq!(
            render(&PresentCommand::Status(ConnectionState::Ready)),
            Some((Stream::Err, "[sfchat: status ready]".to_string()))
        );
        assert_eq!(
            render(&PresentCommand::ModeChanged(Mode::Gg)),
            Some((Stream::Err, "[sfchat: mode GG]".to_string()))
        );
        assert_eq!(render(&PresentCommand::Pending(false)), None);
    }

    #[test]
    fn test_presenter_tracks_transcript() {
        let mut presenter = TerminalPresenter::new();
        presenter.present(append(Origin::LocalUser, "q"));
        presenter.present(PresentCommand::ClearTranscript);
        presenter.present(append(Origin::RemotePeer, "a"));
        let transcript = presenter.transcript();
        let transcript = transcript.lock().unwrap();
        assert_eq!(transcript.entries(), vec![(Origin::RemotePeer, "a")]);
    }

    #[test]
    fn test_clear_page_empties_shared_transcript() {
        let mut presenter = TerminalPresenter::new();
        let view = presenter.clone();
        presenter.present(append(Origin::LocalUser, "q"));
        presenter.present(append(Origin::RemotePeer, "a"));

        assert_eq!(view.clear_page(), 2);
        assert!(presenter.transcript().lock().unwrap().is_empty());
        assert_eq!(view.clear_page(), 0);
    }
}
