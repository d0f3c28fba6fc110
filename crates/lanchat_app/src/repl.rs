//! The interactive command loop.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lanchat_network::{ChatState, MessageSender, NetworkError};
use tokio::io::{AsyncBufRead, Lines};
use tracing::warn;

use crate::commands::Command;
use crate::output;

pub struct Repl<W> {
    state: Arc<ChatState>,
    sender: MessageSender,
    stale_threshold: Duration,
    out: W,
}

impl<W: Write> Repl<W> {
    pub fn new(
        state: Arc<ChatState>,
        sender: MessageSender,
        stale_threshold: Duration,
        out: W,
    ) -> Self {
        Self {
            state,
            sender,
            stale_threshold,
            out,
        }
    }

    /// Read commands until `exit` or end of input.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: &mut Lines<R>) -> Result<()> {
        loop {
            self.prompt("> ")?;
            let Some(line) = input.next_line().await? else {
                return Ok(());
            };

            match Command::parse(&line) {
                Command::Empty => {}
                Command::Peers => write!(self.out, "{}", output::peers(&self.state.snapshot()))?,
                Command::Inbox => write!(self.out, "{}", output::inbox(&self.state.inbox()))?,
                Command::Send(nickname) => self.send(&nickname, input).await?,
                Command::Exit => {
                    writeln!(self.out, "Exiting...")?;
                    return Ok(());
                }
                Command::Invalid(_) => writeln!(self.out, "Invalid command.")?,
            }
        }
    }

    async fn send<R: AsyncBufRead + Unpin>(
        &mut self,
        nickname: &str,
        input: &mut Lines<R>,
    ) -> Result<()> {
        let recipient = match self.sender.resolve(nickname) {
            Ok(r) => r,
            Err(NetworkError::PeerNotFound(_)) => {
                writeln!(self.out, "Peer not found.")?;
                return Ok(());
            }
            Err(e) => {
                writeln!(self.out, "{e}")?;
                return Ok(());
            }
        };

        if recipient.stale {
            writeln!(
                self.out,
                "Warning: The peer has not been active for more than {}s.",
                self.stale_threshold.as_secs()
            )?;
        }

        self.prompt("Enter message: ")?;
        let Some(text) = input.next_line().await? else {
            return Ok(());
        };

        let text = text.trim();
        if text.is_empty() {
            writeln!(self.out, "Empty message, nothing sent.")?;
            return Ok(());
        }

        if let Err(e) = self.sender.deliver(&recipient, text).await {
            warn!("Send to {} at {} failed: {e}", recipient.nickname, recipient.ip);
            writeln!(self.out, "Failed to send message: {e}")?;
        }
        Ok(())
    }

    fn prompt(&mut self, text: &str) -> Result<()> {
        write!(self.out, "{text}")?;
        self.out.flush()?;
        Ok(())
    }
}
