//! Interactive command parsing.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the peer directory.
    Peers,
    /// List received messages.
    Inbox,
    /// Message the peer with this nickname.
    Send(String),
    /// Leave the program.
    Exit,
    /// Blank line.
    Empty,
    /// Anything else.
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let input = line.trim();
        match input {
            "" => Self::Empty,
            "peers" => Self::Peers,
            "inbox" => Self::Inbox,
            "exit" => Self::Exit,
            _ => match input.strip_prefix("send ") {
                Some(nickname) => Self::Send(nickname.trim().to_string()),
                None => Self::Invalid(input.to_string()),
            },
        }
    }
}
