use std::fmt;

/// These are the mutating commands that get recorded in the write-ahead log.
///
/// The on-disk form is one ASCII line per command, whitespace separated:
/// `set <key> <value>` or `del <key>`. Keys and values are therefore
/// restricted to non-whitespace text; the connection-level parser upstream
/// enforces this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// insert or update a key
    Set {
        /// the key being written
        key: String,
        /// the value to store under `key`
        value: String,
    },
    /// remove a key
    Del {
        /// the key being removed
        key: String,
    },
}

impl Command {
    /// parses one log line into a [`Command`].
    ///
    /// returns `None` for blank lines, unknown verbs, or the wrong number of
    /// tokens; the replay treats those as malformed records to be skipped
    pub(crate) fn parse(line: &str) -> Option<Command> {
        let mut tokens = line.split_whitespace();
        match (tokens.next()?, tokens.next(), tokens.next(), tokens.next()) {
            ("set", Some(key), Some(value), None) => Some(Command::Set {
                key: key.to_string(),
                value: value.to_string(),
            }),
            ("del", Some(key), None, None) => Some(Command::Del {
                key: key.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Set { key, value } => write!(f, "set {} {}", key, value),
            Command::Del { key } => write!(f, "del {}", key),
        }
    }
}
