// Per-family command tables
//
// Every device family declares its commands as an enum implementing
// `CommandSet`; the dispatcher resolves free-form command strings against the
// table built from that enum.

use super::error::{InstrumentError, Result};

/// How the device answers a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Nothing comes back
    Silent,
    /// Exactly this many terminator-delimited lines
    Lines(usize),
    /// Variable-length block, drained after a settle delay
    UntilIdle,
    /// Lines until one starts with an end token, plus one trailing line
    UntilToken(&'static [&'static str]),
}

/// Metadata for one dispatchable command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub expects_argument: bool,
    pub response: ResponseMode,
}

impl CommandSpec {
    pub const fn new(name: &'static str, expects_argument: bool, response: ResponseMode) -> Self {
        Self {
            name,
            expects_argument,
            response,
        }
    }
}

/// Separator between a command and its argument on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentStyle {
    /// `COMMAND=ARGUMENT`
    Equals,
    /// `COMMAND ARGUMENT`
    Space,
    /// `COMMANDARGUMENT`, the command being the leading letters
    Inline,
}

impl ArgumentStyle {
    pub fn separator(self) -> &'static str {
        match self {
            ArgumentStyle::Equals => "=",
            ArgumentStyle::Space => " ",
            ArgumentStyle::Inline => "",
        }
    }
}

/// Closed set of commands understood by one device family
pub trait CommandSet: Copy + Sized + 'static {
    const ALL: &'static [Self];

    fn spec(self) -> CommandSpec;

    fn name(self) -> &'static str {
        self.spec().name
    }
}

/// Immutable lookup table from command name to `CommandSpec`
#[derive(Debug, Clone)]
pub struct CommandTable {
    specs: Vec<CommandSpec>,
    style: ArgumentStyle,
}

impl CommandTable {
    pub fn from_set<C: CommandSet>(style: ArgumentStyle) -> Self {
        Self {
            specs: C::ALL.iter().map(|&command| command.spec()).collect(),
            style,
        }
    }

    pub fn style(&self) -> ArgumentStyle {
        self.style
    }

    /// Lookup key of a raw command string: argument stripped, upper-cased
    pub fn key(&self, command: &str) -> String {
        let head = match self.style {
            ArgumentStyle::Equals => command.split('=').next().unwrap_or_default(),
            ArgumentStyle::Space => command.trim().split(' ').next().unwrap_or_default(),
            ArgumentStyle::Inline => {
                let command = command.trim();
                let end = command
                    .find(|c: char| !c.is_ascii_alphabetic())
                    .unwrap_or(command.len());
                &command[..end]
            }
        };
        head.trim().to_uppercase()
    }

    /// Resolve a command string, which may carry an inline argument
    pub fn lookup(&self, command: &str) -> Result<&CommandSpec> {
        let key = self.key(command);
        self.specs
            .iter()
            .find(|spec| spec.name == key)
            .ok_or(InstrumentError::UnknownCommand(key))
    }

    pub fn specs(&self) -> &[CommandSpec] {
        &self.specs
    }
}
