use bytes::Bytes;

/// A decoded client command.
///
/// The command name and arguments are kept as the raw bytes the client sent.
/// Arguments are slices of the read buffer, so decoding never copies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: Bytes,
    args: Vec<Bytes>,
}

impl Request {
    pub fn new(command: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Builds a request from string parts, first part being the command.
    ///
    /// Returns `None` when `parts` is empty.
    pub fn from_parts<I, T>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let mut parts = parts.into_iter().map(Into::into);
        let command = parts.next()?;
        Some(Self {
            command,
            args: parts.collect(),
        })
    }

    pub fn command(&self) -> &Bytes {
        &self.command
    }

    /// Case-insensitive comparison of the command name.
    pub fn is_command(&self, name: &str) -> bool {
        self.command.eq_ignore_ascii_case(name.as_bytes())
    }

    /// The command name upper-cased for display and metrics. Names that are
    /// not valid UTF-8 are rendered lossily.
    pub fn command_name(&self) -> String {
        String::from_utf8_lossy(&self.command).to_ascii_uppercase()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    pub fn len(&self) -> usize {
        self.args.len() + 1
    }

    /// Always `false`: a request carries at least its command name.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn into_parts(self) -> (Bytes, Vec<Bytes>) {
        (self.command, self.args)
    }
}
