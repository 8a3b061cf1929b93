use bytes::Bytes;

/// A reply written back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>\r\n`
    Status(String),
    /// `-<text>\r\n`
    Error(String),
    /// `:<n>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`, or `$-1\r\n` for nil.
    Bulk(Option<Bytes>),
}

impl Reply {
    pub fn ok() -> Self {
        Self::Status("OK".to_string())
    }

    pub fn nil() -> Self {
        Self::Bulk(None)
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(text.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(Some(data.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}
