//! Errors a single command can fail with.
//!
//! None of these end the connection: `From<CommandError> for Reply` turns
//! every case into an error reply and the client may carry on.

use crate::server::settings::SettingError;
use segid_resp_core::Reply;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("not enough arguments for '{command}'")]
    NotEnoughArgs { command: String },

    #[error("key is empty")]
    EmptyKey,

    #[error("argument is not valid UTF-8")]
    InvalidUtf8,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("method not supported")]
    NotSupported,

    #[error(transparent)]
    Setting(#[from] SettingError),

    #[error(transparent)]
    Store(#[from] segid::Error),
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err.to_string())
    }
}
