use std::fmt;

use crate::error::Result;

/// A message exchanged between peers by a reactor
///
/// `Display` gives the short form used in logs.
pub trait MsgInfo: fmt::Display + Send + Sync {
    /// Check the message is well formed before it is acted on or persisted
    fn validate(&self) -> Result<()>;
}
