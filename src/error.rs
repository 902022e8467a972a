//! Status codes and the error-latching type carried on every connection.

use std::fmt;

use thiserror::Error;

/// Numeric outcome of a framework operation. Mirrors the status-code taxonomy
/// of a SASL implementation: zero and positive values drive the state
/// machine, negative values are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum Status {
    #[error("operation completed successfully")]
    Ok = 0,
    #[error("more data is needed from the peer")]
    Continue = 1,
    #[error("interactive input is needed from the application")]
    Interact = 2,

    #[error("generic failure")]
    Fail = -1,
    #[error("out of memory")]
    NoMem = -2,
    #[error("overflowed allotted buffer")]
    BufOver = -3,
    #[error("no mechanism found matching the requested features")]
    NoMech = -4,
    #[error("bad protocol or cancellation from the peer")]
    BadProt = -5,
    #[error("authentication exchange is not yet complete")]
    NotDone = -6,
    #[error("invalid parameter supplied")]
    BadParam = -7,
    #[error("transient failure, try again later")]
    TryAgain = -8,
    #[error("integrity check failed")]
    BadMac = -9,
    #[error("library not initialized")]
    NotInit = -10,
    #[error("mechanism does not support this operation")]
    WrongMech = -11,
    #[error("authentication failed")]
    BadAuth = -12,
    #[error("authorization failed")]
    NoAuthz = -13,
    #[error("mechanism too weak for the requested security properties")]
    TooWeak = -14,
    #[error("encryption needed to use this mechanism")]
    Encrypt = -15,
    #[error("one-time transition needed")]
    Trans = -16,
    #[error("credentials have expired")]
    Expired = -17,
    #[error("account disabled")]
    Disabled = -18,
    #[error("user not found")]
    NoUser = -19,
    #[error("plugin version mismatch")]
    BadVers = -20,
    #[error("remote service unavailable")]
    Unavail = -21,
    #[error("unable to verify a mechanism's security properties")]
    NoVerify = -22,
    #[error("password locked")]
    PwLock = -23,
    #[error("requested change was a no-op")]
    NoChange = -24,
    #[error("password too weak for this mechanism's policy")]
    WeakPass = -25,
    #[error("user has no password set")]
    NoUserPass = -26,
}

impl Status {
    /// Codes below `Ok` are errors; `Ok`, `Continue`, and `Interact` are not.
    pub fn is_error(self) -> bool {
        (self as i32) < 0
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Maps a raw status code crossing the plugin ABI boundary (§6 "Plugin
    /// ABI version") back to a `Status`. Unrecognized codes collapse to
    /// `Fail` rather than panicking, since a misbehaving plugin is a
    /// protocol error, not a framework bug.
    pub fn from_raw(code: i32) -> Status {
        match code {
            0 => Status::Ok,
            1 => Status::Continue,
            2 => Status::Interact,
            -1 => Status::Fail,
            -2 => Status::NoMem,
            -3 => Status::BufOver,
            -4 => Status::NoMech,
            -5 => Status::BadProt,
            -6 => Status::NotDone,
            -7 => Status::BadParam,
            -8 => Status::TryAgain,
            -9 => Status::BadMac,
            -10 => Status::NotInit,
            -11 => Status::WrongMech,
            -12 => Status::BadAuth,
            -13 => Status::NoAuthz,
            -14 => Status::TooWeak,
            -15 => Status::Encrypt,
            -16 => Status::Trans,
            -17 => Status::Expired,
            -18 => Status::Disabled,
            -19 => Status::NoUser,
            -20 => Status::BadVers,
            -21 => Status::Unavail,
            -22 => Status::NoVerify,
            -23 => Status::PwLock,
            -24 => Status::NoChange,
            -25 => Status::WeakPass,
            -26 => Status::NoUserPass,
            _ => Status::Fail,
        }
    }
}

/// A `Status` paired with an optional human-readable detail, the pair
/// latched onto a connection's `error_code`/`error_detail` (see the data
/// model's error-latching invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslError {
    pub status: Status,
    pub detail: Option<String>,
}

impl SaslError {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub fn with_detail(status: Status, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for SaslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(d) => write!(f, "{}: {}", self.status, d),
            None => write!(f, "{}", self.status),
        }
    }
}

impl std::error::Error for SaslError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.status)
    }
}

impl From<Status> for SaslError {
    fn from(status: Status) -> Self {
        SaslError::new(status)
    }
}

pub type Result<T> = std::result::Result<T, SaslError>;

/// Error-latching store for a connection: the first error overwrites the
/// default `Ok`, a later error overwrites an earlier one, and a success
/// never clears a latched error.
#[derive(Debug, Clone, Default)]
pub struct ErrorChannel {
    status: Option<Status>,
    detail: Option<String>,
}

impl ErrorChannel {
    pub fn latch(&mut self, err: &SaslError) {
        if err.status.is_error() {
            self.status = Some(err.status);
            self.detail = err.detail.clone();
        }
    }

    pub fn status(&self) -> Status {
        self.status.unwrap_or(Status::Ok)
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_latched(&self) -> bool {
        self.status.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_is_negative() {
        assert!(Status::Fail.is_error());
        assert!(Status::BadAuth.is_error());
        assert!(!Status::Ok.is_error());
        assert!(!Status::Continue.is_error());
        assert!(!Status::Interact.is_error());
    }

    #[test]
    fn latch_holds_first_error_across_success() {
        let mut chan = ErrorChannel::default();
        chan.latch(&SaslError::new(Status::BadAuth));
        assert_eq!(chan.status(), Status::BadAuth);
        // a "success" is simply never latched, because latch() only stores errors
        assert_eq!(chan.status(), Status::BadAuth);
    }

    #[test]
    fn latch_is_overwritten_by_a_later_error() {
        let mut chan = ErrorChannel::default();
        chan.latch(&SaslError::new(Status::BadAuth));
        chan.latch(&SaslError::with_detail(Status::NoMech, "no PLAIN registered"));
        assert_eq!(chan.status(), Status::NoMech);
        assert_eq!(chan.detail(), Some("no PLAIN registered"));
    }

    #[test]
    fn from_raw_round_trips_known_codes() {
        assert_eq!(Status::from_raw(0), Status::Ok);
        assert_eq!(Status::from_raw(-12), Status::BadAuth);
        assert_eq!(Status::from_raw(-999), Status::Fail);
    }

    #[test]
    fn unlatched_channel_reports_ok() {
        let chan = ErrorChannel::default();
        assert_eq!(chan.status(), Status::Ok);
        assert!(!chan.is_latched());
    }
}
