//! `StateException`: the request-facing error taxonomy (§7). Every failure
//! a request can surface to a client carries one of these fixed codes;
//! anything else (a storage integrity failure, an unrecoverable I/O error)
//! is not wrapped here because it is fatal to the process rather than to
//! the request.

use thiserror::Error;

/// A request-scoped failure with a stable numeric code a client can branch
/// on, mirroring the original `state_exception` hierarchy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateException {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl StateException {
    /// The numeric error code surfaced to clients, per the fixed table in
    /// §7: 400/404/409/500/501/503/504.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            StateException::BadRequest(_) => 400,
            StateException::NotFound(_) => 404,
            StateException::Conflict(_) => 409,
            StateException::Internal(_) => 500,
            StateException::NotImplemented(_) => 501,
            StateException::Unavailable(_) => 503,
            StateException::Timeout(_) => 504,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub type StateResult<T> = Result<T, StateException>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_fixed_table() {
        assert_eq!(StateException::BadRequest("x".into()).code(), 400);
        assert_eq!(StateException::NotFound("x".into()).code(), 404);
        assert_eq!(StateException::Conflict("x".into()).code(), 409);
        assert_eq!(StateException::Internal("x".into()).code(), 500);
        assert_eq!(StateException::NotImplemented("x".into()).code(), 501);
        assert_eq!(StateException::Unavailable("x".into()).code(), 503);
        assert_eq!(StateException::Timeout("x".into()).code(), 504);
    }
}
