//! Authorization gate: principal ids checked against the allow-list loaded at startup.

use std::collections::HashSet;
use std::fmt;

use crate::error::RelayError;

/// Telegram user id of whoever sent the request.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Principal(pub i64);

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable set of principals allowed to run commands. Built once, shared by `Arc`.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: HashSet<i64>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Membership test. A denial is logged with the principal id only.
    pub fn authorize(&self, principal: Principal) -> Result<(), RelayError> {
        if self.ids.contains(&principal.0) {
            Ok(())
        } else {
            log::warn!("unauthorized access attempt: {}", principal);
            Err(RelayError::Unauthorized(principal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_principal_passes() {
        let list = AllowList::new([1, 2, 3]);
        assert!(list.authorize(Principal(2)).is_ok());
    }

    #[test]
    fn unlisted_principal_is_rejected() {
        let list = AllowList::new([1]);
        match list.authorize(Principal(99)) {
            Err(RelayError::Unauthorized(p)) => assert_eq!(p, Principal(99)),
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn empty_list_rejects_everyone() {
        let list = AllowList::default();
        assert!(list.authorize(Principal(0)).is_err());
    }
}
