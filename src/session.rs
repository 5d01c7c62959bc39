use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::{debug, warn};

/// A filer as seen by the portal at the moment it was listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub name: String,
    pub tenant: String,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub name: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not reach portal at {url}: {message}")]
    Connect { url: String, message: String },
    #[error("login as `{username}` rejected by {url} (HTTP {status})")]
    Login {
        url: String,
        username: String,
        status: u16,
    },
}

/// Everything the reporting code needs from an authenticated portal session.
///
/// The session has a mutable "current tenant"; tenant-scoped listings follow
/// whatever `browse` last selected. Remote device calls carry their tenant in
/// the `DeviceRef` and do not depend on it.
pub trait PortalSession {
    fn logout(&mut self) -> Result<()>;

    fn browse(&mut self, tenant: &str) -> Result<()>;

    /// Leave any tenant and act as the global administrator.
    fn browse_global_admin(&mut self) -> Result<()>;

    fn tenants(&mut self) -> Result<Vec<Tenant>>;

    /// All devices of the current tenant, connected or not.
    fn devices(&mut self) -> Result<Vec<DeviceRef>>;

    /// Looks a device up by name in the current tenant.
    fn device(&mut self, name: &str) -> Result<Option<DeviceRef>>;

    /// Fetches several remote subtrees in one round trip, grafted into a
    /// single tree keyed by path segments (`/config/time` lands at
    /// `tree["config"]["time"]`).
    fn get_multi(&mut self, device: &DeviceRef, paths: &[&str]) -> Result<Value>;

    fn remote_get(&mut self, device: &DeviceRef, path: &str) -> Result<Value>;

    fn execute(
        &mut self,
        device: &DeviceRef,
        path: &str,
        action: &str,
        param: Value,
    ) -> Result<Value>;
}

/// Owns a session and logs it out when dropped, whichever way the run ends.
pub struct SessionGuard<S: PortalSession> {
    inner: S,
}

impl<S: PortalSession> SessionGuard<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: PortalSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S: PortalSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: PortalSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        match self.inner.logout() {
            Ok(()) => debug!("portal session closed"),
            Err(err) => warn!(error = %format!("{err:#}"), "logout failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePortal;

    #[test]
    fn guard_logs_out_on_drop() {
        let portal = FakePortal::new().tenant("t1");
        let calls = portal.calls();
        {
            let mut guard = SessionGuard::new(portal);
            guard.browse("t1").unwrap();
        }
        assert_eq!(*calls.borrow(), vec!["browse:t1", "logout"]);
    }

    #[test]
    fn guard_logs_out_when_unwinding_early() {
        fn run(portal: FakePortal) -> Result<()> {
            let mut guard = SessionGuard::new(portal);
            guard.browse("missing")?;
            Ok(())
        }

        let portal = FakePortal::new().fail_browse("missing");
        let calls = portal.calls();
        assert!(run(portal).is_err());
        assert!(calls.borrow().iter().any(|c| c == "logout"));
    }
}
