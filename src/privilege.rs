//! Scoped privilege handling
//!
//! The planner runs as root under `sudo`, but files meant for the invoking
//! user (the metalink document, saved profiles) must not end up owned by
//! root. [`PrivilegeScope`] tracks how many nested sections currently run
//! with dropped privileges:
//!
//! - [`PrivilegeScope::drop_privileges`] switches the effective ids to
//!   `SUDO_UID`/`SUDO_GID` on the outermost call and returns a guard that
//!   switches back to root when the outermost guard goes away.
//! - [`PrivilegeScope::elevate`] does the reverse inside a dropped section.
//!
//! Both guards restore the previous state on every exit path, including `?`
//! and panics. The depth counter lives in the scope, not in a global.

use std::cell::Cell;

use crate::error::{PlannerError, Result};

/// Primitive identity operations. [`PrivilegeScope`] decides their order.
pub trait IdentitySwitch {
    /// Replace the supplementary groups with those of `uid` (`initgroups`).
    fn load_groups(&self, uid: u32, gid: Option<u32>) -> Result<()>;
    /// Drop every supplementary group (`setgroups([])`).
    fn clear_groups(&self) -> Result<()>;
    fn set_effective_gid(&self, gid: u32) -> Result<()>;
    fn set_effective_uid(&self, uid: u32) -> Result<()>;
    /// Real, effective and saved ids all become the user.
    fn set_all_ids(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
}

/// Identity switching through `initgroups`/`setegid`/`seteuid`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NixIdentity;

impl IdentitySwitch for NixIdentity {
    fn load_groups(&self, uid: u32, gid: Option<u32>) -> Result<()> {
        use nix::unistd::{Gid, Uid, User, initgroups};
        use std::ffi::CString;

        let user = User::from_uid(Uid::from_raw(uid))
            .map_err(|e| PlannerError::privilege(format!("getpwuid({}): {}", uid, e)))?
            .ok_or_else(|| PlannerError::privilege(format!("no passwd entry for uid {}", uid)))?;
        let name = CString::new(user.name.as_str())
            .map_err(|_| PlannerError::privilege(format!("invalid user name {:?}", user.name)))?;
        let gid = gid.map(Gid::from_raw).unwrap_or(user.gid);
        initgroups(&name, gid).map_err(|e| PlannerError::privilege(format!("initgroups({}): {}", user.name, e)))
    }

    fn clear_groups(&self) -> Result<()> {
        nix::unistd::setgroups(&[]).map_err(|e| PlannerError::privilege(format!("setgroups([]): {}", e)))
    }

    fn set_effective_gid(&self, gid: u32) -> Result<()> {
        nix::unistd::setegid(nix::unistd::Gid::from_raw(gid))
            .map_err(|e| PlannerError::privilege(format!("setegid({}): {}", gid, e)))
    }

    fn set_effective_uid(&self, uid: u32) -> Result<()> {
        nix::unistd::seteuid(nix::unistd::Uid::from_raw(uid))
            .map_err(|e| PlannerError::privilege(format!("seteuid({}): {}", uid, e)))
    }

    fn set_all_ids(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        use nix::unistd::{Gid, Uid, setresgid, setresuid};

        if let Some(gid) = gid {
            let gid = Gid::from_raw(gid);
            setresgid(gid, gid, gid).map_err(|e| PlannerError::privilege(format!("setresgid: {}", e)))?;
        }
        if let Some(uid) = uid {
            let uid = Uid::from_raw(uid);
            setresuid(uid, uid, uid).map_err(|e| PlannerError::privilege(format!("setresuid: {}", e)))?;
        }
        Ok(())
    }
}

fn env_id(var: &str) -> Result<Option<u32>> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PlannerError::privilege(format!("{} is not a numeric id: {:?}", var, value))),
        Err(_) => Ok(None),
    }
}

/// Nesting-aware privilege drop/elevation for one process.
///
/// Not `Sync`: the effective ids are per-process state and the guards must
/// be released in the order they were taken.
#[derive(Debug)]
pub struct PrivilegeScope<I: IdentitySwitch = NixIdentity> {
    identity: I,
    uid: Option<u32>,
    gid: Option<u32>,
    depth: Cell<u32>,
}

impl PrivilegeScope<NixIdentity> {
    /// Scope targeting the user that invoked `sudo`.
    ///
    /// Without `SUDO_UID`/`SUDO_GID` the scope still counts nesting but
    /// never changes ids.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(NixIdentity, env_id("SUDO_UID")?, env_id("SUDO_GID")?))
    }
}

impl<I: IdentitySwitch> PrivilegeScope<I> {
    pub fn new(identity: I, uid: Option<u32>, gid: Option<u32>) -> Self {
        Self {
            identity,
            uid,
            gid,
            depth: Cell::new(0),
        }
    }

    /// Number of dropped sections currently open
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn is_dropped(&self) -> bool {
        self.depth.get() > 0
    }

    /// Run with the invoking user's ids until the guard is dropped.
    pub fn drop_privileges(&self) -> Result<DroppedPrivileges<'_, I>> {
        self.enter_dropped()?;
        Ok(DroppedPrivileges { scope: self })
    }

    /// Run as root inside a dropped section until the guard is dropped.
    pub fn elevate(&self) -> Result<ElevatedPrivileges<'_, I>> {
        if !self.is_dropped() {
            return Err(PlannerError::privilege("elevate called while not dropped"));
        }
        self.leave_dropped()?;
        Ok(ElevatedPrivileges { scope: self })
    }

    /// Give up root for good; no guard can bring it back.
    pub fn drop_permanently(self) -> Result<()> {
        log::debug!("Dropping all privileges (uid {:?}, gid {:?})", self.uid, self.gid);
        if let Some(uid) = self.uid {
            self.identity.load_groups(uid, self.gid)?;
        }
        self.identity.set_all_ids(self.uid, self.gid)
    }

    /// Groups and gid must change while the effective uid is still root.
    fn become_user(&self) -> Result<()> {
        if let Some(uid) = self.uid {
            self.identity.load_groups(uid, self.gid)?;
        }
        if let Some(gid) = self.gid {
            self.identity.set_effective_gid(gid)?;
        }
        if let Some(uid) = self.uid {
            self.identity.set_effective_uid(uid)?;
        }
        Ok(())
    }

    fn become_root(&self) -> Result<()> {
        if self.uid.is_none() && self.gid.is_none() {
            return Ok(());
        }
        self.identity.set_effective_uid(0)?;
        self.identity.set_effective_gid(0)?;
        self.identity.clear_groups()
    }

    fn enter_dropped(&self) -> Result<()> {
        let depth = self.depth.get();
        if depth == 0 {
            self.become_user()?;
        }
        self.depth.set(depth + 1);
        Ok(())
    }

    fn leave_dropped(&self) -> Result<()> {
        let depth = self.depth.get().saturating_sub(1);
        if depth == 0 {
            self.become_root()?;
        }
        self.depth.set(depth);
        Ok(())
    }
}

/// Guard returned by [`PrivilegeScope::drop_privileges`].
#[must_use = "privileges are restored as soon as the guard is dropped"]
pub struct DroppedPrivileges<'a, I: IdentitySwitch> {
    scope: &'a PrivilegeScope<I>,
}

impl<I: IdentitySwitch> Drop for DroppedPrivileges<'_, I> {
    fn drop(&mut self) {
        if let Err(e) = self.scope.leave_dropped() {
            log::error!("Failed to regain privileges: {}", e);
        }
    }
}

/// Guard returned by [`PrivilegeScope::elevate`].
#[must_use = "privileges are dropped again as soon as the guard is dropped"]
pub struct ElevatedPrivileges<'a, I: IdentitySwitch> {
    scope: &'a PrivilegeScope<I>,
}

impl<I: IdentitySwitch> Drop for ElevatedPrivileges<'_, I> {
    fn drop(&mut self) {
        if let Err(e) = self.scope.enter_dropped() {
            log::error!("Failed to drop privileges again: {}", e);
        }
    }
}
