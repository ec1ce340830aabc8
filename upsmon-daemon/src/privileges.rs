//! Identity capture and switching for the drop/elevate cycle.
//!
//! At startup, while still root, the daemon captures two identities: the
//! privileged one it was launched with and the unprivileged target user.
//! It then runs unprivileged and elevates only for the instant the shutdown
//! command is invoked.

use std::ffi::CString;

use nix::errno::Errno;
use nix::unistd::{self, Gid, Uid, User};
use tracing::{debug, error};

use crate::errors::{DaemonError, Result};

/// Real/effective/saved ids plus the supplementary group list for one
/// identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub ruid: Uid,
    pub euid: Uid,
    pub suid: Uid,
    pub rgid: Gid,
    pub egid: Gid,
    pub sgid: Gid,
    pub groups: Vec<Gid>,
}

#[derive(Debug)]
struct Snapshots {
    privileged: IdentitySnapshot,
    unprivileged: IdentitySnapshot,
}

/// The two identities captured at startup.
///
/// Empty until [`PrivilegeContext::capture`] runs; switch operations on an
/// empty context are no-ops, so a daemon started without a target user
/// keeps whatever identity it was launched with.
#[derive(Debug, Default)]
pub struct PrivilegeContext {
    snapshots: Option<Snapshots>,
}

impl PrivilegeContext {
    /// Capture the current (privileged) identity and the identity of
    /// `target_user`. Must be called while the real group id is root.
    pub fn capture(target_user: &str) -> Result<Self> {
        let rgid = unistd::getgid();
        if rgid.as_raw() != 0 {
            return Err(DaemonError::NotRoot(rgid.as_raw()));
        }

        let root = resolve_user("root")?;
        let target = resolve_user(target_user)?;

        let privileged = snapshot_current(&root)?;
        let unprivileged = snapshot_from_record(&target)?;

        debug!(user = %target.name, "identities captured");

        Ok(Self {
            snapshots: Some(Snapshots {
                privileged,
                unprivileged,
            }),
        })
    }

    /// Switch to the unprivileged identity: supplementary groups first,
    /// then group ids, then user ids. The saved id slots keep the captured
    /// privileged values so a later elevation stays possible.
    pub fn drop_to_unprivileged(&self) -> Result<()> {
        let Some(snaps) = &self.snapshots else {
            debug!("no identities captured, keeping current identity");
            return Ok(());
        };
        let user = &snaps.unprivileged;
        let root = &snaps.privileged;

        unistd::setgroups(&user.groups).map_err(|e| identity("set supplementary groups", e))?;
        unistd::setresgid(user.rgid, user.egid, root.sgid)
            .map_err(|e| identity("set group ids", e))?;
        unistd::setresuid(user.ruid, user.euid, root.suid)
            .map_err(|e| identity("set user ids", e))?;

        debug!("switched to unprivileged identity");
        Ok(())
    }

    /// Restore the privileged identity exactly: user ids first, then group
    /// ids, then supplementary groups.
    pub fn elevate_to_privileged(&self) -> Result<()> {
        let Some(snaps) = &self.snapshots else {
            debug!("no identities captured, keeping current identity");
            return Ok(());
        };
        let root = &snaps.privileged;

        unistd::setresuid(root.ruid, root.euid, root.suid)
            .map_err(|e| identity("restore user ids", e))?;
        unistd::setresgid(root.rgid, root.egid, root.sgid)
            .map_err(|e| identity("restore group ids", e))?;
        unistd::setgroups(&root.groups)
            .map_err(|e| identity("restore supplementary groups", e))?;

        debug!("switched to privileged identity");
        Ok(())
    }

    /// Discard both snapshots. Idempotent; safe on an empty context.
    pub fn release(&mut self) {
        if self.snapshots.take().is_some() {
            debug!("identity snapshots released");
        }
    }
}

fn identity(step: &'static str, source: Errno) -> DaemonError {
    DaemonError::Identity { step, source }
}

fn resolve_user(name: &str) -> Result<User> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(DaemonError::UserNotFound(name.to_string())),
        Err(e) => {
            error!("passwd lookup for '{name}' failed: {e}");
            Err(DaemonError::UserNotFound(name.to_string()))
        }
    }
}

/// Snapshot the identity the process is currently running with. The group
/// list still comes from the group database, keyed by `user`.
fn snapshot_current(user: &User) -> Result<IdentitySnapshot> {
    let uids = unistd::getresuid().map_err(|e| identity("get resuid", e))?;
    let gids = unistd::getresgid().map_err(|e| identity("get resgid", e))?;
    Ok(IdentitySnapshot {
        ruid: uids.real,
        euid: uids.effective,
        suid: uids.saved,
        rgid: gids.real,
        egid: gids.effective,
        sgid: gids.saved,
        groups: group_list(&user.name, user.gid)?,
    })
}

/// Build a snapshot for `user` entirely from its passwd record; no identity
/// syscalls are needed.
fn snapshot_from_record(user: &User) -> Result<IdentitySnapshot> {
    Ok(IdentitySnapshot {
        ruid: user.uid,
        euid: user.uid,
        suid: user.uid,
        rgid: user.gid,
        egid: user.gid,
        sgid: user.gid,
        groups: group_list(&user.name, user.gid)?,
    })
}

/// Query the full group list for `user`, primary group included.
///
/// `getgrouplist` reports the required capacity through its in/out count
/// when the buffer is too small; the query is retried once with that
/// capacity. A non-positive count after the corrected attempt is a definite
/// error.
fn group_list(user: &str, gid: Gid) -> Result<Vec<Gid>> {
    let c_user = CString::new(user).map_err(|_| DaemonError::UserNotFound(user.to_string()))?;

    let mut count: libc::c_int = 1;
    let mut groups: Vec<libc::gid_t> = vec![0; count as usize];

    // SAFETY: c_user is a valid C string and groups has room for `count`
    // entries; getgrouplist updates `count` to the amount actually needed.
    let ret = unsafe {
        libc::getgrouplist(c_user.as_ptr(), gid.as_raw(), groups.as_mut_ptr(), &mut count)
    };

    if ret == -1 {
        if count <= 0 {
            return Err(DaemonError::GroupCount {
                user: user.to_string(),
                count,
            });
        }

        debug!(count, "growing group list buffer");
        groups = vec![0; count as usize];

        // SAFETY: same contract as above, with the corrected capacity.
        let ret = unsafe {
            libc::getgrouplist(c_user.as_ptr(), gid.as_raw(), groups.as_mut_ptr(), &mut count)
        };
        // getgrouplist does not set errno; the count is the only diagnostic.
        if ret <= 0 || count <= 0 {
            return Err(DaemonError::GroupCount {
                user: user.to_string(),
                count,
            });
        }
    }

    if count <= 0 {
        return Err(DaemonError::GroupCount {
            user: user.to_string(),
            count,
        });
    }

    groups.truncate(count as usize);
    Ok(groups.into_iter().map(Gid::from_raw).collect())
}

#[cfg(test)]
mod tests;
