// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Temporary privilege demotion around user-side IO setup.
//!
//! Client connections and stdio override files are opened with the
//! target user's effective ids so path permissions are the user's, not
//! the daemon's. No-op when the daemon is not root.

use nix::unistd::{setegid, seteuid, setgroups, Gid, Uid};
use stepd_core::UserIdentity;
use stepd_sys::SysError;

/// Restores the saved effective ids on drop.
pub struct PrivGuard {
    saved_uid: Uid,
    saved_gid: Gid,
}

impl Drop for PrivGuard {
    fn drop(&mut self) {
        if let Err(e) = seteuid(self.saved_uid) {
            tracing::error!("seteuid({}): {}", self.saved_uid, e.desc());
            return;
        }
        if let Err(e) = setegid(self.saved_gid) {
            tracing::error!("setegid({}): {}", self.saved_gid, e.desc());
        }
        if let Err(e) = setgroups(&[self.saved_gid]) {
            tracing::debug!("setgroups restore: {}", e.desc());
        }
    }
}

/// Switch effective ids to the target user until the guard drops.
///
/// Returns `None` (and changes nothing) when not running as root.
pub fn drop_privileges(identity: &UserIdentity) -> Result<Option<PrivGuard>, SysError> {
    if !Uid::current().is_root() {
        return Ok(None);
    }

    let saved_uid = Uid::effective();
    let saved_gid = Gid::effective();

    setegid(Gid::from_raw(identity.gid)).map_err(|e| SysError::new("setegid", e))?;
    let groups: Vec<Gid> = identity.groups.iter().map(|g| Gid::from_raw(*g)).collect();
    if let Err(e) = setgroups(&groups) {
        tracing::warn!("setgroups: {}", e.desc());
    }
    if let Err(e) = seteuid(Uid::from_raw(identity.uid)) {
        // roll the gid back before failing
        let _ = setegid(saved_gid);
        return Err(SysError::new("seteuid", e));
    }

    Ok(Some(PrivGuard { saved_uid, saved_gid }))
}
