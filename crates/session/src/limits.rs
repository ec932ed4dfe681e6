// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Apply the step's resource-limit table before task forks.

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use stepd_core::{LimitKind, ResourceLimits};
use stepd_sys::SysError;

fn resource_for(kind: LimitKind) -> Resource {
    match kind {
        LimitKind::Core => Resource::RLIMIT_CORE,
        LimitKind::Cpu => Resource::RLIMIT_CPU,
        LimitKind::Data => Resource::RLIMIT_DATA,
        LimitKind::FileSize => Resource::RLIMIT_FSIZE,
        LimitKind::NoFile => Resource::RLIMIT_NOFILE,
        LimitKind::NProc => Resource::RLIMIT_NPROC,
        LimitKind::Rss => Resource::RLIMIT_RSS,
        LimitKind::Stack => Resource::RLIMIT_STACK,
    }
}

/// Set each requested soft limit, clamped to the current hard limit.
///
/// Individual failures are logged and skipped; only a totally broken
/// rlimit interface surfaces as an error.
pub fn apply(limits: &ResourceLimits) -> Result<(), SysError> {
    for (kind, value) in limits.iter() {
        let resource = resource_for(kind);
        let (_, hard) = getrlimit(resource).map_err(|e| SysError::new("getrlimit", e))?;
        let soft = value.min(hard);
        if let Err(e) = setrlimit(resource, soft, hard) {
            tracing::warn!("setrlimit {}: {}", kind, e.desc());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_clamps_to_the_hard_limit() {
        let (_, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        let mut limits = ResourceLimits::new();
        limits.set(LimitKind::NoFile, u64::MAX);
        apply(&limits).unwrap();

        let (soft, _) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        assert_eq!(soft, hard);
    }

    #[test]
    fn empty_table_is_a_no_op() {
        apply(&ResourceLimits::new()).unwrap();
    }
}
