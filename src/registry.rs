//! Scoped snapshot registry override.
//!
//! `SnapshotRegistry::acquire` remembers the package manager's registry, points
//! it at the snapshot registry and hands out the package manager for the
//! duration of the scope. The prior value is put back by `restore()` or, on
//! any other exit path (early return, `?`, panic unwind), by `Drop`.
//!
//! ```ignore
//! let mut scope = SnapshotRegistry::acquire(&mut npm, DEFAULT_SNAPSHOT_REGISTRY)?;
//! scope.package_manager().install(&token)?;
//! scope.restore()?;
//! ```

use tracing::{error, info};

use crate::error::Result;
use crate::npm::PackageManager;
use crate::process_guard;

/// Registry override that is undone when the scope ends.
pub struct SnapshotRegistry<'a, P: PackageManager + ?Sized> {
    pm: &'a mut P,
    prior: Option<String>,
    restored: bool,
    /// Whether this scope armed the global signal restore hook
    hook_armed: bool,
}

impl<'a, P: PackageManager + ?Sized> SnapshotRegistry<'a, P> {
    /// Point `pm` at `url`, remembering the current registry.
    ///
    /// If reading the current registry fails nothing has changed and the error
    /// is returned. If setting the new registry fails the prior value is
    /// restored before the error is returned.
    pub fn acquire(pm: &'a mut P, url: &str) -> Result<Self> {
        let prior = pm.registry()?;
        info!(
            "Switching npm registry to {} (was {})",
            url,
            prior.as_deref().unwrap_or("<unset>")
        );

        let hook_armed = match pm.restore_hook(prior.clone()) {
            Some(hook) => {
                process_guard::arm_restore_hook(hook);
                true
            }
            None => false,
        };

        let mut scope = Self {
            pm,
            prior,
            restored: false,
            hook_armed,
        };
        scope.pm.set_registry(url)?;
        Ok(scope)
    }

    /// The package manager, configured for the snapshot registry.
    pub fn package_manager(&mut self) -> &mut P {
        &mut *self.pm
    }

    /// Registry value that will be restored (`None`: the key is deleted).
    pub fn prior(&self) -> Option<&str> {
        self.prior.as_deref()
    }

    /// Restore the prior registry now and report whether that worked.
    pub fn restore(mut self) -> Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        let result = match self.prior.clone() {
            Some(prior) => {
                info!("Restoring npm registry to {}", prior);
                self.pm.set_registry(&prior)
            }
            None => {
                info!("Removing npm registry override");
                self.pm.delete_registry()
            }
        };

        // Until the restore has landed, an interrupt must still be able to redo it
        if self.hook_armed && result.is_ok() {
            drop(process_guard::disarm_restore_hook());
            self.hook_armed = false;
        }
        result
    }
}

impl<P: PackageManager + ?Sized> Drop for SnapshotRegistry<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            error!("Failed to restore npm registry: {}", e);
        }
    }
}
