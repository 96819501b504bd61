//! Process-wide error reporting hook.
//!
//! Every transport error the binding returns to a caller is also passed to
//! the installed callback, if any. There is exactly one slot for the whole
//! process; the last writer wins.

use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};

use crate::error::Error;

/// Callback receiving transport errors.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

static SLOT: RwLock<Option<ErrorCallback>> = const_rwlock(None);

/// Install `callback` (or clear the slot with `None`), returning the
/// previously installed callback.
pub fn set_error_callback(callback: Option<ErrorCallback>) -> Option<ErrorCallback> {
    std::mem::replace(&mut *SLOT.write(), callback)
}

/// Pass `err` to the installed callback.
pub(crate) fn report(err: &Error) {
    // Clone out of the lock so the callback may replace itself.
    let callback = SLOT.read().clone();
    if let Some(callback) = callback {
        callback(err);
    }
}
