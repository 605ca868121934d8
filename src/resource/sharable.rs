// src/resource/sharable.rs

//! Exclusive-access resource wrapper.
//!
//! A [`SharableResource`] wraps one value and tracks which runner currently
//! holds it. `claim` never blocks: it either hands out the value and records
//! the claimant, or returns `None` and leaves the resource untouched.
//! `release` only clears the holder when the caller is the holder.
//!
//! Every resource owns a [`Notify`] that fires on release, so a runner that
//! lost a claim race can wait for the next release instead of spinning.

use std::any::{Any, type_name};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

use crate::runner::RunnerId;

/// A value handed out by a successful claim, with its concrete type erased.
///
/// [`crate::task::ResourceParams`] downcasts it back to the type the work
/// closure asks for.
pub trait ClaimedValue {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

/// Type-erased claim/release interface shared by every resource kind.
///
/// Runners hold their resources as `Arc<dyn Sharable>`, keyed by the
/// resource key the task declared.
pub trait Sharable: Send + Sync {
    /// True iff some runner currently holds the claim.
    fn is_locked(&self) -> bool;

    /// The runner currently holding the claim, if any.
    fn holder(&self) -> Option<RunnerId>;

    /// Non-blocking claim. `None` means the resource is held by someone
    /// else or has no value yet.
    fn claim_erased(&self, owner: RunnerId) -> Option<Box<dyn ClaimedValue + '_>>;

    /// Clear the claim if `owner` holds it. Returns whether anything changed.
    fn release(&self, owner: RunnerId) -> bool;

    /// Fires whenever a claim on this resource is released.
    fn released(&self) -> &Notify;

    /// Short human-readable state for logs and timeout messages.
    fn describe(&self) -> String;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Guard over the value of a claimed [`SharableResource`].
///
/// Dropping the guard gives up access to the value but does **not** release
/// the claim; that stays with [`Sharable::release`], which checks the owner.
pub struct Claim<'a, T> {
    guard: MappedMutexGuard<'a, T>,
}

impl<T> Deref for Claim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Claim<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Send + 'static> ClaimedValue for Claim<'_, T> {
    fn as_any(&self) -> &dyn Any {
        &*self.guard
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut *self.guard
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Mutual-exclusion wrapper around a value shared between runners.
pub struct SharableResource<T> {
    value: Mutex<Option<T>>,
    holder: Mutex<Option<RunnerId>>,
    released: Notify,
}

impl<T> SharableResource<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            holder: Mutex::new(None),
            released: Notify::new(),
        }
    }

    /// A resource whose value will be supplied later via
    /// [`assign_value`](Self::assign_value).
    pub fn empty() -> Self {
        Self {
            value: Mutex::new(None),
            holder: Mutex::new(None),
            released: Notify::new(),
        }
    }

    /// Set the value if none is set yet; otherwise do nothing.
    pub fn assign_value(&self, value: T) {
        let mut slot = self.value.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub fn has_value(&self) -> bool {
        self.value.lock().is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    pub fn holder(&self) -> Option<RunnerId> {
        *self.holder.lock()
    }

    /// Claim the resource for `owner`.
    ///
    /// Returns `None` without changing anything when the resource is already
    /// held or has no value.
    pub fn claim(&self, owner: RunnerId) -> Option<Claim<'_, T>> {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            return None;
        }

        // A still-alive guard from the previous holder means the value is
        // not free yet, even though the claim was released.
        let slot = self.value.try_lock()?;
        let guard = MutexGuard::try_map(slot, Option::as_mut).ok()?;

        *holder = Some(owner);
        trace!(runner = %owner, "resource claimed");
        Some(Claim { guard })
    }

    pub fn release(&self, owner: RunnerId) -> bool {
        let cleared = {
            let mut holder = self.holder.lock();
            if *holder == Some(owner) {
                *holder = None;
                true
            } else {
                false
            }
        };

        if cleared {
            trace!(runner = %owner, "resource released");
            self.released.notify_waiters();
        }
        cleared
    }

    /// Claim, copy the value and release straight away.
    ///
    /// The copy is taken while the claim is held, so it never observes a
    /// half-finished write by another claimant.
    pub fn snapshot(&self, owner: RunnerId) -> Option<T>
    where
        T: Clone,
    {
        let copy = self.claim(owner).map(|claim| (*claim).clone());
        if copy.is_some() {
            self.release(owner);
        }
        copy
    }

    /// Take the value out, leaving the resource empty.
    ///
    /// Fails while the resource is claimed.
    pub fn take(&self) -> Option<T> {
        let holder = self.holder.lock();
        if holder.is_some() {
            return None;
        }
        self.value.try_lock()?.take()
    }
}

impl<T: fmt::Debug> SharableResource<T> {
    fn describe_value(&self) -> String {
        match self.value.try_lock() {
            Some(slot) => match slot.as_ref() {
                Some(value) => format!("{value:?}"),
                None => "<unassigned>".to_string(),
            },
            None => "<in use>".to_string(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharableResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharableResource")
            .field("holder", &self.holder())
            .field("value", &self.describe_value())
            .finish()
    }
}

impl<T> Sharable for SharableResource<T>
where
    T: fmt::Debug + Send + 'static,
{
    fn is_locked(&self) -> bool {
        SharableResource::is_locked(self)
    }

    fn holder(&self) -> Option<RunnerId> {
        SharableResource::holder(self)
    }

    fn claim_erased(&self, owner: RunnerId) -> Option<Box<dyn ClaimedValue + '_>> {
        self.claim(owner)
            .map(|claim| Box::new(claim) as Box<dyn ClaimedValue + '_>)
    }

    fn release(&self, owner: RunnerId) -> bool {
        SharableResource::release(self, owner)
    }

    fn released(&self) -> &Notify {
        &self.released
    }

    fn describe(&self) -> String {
        match self.holder() {
            Some(owner) => format!("held by {owner}: {}", self.describe_value()),
            None => self.describe_value(),
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
