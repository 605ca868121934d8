// src/resource/read_only.rs

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use tokio::sync::Notify;

use super::sharable::{ClaimedValue, Sharable, SharableResource};
use crate::runner::RunnerId;

/// A resource that is only ever read.
///
/// Claiming it claims the inner resource, copies the value and releases
/// again before returning, so the lock is never held across the caller's
/// use of the value. Callers get their own copy; writes to it are not
/// seen by anyone else.
pub struct ReadOnlyResource<T> {
    inner: SharableResource<T>,
}

struct Snapshot<T>(T);

impl<T: Send + 'static> ClaimedValue for Snapshot<T> {
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.0
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

impl<T: Clone> ReadOnlyResource<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: SharableResource::new(value),
        }
    }

    pub fn read(&self, owner: RunnerId) -> Option<T> {
        self.inner.snapshot(owner)
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnlyResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnlyResource").field(&self.inner).finish()
    }
}

impl<T> Sharable for ReadOnlyResource<T>
where
    T: Clone + fmt::Debug + Send + 'static,
{
    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    fn holder(&self) -> Option<RunnerId> {
        self.inner.holder()
    }

    fn claim_erased(&self, owner: RunnerId) -> Option<Box<dyn ClaimedValue + '_>> {
        self.read(owner)
            .map(|value| Box::new(Snapshot(value)) as Box<dyn ClaimedValue + '_>)
    }

    fn release(&self, owner: RunnerId) -> bool {
        self.inner.release(owner)
    }

    fn released(&self) -> &Notify {
        Sharable::released(&self.inner)
    }

    fn describe(&self) -> String {
        format!("read-only {}", self.inner.describe())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
