//! RAII handle for pooled resources

use std::fmt;
use std::sync::Weak;

/// Pool-unique identity of a resource.
///
/// Bookkeeping (in-use membership, double release, destroy idempotency)
/// is keyed by this id, never by the resource value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a dropped handle returns its resource.
pub(crate) trait Home<R>: Send + Sync {
    fn release(&self, id: ResourceId, resource: R);
}

/// A resource checked out of a pool.
///
/// Hand it back with [`Pool::release`](crate::Pool::release) or retire it
/// with [`Pool::destroy`](crate::Pool::destroy). Dropping the handle is
/// the same as releasing it.
pub struct Pooled<R> {
    resource: Option<R>,
    id: ResourceId,
    use_count: usize,
    home: Weak<dyn Home<R>>,
}

impl<R> Pooled<R> {
    pub(crate) fn new(resource: R, id: ResourceId, use_count: usize, home: Weak<dyn Home<R>>) -> Self {
        Self {
            resource: Some(resource),
            id,
            use_count,
            home,
        }
    }

    /// Identity of the wrapped resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Number of times the resource was released before this checkout.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.use_count
    }

    pub(crate) fn belongs_to(&self, home: *const ()) -> bool {
        std::ptr::eq(self.home.as_ptr().cast::<()>(), home)
    }

    /// Take the resource out without running the drop hook.
    pub(crate) fn into_parts(mut self) -> Option<(ResourceId, R)> {
        self.resource.take().map(|resource| (self.id, resource))
    }
}

impl<R> std::ops::Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource
            .as_ref()
            .expect("resource is present until the handle is consumed")
    }
}

impl<R> std::ops::DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource
            .as_mut()
            .expect("resource is present until the handle is consumed")
    }
}

impl<R> Drop for Pooled<R> {
    fn drop(&mut self) {
        if let (Some(resource), Some(home)) = (self.resource.take(), self.home.upgrade()) {
            home.release(self.id, resource);
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("use_count", &self.use_count)
            .field("resource", &self.resource)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        released: Mutex<Vec<(ResourceId, u32)>>,
    }

    impl Home<u32> for Recorder {
        fn release(&self, id: ResourceId, resource: u32) {
            self.released.lock().push((id, resource));
        }
    }

    fn handle(home: &Arc<Recorder>, value: u32) -> Pooled<u32> {
        let weak: Weak<dyn Home<u32>> = Arc::downgrade(home) as Weak<dyn Home<u32>>;
        Pooled::new(value, ResourceId(value.into()), 0, weak)
    }

    #[test]
    fn guard_deref() {
        let home = Arc::new(Recorder::default());
        let guard = handle(&home, 42);
        assert_eq!(*guard, 42);
        assert_eq!(guard.id().to_string(), "#42");
    }

    #[test]
    fn guard_drop_releases_home() {
        let home = Arc::new(Recorder::default());
        drop(handle(&home, 7));
        assert_eq!(*home.released.lock(), vec![(ResourceId(7), 7)]);
    }

    #[test]
    fn into_parts_prevents_callback() {
        let home = Arc::new(Recorder::default());
        let parts = handle(&home, 3).into_parts();
        assert_eq!(parts, Some((ResourceId(3), 3)));
        assert!(home.released.lock().is_empty());
    }

    #[test]
    fn guard_deref_mut() {
        let home = Arc::new(Recorder::default());
        let mut guard = handle(&home, 1);
        *guard += 1;
        assert_eq!(*guard, 2);
    }

    #[test]
    fn dropped_home_drops_resource() {
        let home = Arc::new(Recorder::default());
        let guard = handle(&home, 5);
        let ptr = Arc::as_ptr(&home).cast::<()>();
        assert!(guard.belongs_to(ptr));
        drop(home);
        drop(guard);
    }

    #[test]
    fn foreign_home_is_detected() {
        let home = Arc::new(Recorder::default());
        let other = Arc::new(Recorder::default());
        let guard = handle(&home, 6);
        assert!(!guard.belongs_to(Arc::as_ptr(&other).cast::<()>()));
    }
}
