//! Resource factory contract
//!
//! The pool never looks inside a resource. Everything it needs to know
//! about creating, checking and tearing one down comes from a [`Factory`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{BoxError, Error, Result};

/// Creates, validates and destroys the resources managed by a pool.
///
/// `create` and `destroy` may be slow; the pool calls them without
/// holding any of its own locks. `validate` must be cheap and synchronous,
/// it runs while a waiter is being served.
pub trait Factory: Send + Sync + 'static {
    /// The resource type handed out by the pool.
    type Resource: Send + 'static;

    /// Error produced by `create` and `destroy`.
    type Error: Into<BoxError> + Send + 'static;

    /// Name used in log output and error messages.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Create a new resource.
    fn create(&self) -> impl Future<Output = std::result::Result<Self::Resource, Self::Error>> + Send;

    /// Gently close a resource that is leaving the pool for good.
    fn destroy(
        &self,
        resource: Self::Resource,
    ) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send;

    /// Whether a previously pooled resource can still be handed out.
    fn validate(&self, resource: &Self::Resource) -> bool;
}

type CreateFn<R> = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<R, BoxError>> + Send + Sync>;
type DestroyFn<R> = Arc<dyn Fn(R) -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;
type ValidateFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// A [`Factory`] assembled from closures.
///
/// ```
/// use nebula_pool::FnFactory;
///
/// let factory = FnFactory::<u32>::builder()
///     .name("numbers")
///     .create(|| async { Ok::<_, std::io::Error>(42) })
///     .destroy(|_n| async { Ok::<_, std::io::Error>(()) })
///     .validate(|n| *n > 0)
///     .build()
///     .unwrap();
/// # let _ = factory;
/// ```
pub struct FnFactory<R> {
    name: Option<String>,
    create: CreateFn<R>,
    destroy: DestroyFn<R>,
    validate: ValidateFn<R>,
}

impl<R> Clone for FnFactory<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            create: Arc::clone(&self.create),
            destroy: Arc::clone(&self.destroy),
            validate: Arc::clone(&self.validate),
        }
    }
}

impl<R> std::fmt::Debug for FnFactory<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFactory").field("name", &self.name).finish()
    }
}

impl<R: Send + 'static> FnFactory<R> {
    /// Start assembling a factory.
    #[must_use]
    pub fn builder() -> FnFactoryBuilder<R> {
        FnFactoryBuilder {
            name: None,
            create: None,
            destroy: None,
            validate: None,
        }
    }
}

impl<R: Send + 'static> Factory for FnFactory<R> {
    type Resource = R;
    type Error = BoxError;

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn create(&self) -> impl Future<Output = std::result::Result<R, BoxError>> + Send {
        (self.create)()
    }

    fn destroy(&self, resource: R) -> impl Future<Output = std::result::Result<(), BoxError>> + Send {
        (self.destroy)(resource)
    }

    fn validate(&self, resource: &R) -> bool {
        (self.validate)(resource)
    }
}

/// Builder for [`FnFactory`]. All three operations are mandatory.
pub struct FnFactoryBuilder<R> {
    name: Option<String>,
    create: Option<CreateFn<R>>,
    destroy: Option<DestroyFn<R>>,
    validate: Option<ValidateFn<R>>,
}

impl<R: Send + 'static> FnFactoryBuilder<R> {
    /// Name used for logging.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Closure creating a resource.
    pub fn create<C, Fut, E>(mut self, create: C) -> Self
    where
        C: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.create = Some(Arc::new(move || {
            create().map(|r| r.map_err(Into::<BoxError>::into)).boxed()
        }));
        self
    }

    /// Closure destroying a resource.
    pub fn destroy<D, Fut, E>(mut self, destroy: D) -> Self
    where
        D: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.destroy = Some(Arc::new(move |resource: R| {
            destroy(resource).map(|r| r.map_err(Into::<BoxError>::into)).boxed()
        }));
        self
    }

    /// Closure validating a pooled resource before reuse.
    pub fn validate<V>(mut self, validate: V) -> Self
    where
        V: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Finish the factory.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] naming the first missing operation.
    pub fn build(self) -> Result<FnFactory<R>> {
        let create = self
            .create
            .ok_or_else(|| Error::configuration("create function is required"))?;
        let destroy = self
            .destroy
            .ok_or_else(|| Error::configuration("destroy function is required"))?;
        let validate = self
            .validate
            .ok_or_else(|| Error::configuration("validate function is required"))?;
        Ok(FnFactory {
            name: self.name,
            create,
            destroy,
            validate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> FnFactoryBuilder<u32> {
        FnFactory::builder()
            .create(|| async { Ok::<_, std::io::Error>(1) })
            .destroy(|_| async { Ok::<_, std::io::Error>(()) })
            .validate(|_| true)
    }

    #[test]
    fn missing_operations_are_configuration_errors() {
        let no_create = FnFactory::<u32>::builder()
            .destroy(|_| async { Ok::<_, std::io::Error>(()) })
            .validate(|_| true)
            .build();
        assert!(
            matches!(no_create, Err(Error::Configuration { ref message }) if message == "create function is required")
        );

        let no_destroy = FnFactory::<u32>::builder()
            .create(|| async { Ok::<_, std::io::Error>(1) })
            .validate(|_| true)
            .build();
        assert!(
            matches!(no_destroy, Err(Error::Configuration { ref message }) if message == "destroy function is required")
        );

        let no_validate = FnFactory::<u32>::builder()
            .create(|| async { Ok::<_, std::io::Error>(1) })
            .destroy(|_| async { Ok::<_, std::io::Error>(()) })
            .build();
        assert!(
            matches!(no_validate, Err(Error::Configuration { ref message }) if message == "validate function is required")
        );
    }

    #[tokio::test]
    async fn closures_are_invoked() {
        let factory = complete().name("ints").build().unwrap();
        assert_eq!(factory.name(), Some("ints"));
        assert_eq!(factory.create().await.unwrap(), 1);
        assert!(factory.destroy(1).await.is_ok());
        assert!(factory.validate(&1));
    }

    #[tokio::test]
    async fn create_errors_are_boxed() {
        let factory = FnFactory::<u32>::builder()
            .create(|| async { Err::<u32, _>(std::io::Error::other("refused")) })
            .destroy(|_| async { Ok::<_, std::io::Error>(()) })
            .validate(|_| true)
            .build()
            .unwrap();
        let err = factory.create().await.unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }
}
