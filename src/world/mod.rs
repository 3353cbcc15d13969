//! Per-backend world holding the prepared integration context.
//!
//! A [`World`] is created empty for one backend. `bake::populate_world`
//! builds an [`IntegrationContext`] and moves it in; integrators then borrow it
//! through [`IntegrationContextRef`] for the lifetime of the world borrow.

mod build;
mod bvh;
mod scene;

pub use build::build_bvh;
pub use bvh::{Aabb, Bvh, BvhNode, Hit, Ray, Triangle};
pub use scene::{Environment, Light, LightSample, Material, SceneAccel};

use crate::device::Backend;

/// Prepared acceleration structure plus the scene data kernels need.
///
/// Move-only; dropping it releases the structure.
#[derive(Debug)]
pub struct IntegrationContext {
    backend: Backend,
    scene: SceneAccel,
}

impl IntegrationContext {
    pub fn new(backend: Backend, scene: SceneAccel) -> Self {
        Self { backend, scene }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn scene(&self) -> &SceneAccel {
        &self.scene
    }

    pub fn as_ref(&self) -> IntegrationContextRef<'_> {
        IntegrationContextRef { inner: self }
    }
}

impl Drop for IntegrationContext {
    fn drop(&mut self) {
        tracing::debug!(
            backend = %self.backend,
            triangles = self.scene.triangle_count(),
            "integration context released"
        );
    }
}

/// Borrowed view of an [`IntegrationContext`].
#[derive(Debug, Clone, Copy)]
pub struct IntegrationContextRef<'a> {
    inner: &'a IntegrationContext,
}

impl<'a> IntegrationContextRef<'a> {
    pub fn backend(self) -> Backend {
        self.inner.backend
    }

    pub fn scene(self) -> &'a SceneAccel {
        &self.inner.scene
    }
}

/// Owner of at most one integration context, bound to a backend.
#[derive(Debug)]
pub struct World {
    backend: Backend,
    context: Option<IntegrationContext>,
}

impl World {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            context: None,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Prepared context, if the world has been populated.
    pub fn integration_context(&self) -> Option<IntegrationContextRef<'_>> {
        self.context.as_ref().map(IntegrationContext::as_ref)
    }

    /// Take ownership of `context`, dropping any previous one.
    ///
    /// Panics if `context` was built for another backend.
    pub fn set_integration_context(&mut self, context: IntegrationContext) {
        assert_eq!(
            context.backend, self.backend,
            "integration context backend does not match the world"
        );
        self.context = Some(context);
    }

    /// Drop the held context.
    pub fn clear(&mut self) {
        self.context = None;
    }
}
