use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A collaborator-owned object the coordinator passes around but never looks
/// inside: GPU buffers, textures, programs, surfaces, drawing contexts.
///
/// Engines downcast to the concrete type their pools produce.
#[derive(Clone)]
pub struct OpaqueHandle(Rc<dyn Any>);

impl OpaqueHandle {
    pub fn new<T: 'static>(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// True if both handles refer to the same object.
    pub fn same_as(&self, other: &OpaqueHandle) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for OpaqueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueHandle({:p})", Rc::as_ptr(&self.0))
    }
}
