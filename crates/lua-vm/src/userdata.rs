use crate::value::TableRef;
use parking_lot::RwLock;
use std::any::Any;

/// A host object wrapped as a runtime value.
///
/// Scripts see it as opaque; only its metatable gives it behaviour. The host
/// gets the object back with [`downcast_ref`](Self::downcast_ref).
pub struct LuaUserdata {
    value: Box<dyn Any + Send + Sync>,
    metatable: RwLock<Option<TableRef>>,
}

impl LuaUserdata {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Box::new(value),
            metatable: RwLock::new(None),
        }
    }

    pub fn with_metatable<T: Any + Send + Sync>(value: T, metatable: TableRef) -> Self {
        Self {
            value: Box::new(value),
            metatable: RwLock::new(Some(metatable)),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.read().clone()
    }

    pub fn set_metatable(&self, mt: Option<TableRef>) {
        *self.metatable.write() = mt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_value_comes_back_by_type() {
        let ud = LuaUserdata::new(String::from("socket"));
        assert!(ud.is::<String>());
        assert_eq!(ud.downcast_ref::<String>().map(String::as_str), Some("socket"));
        assert!(ud.downcast_ref::<u32>().is_none());
    }
}
