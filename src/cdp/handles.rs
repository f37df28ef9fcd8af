//! Integer handles for CDP object ids
//!
//! DAP addresses scopes and structured values by integer
//! `variablesReference`; CDP uses opaque object id strings. Handles are
//! minted from a counter that only grows, so a handle from an earlier
//! pause never resolves again once the table has been invalidated.

use std::collections::HashMap;

use crate::common::{Error, Result};

#[derive(Debug)]
pub struct VariableHandles {
    next: i64,
    by_handle: HashMap<i64, String>,
    by_object: HashMap<String, i64>,
}

impl Default for VariableHandles {
    fn default() -> Self {
        Self {
            next: 1,
            by_handle: HashMap::new(),
            by_object: HashMap::new(),
        }
    }
}

impl VariableHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `object_id`, reusing one minted since the last invalidation
    pub fn mint(&mut self, object_id: &str) -> i64 {
        if let Some(&handle) = self.by_object.get(object_id) {
            return handle;
        }
        let handle = self.next;
        self.next += 1;
        self.by_handle.insert(handle, object_id.to_string());
        self.by_object.insert(object_id.to_string(), handle);
        handle
    }

    pub fn resolve(&self, handle: i64) -> Result<&str> {
        self.by_handle
            .get(&handle)
            .map(String::as_str)
            .ok_or(Error::InvalidVariableReference(handle))
    }

    /// Drop every handle (on resume and disconnect)
    pub fn invalidate(&mut self) {
        self.by_handle.clear();
        self.by_object.clear();
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
