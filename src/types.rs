use std::sync::{Arc, RwLock};

use crate::error::OakError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, OakError>;
pub type OakResult = Result<(), OakError>;

pub fn new_pod<T>(value: T) -> Pod<T> {
    Arc::new(RwLock::new(value))
}
