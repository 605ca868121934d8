// src/task/params.rs

//! Resolved resource values handed to a task's work closure.

use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{PlantError, Result};
use crate::resource::ClaimedValue;

/// The resources a runner claimed for one execution, keyed by resource key.
///
/// Each entry can be borrowed independently, so a work closure can hold
/// several resources mutably at once:
///
/// ```ignore
/// let mut body = params.get_mut::<String>("body")?;
/// let mut log = params.get_mut::<Journal>("log")?;
/// ```
pub struct ResourceParams<'a> {
    claims: BTreeMap<String, RefCell<Box<dyn ClaimedValue + 'a>>>,
}

impl<'a> ResourceParams<'a> {
    pub(crate) fn new() -> Self {
        Self {
            claims: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, claim: Box<dyn ClaimedValue + 'a>) {
        self.claims.insert(key.into(), RefCell::new(claim));
    }

    pub fn get<T: 'static>(&self, key: &str) -> Result<Ref<'_, T>> {
        let cell = self
            .claims
            .get(key)
            .ok_or_else(|| PlantError::MissingParam(key.to_string()))?;
        let claim = cell
            .try_borrow()
            .map_err(|_| PlantError::ParamInUse(key.to_string()))?;

        Ref::filter_map(claim, |c| c.as_any().downcast_ref::<T>()).map_err(|_| {
            PlantError::ParamType {
                key: key.to_string(),
                expected: type_name::<T>(),
            }
        })
    }

    pub fn get_mut<T: 'static>(&self, key: &str) -> Result<RefMut<'_, T>> {
        let cell = self
            .claims
            .get(key)
            .ok_or_else(|| PlantError::MissingParam(key.to_string()))?;
        let claim = cell
            .try_borrow_mut()
            .map_err(|_| PlantError::ParamInUse(key.to_string()))?;

        RefMut::filter_map(claim, |c| c.as_any_mut().downcast_mut::<T>()).map_err(|_| {
            PlantError::ParamType {
                key: key.to_string(),
                expected: type_name::<T>(),
            }
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.claims.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.claims.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl fmt::Debug for ResourceParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.claims.iter().map(|(k, v)| {
                let ty = v.try_borrow().map(|c| c.type_name()).unwrap_or("<borrowed>");
                (k, ty)
            }))
            .finish()
    }
}
