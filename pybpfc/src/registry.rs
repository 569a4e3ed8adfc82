//! Generic name-keyed registry (SPEC_FULL §9 "Module-level state"). Grounded on
//! `original_source/pythonbpf/maps/maps_utils.py`'s `MapProcessorRegistry` and
//! `helper/helper_utils.py`'s handler dict — both are class-level dict registries populated at
//! import time; the idiomatic Rust equivalent is a lazily-initialized table populated at first
//! use, since entries here are stateless and no per-compilation reset is needed.

use std::collections::HashMap;

pub struct Registry<T> {
    entries: HashMap<&'static str, T>,
}

impl<T> Registry<T> {
    pub fn from_entries(entries: impl IntoIterator<Item = (&'static str, T)>) -> Self {
        Registry {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
