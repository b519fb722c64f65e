//! Typed extras payload.
//!
//! An [`Intent`](crate::Intent) carries an optional bag of typed key/value
//! pairs. The value space is deliberately closed: a tagged enum rather than
//! arbitrary JSON, so that payloads stay cheap to clone and compare and the
//! wire representation is stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single extra value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtraValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    String(String),
    I32Vec(Vec<i32>),
    I64Vec(Vec<i64>),
    StringVec(Vec<String>),
}

/// Key/value payload attached to an intent.
///
/// Backed by a `BTreeMap` so that iteration order (and therefore the
/// serialized form) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extras(BTreeMap<String, ExtraValue>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn put(&mut self, key: impl Into<String>, value: ExtraValue) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(ExtraValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.0.get(key) {
            Some(ExtraValue::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(ExtraValue::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(ExtraValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_string_vec(&self, key: &str) -> Option<&[String]> {
        match self.0.get(key) {
            Some(ExtraValue::StringVec(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Merge `other` into `self`, keeping existing keys on conflict.
    ///
    /// This is the fill-in rule used when a pending-intent template is
    /// completed by a caller-supplied intent: the template wins.
    pub fn merge_keeping_existing(&mut self, other: &Extras) {
        for (k, v) in &other.0 {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.0.iter()
    }
}
