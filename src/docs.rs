//! Document payloads
//!
//! Payload shape is not what is being measured; documents only need a stable
//! set of named fields (so views and full-text queries have something to
//! match) and roughly the configured size.

use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use xxhash_rust::xxh3::xxh3_64;

const CITIES: [&str; 8] = [
    "Oslo", "Rome", "Lima", "Kyiv", "Pune", "Austin", "Nairobi", "Osaka",
];
const WORDS: [&str; 12] = [
    "amber", "brisk", "cedar", "delta", "ember", "fjord", "grove", "harbor", "ivory", "juniper",
    "kestrel", "lumen",
];

/// Deterministic document generator: the same key always yields the same document
#[derive(Debug, Clone)]
pub struct DocGenerator {
    size: usize,
}

impl DocGenerator {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// Seed-free XXH3, stable across builds and platforms
    fn digest(key: &str) -> u64 {
        xxh3_64(key.as_bytes())
    }

    pub fn next(&self, key: &str) -> Value {
        let d = Self::digest(key);
        let name = format!(
            "{} {}",
            WORDS[(d % WORDS.len() as u64) as usize],
            WORDS[((d >> 8) % WORDS.len() as u64) as usize]
        );
        let city = CITIES[((d >> 16) % CITIES.len() as u64) as usize];
        let mut doc = json!({
            "name": name,
            "email": format!("{}@example.com", key),
            "city": city,
            "coins": (d >> 24) % 1000,
            "category": (d >> 32) % 3,
            "body": "",
        });
        let used = doc.to_string().len();
        if self.size > used {
            let pad: String = std::iter::repeat(WORDS[((d >> 40) % WORDS.len() as u64) as usize])
                .flat_map(|w| w.chars().chain(std::iter::once(' ')))
                .take(self.size - used)
                .collect();
            doc["body"] = Value::String(pad);
        }
        doc
    }

    /// Value of `field` in the document for `key`
    pub fn field(&self, key: &str, field: &str) -> Value {
        self.next(key).get(field).cloned().unwrap_or(Value::Null)
    }

    /// Fresh values for a set of fields (sub-document mutation)
    pub fn mutate_fields<R: Rng>(&self, fields: &[String], rng: &mut R) -> BTreeMap<String, Value> {
        fields
            .iter()
            .map(|f| {
                let v = match f.as_str() {
                    "coins" | "category" => json!(rng.random_range(0..1000u64)),
                    _ => json!(WORDS[rng.random_range(0..WORDS.len())]),
                };
                (f.clone(), v)
            })
            .collect()
    }
}
