//! Creative catalog seam: read-only size → creative count snapshots

use crate::analysis::sizes::{canonical_label, CreativeSize};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Size → number of creatives able to serve it. Keys are canonical labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    counts: BTreeMap<String, u32>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate sizes (after canonicalization) are summed.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let mut inventory = Self::new();
        for (size, count) in pairs {
            inventory.add(size.as_ref(), count);
        }
        inventory
    }

    pub fn add(&mut self, size: &str, count: u32) {
        *self.counts.entry(canonical_label(size)).or_insert(0) += count;
    }

    pub fn count(&self, size: &str) -> u32 {
        self.counts.get(&canonical_label(size)).copied().unwrap_or(0)
    }

    pub fn is_servable(&self, size: &str) -> bool {
        self.count(size) > 0
    }

    /// Sizes with at least one creative, sorted.
    pub fn servable_sizes(&self) -> Vec<&str> {
        self.counts
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    /// Well-formed servable sizes, for near-miss lookups.
    pub fn servable_dimensions(&self) -> Vec<CreativeSize> {
        self.servable_sizes()
            .into_iter()
            .filter_map(CreativeSize::parse)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// External creative-management collaborator
#[async_trait]
pub trait CreativeCatalog: Send + Sync {
    /// Current inventory snapshot
    async fn snapshot(&self) -> Result<Inventory>;

    /// Catalog type for logging
    fn catalog_type(&self) -> &'static str;
}

/// Fixed in-memory inventory.
pub struct StaticCatalog {
    inventory: Inventory,
}

impl StaticCatalog {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl CreativeCatalog for StaticCatalog {
    async fn snapshot(&self) -> Result<Inventory> {
        Ok(self.inventory.clone())
    }

    fn catalog_type(&self) -> &'static str {
        "static"
    }
}

#[derive(Debug, Deserialize)]
struct InventoryRow {
    size: String,
    #[serde(alias = "count", alias = "creatives")]
    creative_count: u32,
}

/// Inventory exported as CSV with `size,creative_count` columns, re-read on
/// every snapshot.
pub struct CsvCatalog {
    path: PathBuf,
}

impl CsvCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(bytes: &[u8]) -> Result<Inventory> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes);
        let mut inventory = Inventory::new();
        for row in reader.deserialize::<InventoryRow>() {
            let row = row?;
            inventory.add(&row.size, row.creative_count);
        }
        Ok(inventory)
    }
}

#[async_trait]
impl CreativeCatalog for CsvCatalog {
    async fn snapshot(&self) -> Result<Inventory> {
        let bytes = tokio::fs::read(&self.path).await?;
        let inventory = Self::parse(&bytes)?;
        log::info!(
            "🎨 Loaded {} inventory sizes from {}",
            inventory.len(),
            self.path.display()
        );
        Ok(inventory)
    }

    fn catalog_type(&self) -> &'static str {
        "csv"
    }
}
