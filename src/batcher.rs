use std::collections::HashSet;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A run of consecutive cached pages that becomes one PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBatch {
    /// 1-based position among all batches of the run.
    pub index: usize,
    pub ids: Vec<String>,
}

impl PageBatch {
    pub fn first(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }
}

/// Splits `ids` into consecutive groups of `size`; only the last group may
/// be shorter. A `size` of zero is treated as one.
pub fn batches(ids: &[String], size: usize) -> Vec<PageBatch> {
    ids.chunks(size.max(1))
        .enumerate()
        .map(|(i, chunk)| PageBatch {
            index: i + 1,
            ids: chunk.to_vec(),
        })
        .collect()
}

/// Build order over the cache: pages found by this crawl in discovery
/// order, then every other cached page in cache order.
pub fn build_order(discovered: &[String], cached: &[String]) -> Vec<String> {
    let cached_set: HashSet<&str> = cached.iter().map(String::as_str).collect();
    let mut placed = HashSet::new();
    let mut order = Vec::with_capacity(cached.len());

    for id in discovered.iter().chain(cached) {
        if cached_set.contains(id.as_str()) && placed.insert(id.as_str()) {
            order.push(id.clone());
        }
    }
    order
}
