//! Distance/duration matrix construction.
//!
//! The builder turns N coordinates into a complete N x N matrix using the
//! cheapest gateway strategy that fits N: one table call for small inputs,
//! quadratic tiling for medium ones, pairwise route queries beyond that.
//! Chunks are fetched by a bounded worker pool and stitched by absolute
//! indices, so completion order never matters. Failed chunks degrade to
//! great-circle estimates instead of failing the build.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CachedMatrix, MatrixCache};
use crate::gateway::{GatewayError, MatrixChunk, RoutingGateway};
use crate::geo::Coordinate;
use crate::haversine::HaversineGateway;
use crate::progress::{ProgressReporter, SilentProgress};

/// A complete, read-only travel matrix over an ordered coordinate list.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub distances_m: Vec<Vec<i32>>,
    pub durations_s: Vec<Vec<i32>>,
    coordinates: Vec<Coordinate>,
    index: HashMap<String, usize>,
    /// Cells that fell back to great-circle estimates.
    pub degraded_cells: usize,
    pub(crate) traffic_applied: bool,
}

impl Matrix {
    pub fn new(
        coordinates: Vec<Coordinate>,
        distances_m: Vec<Vec<i32>>,
        durations_s: Vec<Vec<i32>>,
        degraded_cells: usize,
    ) -> Self {
        let index = coordinates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key(), i))
            .collect();
        Self {
            distances_m,
            durations_s,
            coordinates,
            index,
            degraded_cells,
            traffic_applied: false,
        }
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn index_of(&self, coordinate: Coordinate) -> Option<usize> {
        self.index.get(&coordinate.key()).copied()
    }

    pub fn distance(&self, from: usize, to: usize) -> i64 {
        i64::from(self.distances_m[from][to])
    }

    pub fn duration(&self, from: usize, to: usize) -> i64 {
        i64::from(self.durations_s[from][to])
    }

    pub fn traffic_applied(&self) -> bool {
        self.traffic_applied
    }
}

/// Strategy thresholds and pool sizing.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Largest N served by a single table request.
    pub single_table_max: usize,
    /// Largest N served by quadratic tiling; beyond this, pairwise routes.
    pub tiled_max: usize,
    /// Tile edge length.
    pub chunk_size: usize,
    /// Bounded network worker pool size.
    pub workers: usize,
    /// Transient-failure retries per chunk.
    pub max_retries: u32,
    /// Base backoff delay, doubled per retry.
    pub retry_base_delay_ms: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            single_table_max: 30,
            tiled_max: 500,
            chunk_size: 80,
            workers: 5,
            max_retries: 3,
            retry_base_delay_ms: 250,
        }
    }
}

/// One fetched tile, addressed in absolute matrix indices.
struct FetchedTile {
    row_offset: usize,
    col_offset: usize,
    chunk: MatrixChunk,
    degraded: usize,
}

pub struct MatrixBuilder<'a> {
    gateway: &'a dyn RoutingGateway,
    fallback: HaversineGateway,
    cache: Option<&'a MatrixCache>,
    config: BuilderConfig,
    departure_hhmm: Option<String>,
    costing_profile: String,
    progress: &'a dyn ProgressReporter,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> MatrixBuilder<'a> {
    pub fn new(gateway: &'a dyn RoutingGateway) -> Self {
        Self {
            gateway,
            fallback: HaversineGateway::default(),
            cache: None,
            config: BuilderConfig::default(),
            departure_hhmm: None,
            costing_profile: "driving".to_string(),
            progress: &SilentProgress,
            cancel: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a MatrixCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_departure(mut self, departure_hhmm: Option<String>) -> Self {
        self.departure_hhmm = departure_hhmm;
        self
    }

    pub fn with_costing_profile(mut self, profile: impl Into<String>) -> Self {
        self.costing_profile = profile.into();
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Build the complete matrix for `locations`.
    ///
    /// The only hard failure is cancellation; provider trouble degrades cells
    /// to great-circle estimates instead.
    pub fn build(&self, locations: &[Coordinate]) -> Result<Matrix, GatewayError> {
        let n = locations.len();
        if n == 0 {
            return Ok(Matrix::new(Vec::new(), Vec::new(), Vec::new(), 0));
        }

        let key = cache_key(
            self.gateway.provider_id(),
            locations,
            self.departure_hhmm.as_deref(),
            &self.costing_profile,
        );
        if let Some(cache) = self.cache {
            if let Some(hit) = cache.load(key, self.gateway.provider_id()) {
                debug!(n, "matrix cache hit");
                return Ok(Matrix::new(
                    locations.to_vec(),
                    hit.distances_m,
                    hit.durations_s,
                    0,
                ));
            }
        }

        let tiles = if n <= self.config.single_table_max {
            self.fetch_single(locations)?
        } else if n <= self.config.tiled_max {
            self.fetch_tiled(locations)?
        } else {
            self.fetch_pairwise(locations)?
        };

        let mut distances = vec![vec![0i32; n]; n];
        let mut durations = vec![vec![0i32; n]; n];
        let mut degraded = 0usize;
        for tile in tiles {
            degraded += tile.degraded;
            for (r, row) in tile.chunk.distances_m.iter().enumerate() {
                distances[tile.row_offset + r][tile.col_offset..tile.col_offset + row.len()]
                    .copy_from_slice(row);
            }
            for (r, row) in tile.chunk.durations_s.iter().enumerate() {
                durations[tile.row_offset + r][tile.col_offset..tile.col_offset + row.len()]
                    .copy_from_slice(row);
            }
        }

        // Diagonal is forced to zero regardless of what providers report.
        for i in 0..n {
            distances[i][i] = 0;
            durations[i][i] = 0;
        }

        if degraded > 0 {
            warn!(degraded, total = n * n, "matrix cells degraded to great-circle estimates");
        } else {
            info!(n, provider = self.gateway.provider_id(), "matrix built");
        }

        // Degraded builds are not cached; a provider outage should not pin
        // estimated cells for the whole TTL.
        if degraded == 0 {
            if let Some(cache) = self.cache {
                let payload = CachedMatrix {
                    distances_m: distances.clone(),
                    durations_s: durations.clone(),
                };
                if let Err(err) = cache.store(key, self.gateway.provider_id(), &payload) {
                    warn!(error = %err, "matrix cache write failed");
                }
            }
        }

        Ok(Matrix::new(locations.to_vec(), distances, durations, degraded))
    }

    fn fetch_single(&self, locations: &[Coordinate]) -> Result<Vec<FetchedTile>, GatewayError> {
        if self.cancelled() {
            return Err(GatewayError::ProviderUnavailable("build cancelled".into()));
        }
        let tile = self.fetch_tile(locations, locations, 0, 0);
        self.progress.on_progress("matrix", 1, 1);
        Ok(vec![tile])
    }

    fn fetch_tiled(&self, locations: &[Coordinate]) -> Result<Vec<FetchedTile>, GatewayError> {
        let n = locations.len();
        let chunk = self.config.chunk_size.max(1);
        let bounds: Vec<(usize, usize)> = (0..n)
            .step_by(chunk)
            .map(|start| (start, (start + chunk).min(n)))
            .collect();

        // Row-major job order; stitching is index-addressed so completion
        // order is irrelevant.
        let mut jobs = Vec::with_capacity(bounds.len() * bounds.len());
        for &(row_start, row_end) in &bounds {
            for &(col_start, col_end) in &bounds {
                jobs.push((row_start, row_end, col_start, col_end));
            }
        }

        self.run_jobs(|done| {
            jobs.par_iter()
                .map(|&(row_start, row_end, col_start, col_end)| {
                    if self.cancelled() {
                        return None;
                    }
                    let tile = self.fetch_tile(
                        &locations[row_start..row_end],
                        &locations[col_start..col_end],
                        row_start,
                        col_start,
                    );
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    self.progress.on_progress("matrix", finished, jobs.len());
                    Some(tile)
                })
                .collect()
        })
    }

    fn fetch_pairwise(&self, locations: &[Coordinate]) -> Result<Vec<FetchedTile>, GatewayError> {
        let n = locations.len();
        let mut jobs = Vec::with_capacity(n * (n - 1));
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    jobs.push((i, j));
                }
            }
        }

        self.run_jobs(|done| {
            jobs.par_iter()
                .map(|&(i, j)| {
                    if self.cancelled() {
                        return None;
                    }
                    let tile = self.fetch_pair(locations[i], locations[j], i, j);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    self.progress.on_progress("matrix", finished, jobs.len());
                    Some(tile)
                })
                .collect()
        })
    }

    /// Run `body` on a bounded worker pool. Workers observe the cancel flag
    /// at chunk boundaries and emit `None` once it is set.
    fn run_jobs<F>(&self, body: F) -> Result<Vec<FetchedTile>, GatewayError>
    where
        F: FnOnce(&AtomicUsize) -> Vec<Option<FetchedTile>> + Send,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;

        let done = AtomicUsize::new(0);
        let tiles = pool.install(|| body(&done));

        if self.cancelled() {
            return Err(GatewayError::ProviderUnavailable("build cancelled".into()));
        }
        Ok(tiles.into_iter().flatten().collect())
    }

    /// Fetch one sources x targets tile with the full fallback ladder:
    /// transient retry with exponential backoff, split on `RequestTooLarge`,
    /// great-circle degrade on anything persistent.
    fn fetch_tile(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        row_offset: usize,
        col_offset: usize,
    ) -> FetchedTile {
        let mut delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut attempts = 0u32;

        loop {
            match self
                .gateway
                .table(sources, targets, self.departure_hhmm.as_deref())
            {
                Ok(chunk) => {
                    return FetchedTile {
                        row_offset,
                        col_offset,
                        chunk,
                        degraded: 0,
                    }
                }
                Err(GatewayError::RequestTooLarge { .. }) => {
                    return self.split_tile(sources, targets, row_offset, col_offset);
                }
                Err(err) if err.is_transient() && attempts < self.config.max_retries => {
                    attempts += 1;
                    debug!(attempts, error = %err, "retrying chunk after transient failure");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(err) => {
                    warn!(
                        rows = sources.len(),
                        cols = targets.len(),
                        error = %err,
                        "chunk degraded to great-circle estimates"
                    );
                    return self.degrade_tile(sources, targets, row_offset, col_offset);
                }
            }
        }
    }

    /// Halve the oversized tile along its longer edge and fetch both halves.
    fn split_tile(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        row_offset: usize,
        col_offset: usize,
    ) -> FetchedTile {
        if sources.len() <= 1 && targets.len() <= 1 {
            // Cannot split further; a single-cell request that is "too large"
            // means the provider is unusable for this pair.
            return self.degrade_tile(sources, targets, row_offset, col_offset);
        }

        let (first, second) = if sources.len() >= targets.len() {
            let mid = sources.len() / 2;
            (
                self.fetch_tile(&sources[..mid], targets, row_offset, col_offset),
                self.fetch_tile(&sources[mid..], targets, row_offset + mid, col_offset),
            )
        } else {
            let mid = targets.len() / 2;
            (
                self.fetch_tile(sources, &targets[..mid], row_offset, col_offset),
                self.fetch_tile(sources, &targets[mid..], row_offset, col_offset + mid),
            )
        };

        merge_tiles(first, second, row_offset, col_offset, sources.len(), targets.len())
    }

    fn degrade_tile(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        row_offset: usize,
        col_offset: usize,
    ) -> FetchedTile {
        let chunk = self
            .fallback
            .table(sources, targets, None)
            .unwrap_or_else(|_| MatrixChunk {
                distances_m: vec![vec![0; targets.len()]; sources.len()],
                durations_s: vec![vec![0; targets.len()]; sources.len()],
            });
        FetchedTile {
            row_offset,
            col_offset,
            degraded: sources.len() * targets.len(),
            chunk,
        }
    }

    fn fetch_pair(&self, from: Coordinate, to: Coordinate, row: usize, col: usize) -> FetchedTile {
        let mut delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut attempts = 0u32;
        loop {
            match self.gateway.route(&[from, to]) {
                Ok(summary) => {
                    return FetchedTile {
                        row_offset: row,
                        col_offset: col,
                        chunk: MatrixChunk {
                            distances_m: vec![vec![summary.distance_m]],
                            durations_s: vec![vec![summary.duration_s]],
                        },
                        degraded: 0,
                    }
                }
                Err(err) if err.is_transient() && attempts < self.config.max_retries => {
                    attempts += 1;
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(_) => {
                    let (m, s) = self.fallback.estimate(from, to);
                    return FetchedTile {
                        row_offset: row,
                        col_offset: col,
                        chunk: MatrixChunk {
                            distances_m: vec![vec![m]],
                            durations_s: vec![vec![s]],
                        },
                        degraded: 1,
                    };
                }
            }
        }
    }
}

/// Stitch two sibling tiles produced by a split back into one tile addressed
/// at the parent's offsets.
fn merge_tiles(
    first: FetchedTile,
    second: FetchedTile,
    row_offset: usize,
    col_offset: usize,
    rows: usize,
    cols: usize,
) -> FetchedTile {
    let mut distances = vec![vec![0i32; cols]; rows];
    let mut durations = vec![vec![0i32; cols]; rows];
    let degraded = first.degraded + second.degraded;

    for tile in [first, second] {
        let local_row = tile.row_offset - row_offset;
        let local_col = tile.col_offset - col_offset;
        for (r, row) in tile.chunk.distances_m.iter().enumerate() {
            distances[local_row + r][local_col..local_col + row.len()].copy_from_slice(row);
        }
        for (r, row) in tile.chunk.durations_s.iter().enumerate() {
            durations[local_row + r][local_col..local_col + row.len()].copy_from_slice(row);
        }
    }

    FetchedTile {
        row_offset,
        col_offset,
        chunk: MatrixChunk {
            distances_m: distances,
            durations_s: durations,
        },
        degraded,
    }
}
