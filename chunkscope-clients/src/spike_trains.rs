//! Spike trains stored as a flat, ragged `spike_times` dataset.
//!
//! A units table stores every unit's spikes back to back in one dataset;
//! `<kind>_index` holds the cumulative end offset of each unit and `id` the
//! unit identifiers. Each unit gets its own [`TimestampFinder`] over its slice
//! of the flat dataset, so queries only fetch the chunks they touch.

use crate::dataset_timestamps::DatasetTimestamps;
use crate::psth::{align_to_trials, TrialWindow};
use chunkscope_core::util::f64_to_usize_clamped;
use chunkscope_core::{
    Canceler, ClientConfig, Error, LoadStatus, Result, StatusCell, TimestampFinder,
};
use chunkscope_io::dataset::join_path;
use chunkscope_io::{DatasetReader, ReadOptions};
use futures::future;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Identifier of a unit in the units table.
pub type UnitId = i64;

/// Which ragged timestamp dataset the group stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpikeKind {
    /// `spike_times` (sorted units).
    Spikes,
    /// `event_times` (behavioral or detector events).
    Events,
}

impl SpikeKind {
    /// Name of the flat timestamp dataset.
    #[must_use]
    pub fn times_name(self) -> &'static str {
        match self {
            Self::Spikes => "spike_times",
            Self::Events => "event_times",
        }
    }

    /// Name of the cumulative index dataset.
    #[must_use]
    pub fn index_name(self) -> &'static str {
        match self {
            Self::Spikes => "spike_times_index",
            Self::Events => "event_times_index",
        }
    }
}

/// Selection and alignment for [`SpikeTrainsClient::get_data`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeQuery {
    /// Units to return; `None` selects every unit.
    pub unit_ids: Option<Vec<UnitId>>,
    /// Subtracted from every returned time when set.
    pub align_to: Option<f64>,
}

impl SpikeQuery {
    /// Query every unit without alignment.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Query the given units.
    #[must_use]
    pub fn units(unit_ids: impl Into<Vec<UnitId>>) -> Self {
        Self {
            unit_ids: Some(unit_ids.into()),
            align_to: None,
        }
    }

    /// Align returned times to `t`.
    #[must_use]
    pub fn aligned_to(mut self, t: f64) -> Self {
        self.align_to = Some(t);
        self
    }
}

/// Spike times of one unit within a query window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct UnitSpikeTrain {
    /// Unit identifier.
    pub unit_id: UnitId,
    /// Spike times, ascending.
    pub times: Vec<f64>,
}

struct Unit {
    id: UnitId,
    finder: TimestampFinder<DatasetTimestamps>,
}

struct SpikeTrainsMeta {
    kind: SpikeKind,
    units: Vec<Unit>,
    total: usize,
    start_time: f64,
    end_time: f64,
}

impl SpikeTrainsMeta {
    fn unit(&self, id: UnitId) -> Result<&Unit> {
        self.units
            .iter()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::NotFound(format!("unit {id}")))
    }
}

/// Client for the spike trains of one units group.
pub struct SpikeTrainsClient {
    reader: Arc<dyn DatasetReader>,
    group_path: String,
    config: ClientConfig,
    status: StatusCell,
    meta: OnceCell<SpikeTrainsMeta>,
    canceler: Canceler,
}

impl SpikeTrainsClient {
    /// Create a client for the units group at `group_path`. Nothing is read
    /// until [`Self::load`] or the first query.
    pub fn new(
        reader: Arc<dyn DatasetReader>,
        group_path: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        Self {
            reader,
            group_path: group_path.into(),
            config,
            status: StatusCell::new(),
            meta: OnceCell::new(),
            canceler: Canceler::new(),
        }
    }

    /// Current load status.
    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.status.get()
    }

    /// Wait until the metadata is loaded.
    ///
    /// # Errors
    /// Returns [`Error::LoadFailed`] if loading failed.
    pub async fn wait_for_loaded(&self) -> Result<()> {
        self.status.wait_for_loaded().await
    }

    /// Load the unit table (ids, index, time range).
    ///
    /// # Errors
    /// Returns an error if the group lacks spike or event times.
    pub async fn load(&self) -> Result<()> {
        self.meta().await.map(|_| ())
    }

    /// Cancel outstanding work and drop cached chunks.
    pub fn close(&self) {
        self.canceler.cancel();
        if let Some(meta) = self.meta.get() {
            for unit in &meta.units {
                unit.finder.clear();
            }
        }
    }

    async fn meta(&self) -> Result<&SpikeTrainsMeta> {
        self.canceler.check()?;
        self.meta
            .get_or_try_init(|| async {
                self.status.begin_loading();
                let outcome = self.load_meta().await;
                self.status.finish(&outcome);
                outcome
            })
            .await
    }

    async fn read_vec(&self, name: &str) -> Result<Vec<f64>> {
        let path = join_path(&self.group_path, name);
        let options = ReadOptions::default().with_canceler(self.canceler.clone());
        let data = self
            .canceler
            .finish(self.reader.dataset_data(&path, options))
            .await?;
        Ok(data.values)
    }

    async fn load_meta(&self) -> Result<SpikeTrainsMeta> {
        let group = self.reader.group_info(&self.group_path).await?;
        let kind = if group.has_dataset(SpikeKind::Spikes.times_name()) {
            SpikeKind::Spikes
        } else if group.has_dataset(SpikeKind::Events.times_name()) {
            SpikeKind::Events
        } else {
            return Err(Error::NotFound(format!(
                "{}: no spike_times or event_times",
                self.group_path
            )));
        };
        let times_path = join_path(&self.group_path, kind.times_name());
        let total = self.reader.dataset_info(&times_path).await?.len();

        let ends: Vec<usize> = if group.has_dataset(kind.index_name()) {
            self.read_vec(kind.index_name())
                .await?
                .into_iter()
                .map(|v| f64_to_usize_clamped(v, total))
                .collect()
        } else {
            vec![total]
        };
        #[allow(clippy::cast_possible_truncation)]
        let ids: Vec<UnitId> = if group.has_dataset("id") {
            self.read_vec("id")
                .await?
                .into_iter()
                .map(|v| v.round() as UnitId)
                .collect()
        } else {
            (0..).take(ends.len()).collect()
        };
        if ids.len() != ends.len() {
            return Err(Error::InvalidData(format!(
                "{}: {} ids but {} index entries",
                self.group_path,
                ids.len(),
                ends.len()
            )));
        }

        let (start_time, end_time) = if total == 0 {
            (0.0, 0.0)
        } else {
            let first = self
                .reader
                .dataset_data(&times_path, ReadOptions::rows(0..1))
                .await?;
            let last = self
                .reader
                .dataset_data(&times_path, ReadOptions::rows(total - 1..total))
                .await?;
            (
                first.values.first().copied().unwrap_or(0.0),
                last.values.first().copied().unwrap_or(0.0),
            )
        };

        let mut units = Vec::with_capacity(ids.len());
        let mut begin = 0;
        for (id, end) in ids.into_iter().zip(ends) {
            let end = end.max(begin);
            let model = DatasetTimestamps::new(
                Arc::clone(&self.reader),
                times_path.clone(),
                total,
                self.canceler.clone(),
            )
            .slice(format!("unit{id}"), begin, end - begin);
            units.push(Unit {
                id,
                finder: TimestampFinder::new(Arc::new(model), &self.config),
            });
            begin = end;
        }
        log::debug!(
            "{}: {} units, {total} {} from {start_time} to {end_time}",
            self.group_path,
            units.len(),
            kind.times_name()
        );
        Ok(SpikeTrainsMeta {
            kind,
            units,
            total,
            start_time,
            end_time,
        })
    }

    /// Unit identifiers in table order.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn unit_ids(&self) -> Result<Vec<UnitId>> {
        Ok(self.meta().await?.units.iter().map(|u| u.id).collect())
    }

    /// Which timestamp dataset the group stores.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn kind(&self) -> Result<SpikeKind> {
        Ok(self.meta().await?.kind)
    }

    /// Total number of spikes across all units.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn total_num_spikes(&self) -> Result<usize> {
        Ok(self.meta().await?.total)
    }

    /// Number of spikes of one unit.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown unit.
    pub async fn num_spikes_for_unit(&self, unit_id: UnitId) -> Result<usize> {
        Ok(self.meta().await?.unit(unit_id)?.finder.len())
    }

    /// First and last timestamp of the flat dataset.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn time_range(&self) -> Result<(f64, f64)> {
        let meta = self.meta().await?;
        Ok((meta.start_time, meta.end_time))
    }

    /// Start time, once loaded.
    #[must_use]
    pub fn start_time(&self) -> Option<f64> {
        self.meta.get().map(|m| m.start_time)
    }

    /// End time, once loaded.
    #[must_use]
    pub fn end_time(&self) -> Option<f64> {
        self.meta.get().map(|m| m.end_time)
    }

    /// First and last spike time of one unit, `None` when it has no spikes.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown unit or a fetch error.
    pub async fn unit_time_range(&self, unit_id: UnitId) -> Result<Option<(f64, f64)>> {
        let unit = self.meta().await?.unit(unit_id)?;
        let n = unit.finder.len();
        if n == 0 {
            return Ok(None);
        }
        let (first, last) = self
            .canceler
            .finish(future::try_join(
                unit.finder.value_at(0),
                unit.finder.value_at(n - 1),
            ))
            .await?;
        Ok(Some((first, last)))
    }

    async fn unit_window(unit: &Unit, t1: f64, t2: f64, align_to: Option<f64>) -> Result<UnitSpikeTrain> {
        let (i1, i2) = unit.finder.index_range_for_times(t1, t2).await?;
        let raw = unit.finder.data_for_indices(i1, i2).await?;
        let shift = align_to.unwrap_or(0.0);
        let times = raw
            .into_iter()
            .filter(|&t| t >= t1 && t < t2)
            .map(|t| t - shift)
            .collect();
        Ok(UnitSpikeTrain {
            unit_id: unit.id,
            times,
        })
    }

    /// Spike times in `[t1, t2)` for the selected units.
    ///
    /// Units are fetched concurrently; results follow the query order (or the
    /// table order when every unit is selected).
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown unit, [`Error::Canceled`]
    /// after [`Self::close`], or a fetch error.
    pub async fn get_data(&self, t1: f64, t2: f64, query: &SpikeQuery) -> Result<Vec<UnitSpikeTrain>> {
        let meta = self.meta().await?;
        let selected: Vec<&Unit> = match &query.unit_ids {
            Some(ids) => ids.iter().map(|&id| meta.unit(id)).collect::<Result<_>>()?,
            None => meta.units.iter().collect(),
        };
        let trains = self
            .canceler
            .finish(future::try_join_all(
                selected
                    .into_iter()
                    .map(|unit| Self::unit_window(unit, t1, t2, query.align_to)),
            ))
            .await?;
        Ok(trains)
    }

    /// Every spike of one unit.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown unit or a fetch error.
    pub async fn unit_spike_train(&self, unit_id: UnitId) -> Result<Vec<f64>> {
        let unit = self.meta().await?.unit(unit_id)?;
        self.canceler
            .finish(unit.finder.data_for_indices(0, unit.finder.len()))
            .await
    }

    /// Spike times of one unit around each alignment time, relative to it.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown unit or a fetch error.
    pub async fn trial_aligned(
        &self,
        unit_id: UnitId,
        align_times: &[f64],
        window: TrialWindow,
    ) -> Result<Vec<Vec<f64>>> {
        let unit = self.meta().await?.unit(unit_id)?;
        let finite: Vec<f64> = align_times.iter().copied().filter(|t| t.is_finite()).collect();
        let (Some(lo), Some(hi)) = (
            finite.iter().copied().reduce(f64::min),
            finite.iter().copied().reduce(f64::max),
        ) else {
            return Ok(vec![Vec::new(); align_times.len()]);
        };
        let span = Self::unit_window(unit, lo + window.start, hi + window.end, None).await?;
        self.canceler.check()?;
        Ok(align_to_trials(&span.times, align_times, window))
    }
}

impl Drop for SpikeTrainsClient {
    fn drop(&mut self) {
        self.canceler.cancel();
    }
}
