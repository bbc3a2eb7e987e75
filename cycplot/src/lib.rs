//! Core cycle statistics and series simplification library for charge/discharge test data.

pub mod cycles;
pub mod range;
pub mod series;
pub mod simplify;
pub mod units;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cycles::{extract_channels, extract_cycles, Extraction, EARLY_CYCLE_WINDOW};
pub use range::{IndexRangeFilter, RangeFilter};
pub use series::{
    apply_y_filter, coulombic_efficiency, cycle_series, cycle_series_dual, derivative_series,
    filter_cycles, finish_dual_series, finish_series, forced_every_nth, sample_series, soc_series,
    CycleMetric, Phase, SampleField, VoltageWindow,
};
pub use simplify::{simplify, simplify_dual, DualVertex, Vertex};
pub use units::{Scale, UnitTransform};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid cycle range: {0}")]
    InvalidRange(String),
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
}

/// Sub-phase of a cycle as reported by the instrument.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Step {
    #[serde(rename = "rest")]
    Rest,
    #[serde(rename = "charge_cc")]
    ChargeConstantCurrent,
    #[serde(rename = "charge_cv")]
    ChargeConstantVoltage,
    #[serde(rename = "discharge")]
    Discharge,
}

impl Default for Step {
    fn default() -> Self {
        Step::Rest
    }
}

impl Step {
    pub fn is_charge(self) -> bool {
        matches!(self, Step::ChargeConstantCurrent | Step::ChargeConstantVoltage)
    }

    pub fn is_discharge(self) -> bool {
        self == Step::Discharge
    }

    pub fn is_rest(self) -> bool {
        self == Step::Rest
    }
}

/// One instrument reading. Optional fields stay `None` when the instrument did not report them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub cycle_index: i32,
    pub time: f64,
    pub step: Step,
    pub current: Option<f64>,
    pub voltage: Option<f64>,
    pub capacity: Option<f64>,
    pub energy: Option<f64>,
    pub discharge_energy: Option<f64>,
    pub temperature: Option<f64>,
}

impl Sample {
    pub fn new(cycle_index: i32, time: f64, step: Step) -> Self {
        Self {
            cycle_index,
            time,
            step,
            ..Self::default()
        }
    }
}

/// Standard deviations computed by an external aggregator over several channels.
/// Carried through extraction untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StatisticsMetadata {
    pub end_current_std_dev: Option<f64>,
    pub discharge_end_current_std_dev: Option<f64>,
    pub mid_voltage_std_dev: Option<f64>,
    pub end_voltage_std_dev: Option<f64>,
    pub discharge_end_voltage_std_dev: Option<f64>,
    pub charge_capacity_std_dev: Option<f64>,
    pub discharge_capacity_std_dev: Option<f64>,
    pub discharge_energy_std_dev: Option<f64>,
    pub charge_energy_std_dev: Option<f64>,
    pub power_std_dev: Option<f64>,
    pub discharge_power_std_dev: Option<f64>,
    pub resistance_ohms_std_dev: Option<f64>,
    pub discharge_resistance_std_dev: Option<f64>,
    pub coulombic_efficiency_std_dev: Option<f64>,
    pub coulombic_efficiency_average: Option<f64>,
    pub charge_capacity_retention_std_dev: Option<f64>,
    pub discharge_capacity_retention_std_dev: Option<f64>,
}

/// Per-cycle metrics. `first_sample_index`/`sample_count` address the reordered
/// sample sequence returned alongside the cycles.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Cycle {
    pub index: i32,
    pub first_sample_index: usize,
    pub sample_count: usize,
    /// Duration in seconds between the first and last sample of the cycle.
    pub time: Option<f64>,
    pub end_current: Option<f64>,
    pub discharge_end_current: Option<f64>,
    pub mid_voltage: Option<f64>,
    pub end_voltage: Option<f64>,
    pub discharge_end_voltage: Option<f64>,
    pub charge_capacity: Option<f64>,
    pub discharge_capacity: Option<f64>,
    pub charge_capacity_retention: Option<f64>,
    pub discharge_capacity_retention: Option<f64>,
    pub power: Option<f64>,
    pub discharge_power: Option<f64>,
    pub charge_energy: Option<f64>,
    pub discharge_energy: Option<f64>,
    pub temperature: Option<f64>,
    pub end_rest_voltage: Option<f64>,
    pub end_rest_discharge_voltage: Option<f64>,
    pub start_current: Option<f64>,
    pub start_discharge_current: Option<f64>,
    pub start_charge_voltage: Option<f64>,
    pub start_discharge_voltage: Option<f64>,
    pub start_resistance_current: Option<f64>,
    pub start_resistance_voltage: Option<f64>,
    pub start_resistance_discharge_current: Option<f64>,
    pub start_resistance_discharge_voltage: Option<f64>,
    pub resistance_ohms: Option<f64>,
    pub discharge_resistance: Option<f64>,
    pub statistics: Option<StatisticsMetadata>,
}

impl Cycle {
    fn new(index: i32, first_sample_index: usize, sample_count: usize) -> Self {
        Self {
            index,
            first_sample_index,
            sample_count,
            ..Self::default()
        }
    }

    /// Range of this cycle's samples inside the reordered sample sequence.
    pub fn sample_range(&self) -> std::ops::Range<usize> {
        self.first_sample_index..self.first_sample_index + self.sample_count
    }
}

/// A plotted point. Error bars are only present for cycle series backed by statistics.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub low_error: Option<f64>,
    pub high_error: Option<f64>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            low_error: None,
            high_error: None,
        }
    }
}

/// A point carrying two y channels sharing one x axis.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Point2Y {
    pub x: f64,
    pub y1: f64,
    pub y2: f64,
}

impl Point2Y {
    pub fn new(x: f64, y1: f64, y2: f64) -> Self {
        Self { x, y1, y2 }
    }
}

pub const DEFAULT_MAX_POINTS_PER_SERIES: usize = 1000;

/// Selection and post-processing settings for series assembly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeriesParams {
    pub max_points_per_series: Option<usize>,
    pub simplification: u32,
    pub from_cycle: Option<i32>,
    pub to_cycle: Option<i32>,
    pub every_nth_cycle: Option<i32>,
    /// Cap on plotted cycles across all channels; exceeding it forces an
    /// every-nth thinning.
    pub max_cycles: Option<usize>,
    pub custom_cycle_filter: Option<String>,
    pub charge_enabled: bool,
    pub discharge_enabled: bool,
    /// Minimum |dx| accepted by derivative series.
    pub threshold: Option<f64>,
    pub min_y: Option<f64>,
    pub max_y: Option<f64>,
}

impl Default for SeriesParams {
    fn default() -> Self {
        Self {
            max_points_per_series: None,
            simplification: 0,
            from_cycle: None,
            to_cycle: None,
            every_nth_cycle: None,
            max_cycles: None,
            custom_cycle_filter: None,
            charge_enabled: true,
            discharge_enabled: true,
            threshold: None,
            min_y: None,
            max_y: None,
        }
    }
}

impl SeriesParams {
    pub fn validate(&self) -> Result<(), CycleError> {
        if let Some(n) = self.every_nth_cycle {
            if n <= 0 {
                return Err(CycleError::InvalidParameter(format!(
                    "every_nth_cycle must be > 0 (got {n})"
                )));
            }
        }
        if let (Some(from), Some(to)) = (self.from_cycle, self.to_cycle) {
            if from > to {
                return Err(CycleError::InvalidParameter(format!(
                    "from_cycle {from} is after to_cycle {to}"
                )));
            }
        }
        if let Some(max) = self.max_points_per_series {
            if max < 2 {
                return Err(CycleError::InvalidParameter(
                    "max_points_per_series must be at least 2".into(),
                ));
            }
        }
        if let Some(threshold) = self.threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(CycleError::InvalidParameter(format!(
                    "threshold must be a finite non-negative number (got {threshold})"
                )));
            }
        }
        if let (Some(lo), Some(hi)) = (self.min_y, self.max_y) {
            if lo > hi {
                return Err(CycleError::InvalidParameter(format!(
                    "min_y {lo} exceeds max_y {hi}"
                )));
            }
        }
        if let Some(filter) = self.custom_cycle_filter.as_deref() {
            filter.parse::<IndexRangeFilter>()?;
        }
        Ok(())
    }

    /// Parsed custom cycle filter. Filters without a usable range count as unset.
    pub fn cycle_filter(&self) -> Option<IndexRangeFilter> {
        self.custom_cycle_filter
            .as_deref()
            .map(IndexRangeFilter::new)
            .filter(|f| !f.is_empty())
    }

    pub fn from_json_str(text: &str) -> Result<Self, CycleError> {
        let params: SeriesParams =
            serde_json::from_str(text).map_err(|e| CycleError::InvalidParameter(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}
