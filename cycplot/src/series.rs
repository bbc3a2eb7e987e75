// Helpers that reduce cycles or samples to plottable point sequences.

use serde::{Deserialize, Serialize};

use crate::range::RangeFilter;
use crate::simplify::{simplify, simplify_dual};
use crate::units::UnitTransform;
use crate::{
    Cycle, CycleError, Point, Point2Y, Sample, SeriesParams, Step, DEFAULT_MAX_POINTS_PER_SERIES,
};

/// Charge capacities at or below this magnitude yield a zero efficiency.
const MIN_CHARGE_CAPACITY: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    Charge,
    Discharge,
}

impl Phase {
    pub fn from_id(id: &str) -> Result<Self, CycleError> {
        match id.trim().to_ascii_lowercase().as_str() {
            "charge" => Ok(Phase::Charge),
            "discharge" => Ok(Phase::Discharge),
            _ => Err(CycleError::InvalidParameter(format!(
                "unknown phase '{}'",
                id.trim()
            ))),
        }
    }

    pub fn matches(self, step: Step) -> bool {
        match self {
            Phase::Charge => step.is_charge(),
            Phase::Discharge => step.is_discharge(),
        }
    }

    pub fn enabled(self, params: &SeriesParams) -> bool {
        match self {
            Phase::Charge => params.charge_enabled,
            Phase::Discharge => params.discharge_enabled,
        }
    }
}

/// Per-cycle value selector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CycleMetric {
    EndCurrent,
    DischargeEndCurrent,
    StartCurrent,
    StartDischargeCurrent,
    EndVoltage,
    DischargeEndVoltage,
    StartChargeVoltage,
    StartDischargeVoltage,
    MidVoltage,
    ChargeCapacity,
    DischargeCapacity,
    ChargeCapacityRetention,
    DischargeCapacityRetention,
    ChargeEnergy,
    DischargeEnergy,
    Power,
    DischargePower,
    ResistanceOhms,
    DischargeResistance,
    Temperature,
    Time,
    CoulombicEfficiency,
    CoulombicEfficiencyAverage,
}

impl CycleMetric {
    pub const ALL: [CycleMetric; 23] = [
        CycleMetric::EndCurrent,
        CycleMetric::DischargeEndCurrent,
        CycleMetric::StartCurrent,
        CycleMetric::StartDischargeCurrent,
        CycleMetric::EndVoltage,
        CycleMetric::DischargeEndVoltage,
        CycleMetric::StartChargeVoltage,
        CycleMetric::StartDischargeVoltage,
        CycleMetric::MidVoltage,
        CycleMetric::ChargeCapacity,
        CycleMetric::DischargeCapacity,
        CycleMetric::ChargeCapacityRetention,
        CycleMetric::DischargeCapacityRetention,
        CycleMetric::ChargeEnergy,
        CycleMetric::DischargeEnergy,
        CycleMetric::Power,
        CycleMetric::DischargePower,
        CycleMetric::ResistanceOhms,
        CycleMetric::DischargeResistance,
        CycleMetric::Temperature,
        CycleMetric::Time,
        CycleMetric::CoulombicEfficiency,
        CycleMetric::CoulombicEfficiencyAverage,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            CycleMetric::EndCurrent => "end_current",
            CycleMetric::DischargeEndCurrent => "discharge_end_current",
            CycleMetric::StartCurrent => "start_current",
            CycleMetric::StartDischargeCurrent => "start_discharge_current",
            CycleMetric::EndVoltage => "end_voltage",
            CycleMetric::DischargeEndVoltage => "discharge_end_voltage",
            CycleMetric::StartChargeVoltage => "start_charge_voltage",
            CycleMetric::StartDischargeVoltage => "start_discharge_voltage",
            CycleMetric::MidVoltage => "mid_voltage",
            CycleMetric::ChargeCapacity => "charge_capacity",
            CycleMetric::DischargeCapacity => "discharge_capacity",
            CycleMetric::ChargeCapacityRetention => "charge_capacity_retention",
            CycleMetric::DischargeCapacityRetention => "discharge_capacity_retention",
            CycleMetric::ChargeEnergy => "charge_energy",
            CycleMetric::DischargeEnergy => "discharge_energy",
            CycleMetric::Power => "power",
            CycleMetric::DischargePower => "discharge_power",
            CycleMetric::ResistanceOhms => "resistance_ohms",
            CycleMetric::DischargeResistance => "discharge_resistance",
            CycleMetric::Temperature => "temperature",
            CycleMetric::Time => "time",
            CycleMetric::CoulombicEfficiency => "coulombic_efficiency",
            CycleMetric::CoulombicEfficiencyAverage => "coulombic_efficiency_average",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CycleMetric::EndCurrent => "End current (charge)",
            CycleMetric::DischargeEndCurrent => "End current (discharge)",
            CycleMetric::StartCurrent => "Start current (charge)",
            CycleMetric::StartDischargeCurrent => "Start current (discharge)",
            CycleMetric::EndVoltage => "End voltage (charge)",
            CycleMetric::DischargeEndVoltage => "End voltage (discharge)",
            CycleMetric::StartChargeVoltage => "Start voltage (charge)",
            CycleMetric::StartDischargeVoltage => "Start voltage (discharge)",
            CycleMetric::MidVoltage => "Mid voltage",
            CycleMetric::ChargeCapacity => "Capacity (charge)",
            CycleMetric::DischargeCapacity => "Capacity (discharge)",
            CycleMetric::ChargeCapacityRetention => "Capacity retention (charge)",
            CycleMetric::DischargeCapacityRetention => "Capacity retention (discharge)",
            CycleMetric::ChargeEnergy => "Energy (charge)",
            CycleMetric::DischargeEnergy => "Energy (discharge)",
            CycleMetric::Power => "Power (charge)",
            CycleMetric::DischargePower => "Power (discharge)",
            CycleMetric::ResistanceOhms => "Resistance (charge)",
            CycleMetric::DischargeResistance => "Resistance (discharge)",
            CycleMetric::Temperature => "Temperature",
            CycleMetric::Time => "Cycle duration",
            CycleMetric::CoulombicEfficiency => "Coulombic efficiency",
            CycleMetric::CoulombicEfficiencyAverage => "Coulombic efficiency (average)",
        }
    }

    pub fn from_id(id: &str) -> Result<Self, CycleError> {
        let normalized = id.trim().to_ascii_lowercase();
        CycleMetric::ALL
            .into_iter()
            .find(|m| m.id() == normalized)
            .ok_or_else(|| CycleError::UnknownMetric(id.trim().to_string()))
    }

    /// Phase the metric belongs to, if any. Disabled phases yield empty series.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            CycleMetric::EndCurrent
            | CycleMetric::StartCurrent
            | CycleMetric::EndVoltage
            | CycleMetric::StartChargeVoltage
            | CycleMetric::ChargeCapacity
            | CycleMetric::ChargeCapacityRetention
            | CycleMetric::ChargeEnergy
            | CycleMetric::Power
            | CycleMetric::ResistanceOhms => Some(Phase::Charge),
            CycleMetric::DischargeEndCurrent
            | CycleMetric::StartDischargeCurrent
            | CycleMetric::DischargeEndVoltage
            | CycleMetric::StartDischargeVoltage
            | CycleMetric::DischargeCapacity
            | CycleMetric::DischargeCapacityRetention
            | CycleMetric::DischargeEnergy
            | CycleMetric::DischargePower
            | CycleMetric::DischargeResistance => Some(Phase::Discharge),
            CycleMetric::MidVoltage
            | CycleMetric::Temperature
            | CycleMetric::Time
            | CycleMetric::CoulombicEfficiency
            | CycleMetric::CoulombicEfficiencyAverage => None,
        }
    }

    pub fn value(&self, cycle: &Cycle) -> Option<f64> {
        match self {
            CycleMetric::EndCurrent => cycle.end_current,
            CycleMetric::DischargeEndCurrent => cycle.discharge_end_current,
            CycleMetric::StartCurrent => cycle.start_current,
            CycleMetric::StartDischargeCurrent => cycle.start_discharge_current,
            CycleMetric::EndVoltage => cycle.end_voltage,
            CycleMetric::DischargeEndVoltage => cycle.discharge_end_voltage,
            CycleMetric::StartChargeVoltage => cycle.start_charge_voltage,
            CycleMetric::StartDischargeVoltage => cycle.start_discharge_voltage,
            CycleMetric::MidVoltage => cycle.mid_voltage,
            CycleMetric::ChargeCapacity => cycle.charge_capacity,
            CycleMetric::DischargeCapacity => cycle.discharge_capacity,
            CycleMetric::ChargeCapacityRetention => cycle.charge_capacity_retention,
            CycleMetric::DischargeCapacityRetention => cycle.discharge_capacity_retention,
            CycleMetric::ChargeEnergy => cycle.charge_energy,
            CycleMetric::DischargeEnergy => cycle.discharge_energy,
            CycleMetric::Power => cycle.power,
            CycleMetric::DischargePower => cycle.discharge_power,
            CycleMetric::ResistanceOhms => cycle.resistance_ohms,
            CycleMetric::DischargeResistance => cycle.discharge_resistance,
            CycleMetric::Temperature => cycle.temperature,
            CycleMetric::Time => cycle.time,
            CycleMetric::CoulombicEfficiency => coulombic_efficiency(cycle),
            CycleMetric::CoulombicEfficiencyAverage => cycle
                .statistics
                .as_ref()
                .and_then(|s| s.coulombic_efficiency_average),
        }
    }

    pub fn std_dev(&self, cycle: &Cycle) -> Option<f64> {
        let stats = cycle.statistics.as_ref()?;
        match self {
            CycleMetric::EndCurrent => stats.end_current_std_dev,
            CycleMetric::DischargeEndCurrent => stats.discharge_end_current_std_dev,
            CycleMetric::EndVoltage => stats.end_voltage_std_dev,
            CycleMetric::DischargeEndVoltage => stats.discharge_end_voltage_std_dev,
            CycleMetric::MidVoltage => stats.mid_voltage_std_dev,
            CycleMetric::ChargeCapacity => stats.charge_capacity_std_dev,
            CycleMetric::DischargeCapacity => stats.discharge_capacity_std_dev,
            CycleMetric::ChargeCapacityRetention => stats.charge_capacity_retention_std_dev,
            CycleMetric::DischargeCapacityRetention => stats.discharge_capacity_retention_std_dev,
            CycleMetric::ChargeEnergy => stats.charge_energy_std_dev,
            CycleMetric::DischargeEnergy => stats.discharge_energy_std_dev,
            CycleMetric::Power => stats.power_std_dev,
            CycleMetric::DischargePower => stats.discharge_power_std_dev,
            CycleMetric::ResistanceOhms => stats.resistance_ohms_std_dev,
            CycleMetric::DischargeResistance => stats.discharge_resistance_std_dev,
            CycleMetric::CoulombicEfficiency | CycleMetric::CoulombicEfficiencyAverage => {
                stats.coulombic_efficiency_std_dev
            }
            CycleMetric::StartCurrent
            | CycleMetric::StartDischargeCurrent
            | CycleMetric::StartChargeVoltage
            | CycleMetric::StartDischargeVoltage
            | CycleMetric::Temperature
            | CycleMetric::Time => None,
        }
    }
}

/// Per-sample value selector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SampleField {
    Time,
    Current,
    Voltage,
    Capacity,
    Energy,
    DischargeEnergy,
    Temperature,
}

impl SampleField {
    pub const ALL: [SampleField; 7] = [
        SampleField::Time,
        SampleField::Current,
        SampleField::Voltage,
        SampleField::Capacity,
        SampleField::Energy,
        SampleField::DischargeEnergy,
        SampleField::Temperature,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            SampleField::Time => "time",
            SampleField::Current => "current",
            SampleField::Voltage => "voltage",
            SampleField::Capacity => "capacity",
            SampleField::Energy => "energy",
            SampleField::DischargeEnergy => "discharge_energy",
            SampleField::Temperature => "temperature",
        }
    }

    pub fn from_id(id: &str) -> Result<Self, CycleError> {
        let normalized = id.trim().to_ascii_lowercase();
        SampleField::ALL
            .into_iter()
            .find(|f| f.id() == normalized)
            .ok_or_else(|| CycleError::UnknownMetric(id.trim().to_string()))
    }

    pub fn value(&self, sample: &Sample) -> Option<f64> {
        match self {
            SampleField::Time => Some(sample.time),
            SampleField::Current => sample.current,
            SampleField::Voltage => sample.voltage,
            SampleField::Capacity => sample.capacity,
            SampleField::Energy => sample.energy,
            SampleField::DischargeEnergy => sample.discharge_energy,
            SampleField::Temperature => sample.temperature,
        }
    }
}

/// Discharge over charge capacity in percent.
///
/// A missing or near-zero charge capacity gives 0; a missing discharge
/// capacity or a non-finite ratio gives `None`.
pub fn coulombic_efficiency(cycle: &Cycle) -> Option<f64> {
    match cycle.charge_capacity {
        Some(charge) if charge.abs() > MIN_CHARGE_CAPACITY => cycle
            .discharge_capacity
            .map(|discharge| 100.0 * (discharge / charge))
            .filter(|v| v.is_finite()),
        _ => Some(0.0),
    }
}

/// Apply cycle bounds, every-nth thinning and the custom range filter.
pub fn filter_cycles<'a>(cycles: &'a [Cycle], params: &SeriesParams) -> Vec<&'a Cycle> {
    let last_cycle_index = cycles.last().map_or(0, |c| c.index);
    let custom = params.cycle_filter();
    let every_nth = params.every_nth_cycle.filter(|n| *n > 0);
    let first = params.from_cycle.unwrap_or(1);
    let last = params.to_cycle.unwrap_or(last_cycle_index);

    cycles
        .iter()
        .filter(|c| params.from_cycle.map_or(true, |from| c.index >= from))
        .filter(|c| params.to_cycle.map_or(true, |to| c.index <= to))
        .filter(|c| {
            every_nth.map_or(true, |n| {
                (i64::from(c.index) - i64::from(first) + 1) % i64::from(n) == 0
                    || c.index == first
                    || c.index == last
                    || c.index == last_cycle_index
            })
        })
        .filter(|c| custom.as_ref().map_or(true, |f| f.contains(c.index)))
        .collect()
}

/// Every-nth step forced on every channel when their cycles together exceed
/// `max_cycles`. `None` when no thinning is needed or the configured
/// `every_nth_cycle` already thins at least as much.
pub fn forced_every_nth(channels: &[&[Cycle]], params: &SeriesParams) -> Option<i32> {
    let max_cycles = params.max_cycles.filter(|m| *m > 0)?;
    let total: usize = channels.iter().map(|cycles| cycles.len()).sum();
    if channels.is_empty() || total <= max_cycles {
        return None;
    }

    let per_channel = (max_cycles / channels.len()).saturating_sub(1).max(1);
    let custom = params.cycle_filter();
    let forced = channels
        .iter()
        .map(|cycles| {
            let selected = match custom.as_ref() {
                Some(filter) => filter.items().len(),
                None => {
                    let count = cycles.len() as i64;
                    let from = i64::from(params.from_cycle.unwrap_or(1)).max(1);
                    let to = params.to_cycle.map_or(count, i64::from).min(count);
                    usize::try_from(to - from + 1).unwrap_or(0)
                }
            };
            selected.div_ceil(per_channel)
        })
        .max()?;

    let forced = i32::try_from(forced).ok().filter(|n| *n >= 2)?;
    if params.every_nth_cycle.is_some_and(|n| n >= forced) {
        return None;
    }
    Some(forced)
}

/// Drop points outside `[min_y, max_y]`.
pub fn apply_y_filter(mut points: Vec<Point>, params: &SeriesParams) -> Vec<Point> {
    if let Some(min) = params.min_y {
        points.retain(|p| p.y >= min);
    }
    if let Some(max) = params.max_y {
        points.retain(|p| p.y <= max);
    }
    points
}

/// One point per selected cycle: `(cycle index, value)`, with error bars when
/// the cycle carries statistics for the metric.
pub fn cycle_series<U: UnitTransform + ?Sized>(
    cycles: &[Cycle],
    metric: CycleMetric,
    params: &SeriesParams,
    unit: &U,
) -> Vec<Point> {
    if metric.phase().is_some_and(|p| !p.enabled(params)) {
        return Vec::new();
    }

    let points = filter_cycles(cycles, params)
        .into_iter()
        .filter_map(|cycle| {
            let y = unit.apply(metric.value(cycle)?);
            if !y.is_finite() {
                return None;
            }
            let dev = metric.std_dev(cycle).map(|d| unit.apply(d));
            Some(Point {
                x: cycle.index as f64,
                y,
                low_error: dev.map(|d| y - d),
                high_error: dev.map(|d| y + d),
            })
        })
        .collect();
    apply_y_filter(points, params)
}

/// Two metrics per selected cycle sharing the cycle-index axis. Cycles missing
/// either value are skipped.
pub fn cycle_series_dual<U: UnitTransform + ?Sized>(
    cycles: &[Cycle],
    y1: CycleMetric,
    y2: CycleMetric,
    params: &SeriesParams,
    unit: &U,
) -> Vec<Point2Y> {
    filter_cycles(cycles, params)
        .into_iter()
        .filter_map(|cycle| {
            let a = unit.apply(y1.value(cycle)?);
            let b = unit.apply(y2.value(cycle)?);
            (a.is_finite() && b.is_finite()).then(|| Point2Y::new(cycle.index as f64, a, b))
        })
        .collect()
}

/// Points from one cycle's samples, optionally restricted to a phase.
pub fn sample_series(
    samples: &[Sample],
    cycle: &Cycle,
    x: SampleField,
    y: SampleField,
    phase: Option<Phase>,
    params: &SeriesParams,
) -> Vec<Point> {
    if phase.is_some_and(|p| !p.enabled(params)) {
        return Vec::new();
    }
    let points = samples[cycle.sample_range()]
        .iter()
        .filter(|s| phase.map_or(true, |p| p.matches(s.step)))
        .filter_map(|s| Some(Point::new(x.value(s)?, y.value(s)?)))
        .collect();
    apply_y_filter(points, params)
}

/// Running difference quotient `dy/dx` over one phase of a cycle, e.g. dQ/dV
/// with `x = Voltage, y = Capacity`.
pub fn derivative_series(
    samples: &[Sample],
    cycle: &Cycle,
    phase: Phase,
    x: SampleField,
    y: SampleField,
    params: &SeriesParams,
) -> Vec<Point> {
    if !phase.enabled(params) {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut anchor: Option<(f64, f64)> = None;
    for sample in samples[cycle.sample_range()]
        .iter()
        .filter(|s| phase.matches(s.step))
    {
        let (Some(cx), Some(cy)) = (x.value(sample), y.value(sample)) else {
            continue;
        };
        let Some((px, py)) = anchor else {
            anchor = Some((cx, cy));
            continue;
        };

        let dx = cx - px;
        if params.threshold.is_some_and(|t| dx.abs() < t) {
            continue;
        }
        let value = (cy - py) / dx;
        if !value.is_finite() {
            continue;
        }
        anchor = Some((cx, cy));

        if params.min_y.is_some_and(|min| value < min) || params.max_y.is_some_and(|max| value > max)
        {
            continue;
        }
        out.push(Point::new(cx, value));
    }
    out
}

/// Inclusive voltage window for state-of-charge curves.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct VoltageWindow {
    pub from: f64,
    pub to: f64,
}

impl VoltageWindow {
    pub fn contains(&self, voltage: f64) -> bool {
        voltage >= self.from && voltage <= self.to
    }
}

/// Voltage against state of charge, one curve per selected cycle.
///
/// Only samples inside `window` with a non-zero capacity count; charge takes
/// positive currents and discharge negative ones. Capacity is normalised to the
/// amount swept inside the window, and discharge curves count down from 100.
/// Cycles without qualifying samples are left out.
pub fn soc_series(
    samples: &[Sample],
    cycles: &[Cycle],
    phase: Phase,
    window: VoltageWindow,
    params: &SeriesParams,
) -> Vec<(i32, Vec<Point>)> {
    if !phase.enabled(params) {
        return Vec::new();
    }

    filter_cycles(cycles, params)
        .into_iter()
        .filter_map(|cycle| {
            let in_window: Vec<(f64, f64)> = samples[cycle.sample_range()]
                .iter()
                .filter_map(|s| {
                    let (current, voltage, capacity) = (s.current?, s.voltage?, s.capacity?);
                    let in_phase = match phase {
                        Phase::Charge => current > 0.0,
                        Phase::Discharge => current < 0.0,
                    };
                    (in_phase && capacity != 0.0 && window.contains(voltage))
                        .then_some((capacity, voltage))
                })
                .collect();

            let first = in_window.first()?.0;
            let swept = in_window.last()?.0 - first;
            let denominator = if swept > 0.0 { swept } else { 1.0 };
            let points = in_window
                .iter()
                .map(|&(capacity, voltage)| {
                    let fraction = (capacity - first) / denominator;
                    let soc = match phase {
                        Phase::Charge => fraction * 100.0,
                        Phase::Discharge => (1.0 - fraction) * 100.0,
                    };
                    Point::new(soc.abs(), voltage)
                })
                .collect();
            let points = apply_y_filter(points, params);
            (!points.is_empty()).then_some((cycle.index, points))
        })
        .collect()
}

fn simplification_enabled(params: &SeriesParams) -> bool {
    params.simplification > 0 || params.max_points_per_series.is_some()
}

/// Bound a finished series before it is handed to the consumer.
pub fn finish_series(points: Vec<Point>, params: &SeriesParams) -> Vec<Point> {
    if !simplification_enabled(params) {
        return points;
    }
    simplify(
        &points,
        params
            .max_points_per_series
            .unwrap_or(DEFAULT_MAX_POINTS_PER_SERIES),
    )
}

pub fn finish_dual_series(points: Vec<Point2Y>, params: &SeriesParams) -> Vec<Point2Y> {
    if !simplification_enabled(params) {
        return points;
    }
    simplify_dual(
        &points,
        params
            .max_points_per_series
            .unwrap_or(DEFAULT_MAX_POINTS_PER_SERIES),
    )
}
