// Cycle extraction: regroups raw samples per cycle and derives per-cycle metrics.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::{Cycle, Sample, Step};

/// Only cycles at positions below this bound may raise the reference capacity
/// once it has been seeded.
pub const EARLY_CYCLE_WINDOW: usize = 10;

/// Result of one extraction call: cycles in ascending index order plus the
/// samples regrouped by cycle and time-sorted within each cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub cycles: Vec<Cycle>,
    pub samples: Vec<Sample>,
}

impl Extraction {
    pub fn cycle_samples(&self, cycle: &Cycle) -> &[Sample] {
        &self.samples[cycle.sample_range()]
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Extract cycles from an unordered sample stream belonging to one channel.
pub fn extract_cycles(samples: Vec<Sample>) -> Extraction {
    info!("Cycle extraction started for {} samples", samples.len());

    let total = samples.len();
    let grouped = group_by_cycle(samples);

    let mut ordered: Vec<Sample> = Vec::with_capacity(total);
    let mut cycles: Vec<Cycle> = Vec::with_capacity(grouped.len());
    let mut last_rest_voltage: Option<f64> = None;

    for (index, group) in grouped {
        let mut cycle = Cycle::new(index, ordered.len(), group.len());
        last_rest_voltage = scan_cycle(&mut cycle, &group, last_rest_voltage);
        ordered.extend(group);
        cycles.push(cycle);
    }
    debug_assert_eq!(ordered.len(), total);

    derive_metrics(&mut cycles, &ordered);

    info!("Cycle extraction finished: {} cycles", cycles.len());
    Extraction {
        cycles,
        samples: ordered,
    }
}

/// Run extraction for several channels. Channels are independent, so they are
/// processed in parallel.
pub fn extract_channels(channels: BTreeMap<i32, Vec<Sample>>) -> BTreeMap<i32, Extraction> {
    channels
        .into_par_iter()
        .map(|(channel, samples)| (channel, extract_cycles(samples)))
        .collect()
}

fn group_by_cycle(samples: Vec<Sample>) -> BTreeMap<i32, Vec<Sample>> {
    let mut grouped: BTreeMap<i32, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        grouped.entry(sample.cycle_index).or_default().push(sample);
    }
    for group in grouped.values_mut() {
        group.sort_by(|a, b| a.time.total_cmp(&b.time));
    }
    grouped
}

/// The charge or discharge half of a cycle's forward-pass fields.
struct PhaseFields<'a> {
    end_current: &'a mut Option<f64>,
    end_voltage: &'a mut Option<f64>,
    end_rest_voltage: &'a mut Option<f64>,
    start_current: &'a mut Option<f64>,
    start_voltage: &'a mut Option<f64>,
    start_resistance_current: &'a mut Option<f64>,
    start_resistance_voltage: &'a mut Option<f64>,
}

impl<'a> PhaseFields<'a> {
    fn charge(cycle: &'a mut Cycle) -> Self {
        Self {
            end_current: &mut cycle.end_current,
            end_voltage: &mut cycle.end_voltage,
            end_rest_voltage: &mut cycle.end_rest_voltage,
            start_current: &mut cycle.start_current,
            start_voltage: &mut cycle.start_charge_voltage,
            start_resistance_current: &mut cycle.start_resistance_current,
            start_resistance_voltage: &mut cycle.start_resistance_voltage,
        }
    }

    fn discharge(cycle: &'a mut Cycle) -> Self {
        Self {
            end_current: &mut cycle.discharge_end_current,
            end_voltage: &mut cycle.discharge_end_voltage,
            end_rest_voltage: &mut cycle.end_rest_discharge_voltage,
            start_current: &mut cycle.start_discharge_current,
            start_voltage: &mut cycle.start_discharge_voltage,
            start_resistance_current: &mut cycle.start_resistance_discharge_current,
            start_resistance_voltage: &mut cycle.start_resistance_discharge_voltage,
        }
    }

    fn observe(self, sample: &Sample, last_rest_voltage: Option<f64>) {
        if sample.current.is_some() {
            *self.end_current = sample.current;
        }
        if sample.voltage.is_some() {
            *self.end_voltage = sample.voltage;
            if self.end_rest_voltage.is_none() {
                *self.end_rest_voltage = last_rest_voltage;
            }
        }

        if self.start_current.is_none() && self.start_voltage.is_none() {
            *self.start_current = sample.current;
            *self.start_voltage = sample.voltage;
        }

        // First in-phase sample once the rest baseline is known.
        if self.end_rest_voltage.is_some()
            && self.start_resistance_current.is_none()
            && self.start_resistance_voltage.is_none()
        {
            *self.start_resistance_current = sample.current;
            *self.start_resistance_voltage = sample.voltage;
        }
    }
}

/// Forward pass over one cycle's time-sorted samples. Returns the rest voltage
/// to carry into the next cycle.
fn scan_cycle(
    cycle: &mut Cycle,
    samples: &[Sample],
    mut last_rest_voltage: Option<f64>,
) -> Option<f64> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return last_rest_voltage;
    };
    cycle.time = Some(last.time - first.time);

    for sample in samples {
        if sample.energy.is_some() {
            cycle.charge_energy = sample.energy;
        }
        if sample.discharge_energy.is_some() {
            cycle.discharge_energy = sample.discharge_energy;
        }

        match sample.step {
            Step::Rest => {
                if sample.voltage.is_some() {
                    last_rest_voltage = sample.voltage;
                }
                continue;
            }
            Step::ChargeConstantCurrent | Step::ChargeConstantVoltage => {
                PhaseFields::charge(cycle).observe(sample, last_rest_voltage)
            }
            Step::Discharge => PhaseFields::discharge(cycle).observe(sample, last_rest_voltage),
        }

        if sample.temperature.is_some() {
            cycle.temperature = sample.temperature;
        }
    }

    if cycle.end_rest_voltage.is_none() {
        cycle.end_rest_voltage = last_rest_voltage;
    }
    if cycle.end_rest_discharge_voltage.is_none() {
        cycle.end_rest_discharge_voltage = last_rest_voltage;
    }
    last_rest_voltage
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ReferenceCapacity {
    value: f64,
    position: usize,
}

fn derive_metrics(cycles: &mut [Cycle], samples: &[Sample]) {
    for cycle in cycles.iter_mut() {
        let slice = &samples[cycle.sample_range()];
        cycle.mid_voltage = mid_voltage(slice);
        cycle.charge_capacity = last_capacity(slice, Step::is_charge);
        cycle.discharge_capacity = last_capacity(slice, Step::is_discharge);
        cycle.power = product(cycle.end_current, cycle.end_voltage);
        // Charge-phase end voltage, not the discharge one.
        cycle.discharge_power = product(cycle.discharge_end_current, cycle.end_voltage);
    }

    populate_resistance(cycles);

    let charge_reference = reference_capacity(cycles, |c| c.charge_capacity);
    let discharge_reference = reference_capacity(cycles, |c| c.discharge_capacity);
    debug!(
        "Reference capacities: charge {:?}, discharge {:?}",
        charge_reference, discharge_reference
    );

    if let Some(reference) = charge_reference {
        for (position, cycle) in cycles.iter_mut().enumerate() {
            cycle.charge_capacity_retention = retention(position, cycle.charge_capacity, reference);
        }
    }
    if let Some(reference) = discharge_reference {
        for (position, cycle) in cycles.iter_mut().enumerate() {
            cycle.discharge_capacity_retention =
                retention(position, cycle.discharge_capacity, reference);
        }
    }
}

fn product(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    a.zip(b).map(|(a, b)| a * b)
}

/// Voltage at the middle of the last run of same-step samples.
fn mid_voltage(samples: &[Sample]) -> Option<f64> {
    let Some(first) = samples.first() else {
        return Some(0.0);
    };
    let mut step = first.step;
    let mut run_start = 0;
    for (i, sample) in samples.iter().enumerate().skip(1) {
        if sample.step != step {
            step = sample.step;
            run_start = i;
        }
    }
    samples[run_start + (samples.len() - run_start - 1) / 2].voltage
}

fn last_capacity(samples: &[Sample], in_phase: fn(Step) -> bool) -> Option<f64> {
    samples
        .iter()
        .filter(|s| in_phase(s.step))
        .filter_map(|s| s.capacity)
        .last()
}

fn ohms(voltage: f64, rest_voltage: f64, current: f64) -> Option<f64> {
    let resistance = ((voltage - rest_voltage) / current).abs() * 1000.0;
    resistance.is_finite().then_some(resistance)
}

fn direct_resistance(
    current: Option<f64>,
    voltage: Option<f64>,
    rest_voltage: Option<f64>,
) -> Option<f64> {
    let current = current?;
    if current == 0.0 {
        return Some(0.0);
    }
    ohms(voltage?, rest_voltage?, current)
}

fn borrowed_resistance(
    current: Option<f64>,
    voltage: Option<f64>,
    rest_voltage: Option<f64>,
) -> Option<f64> {
    let current = current.filter(|c| *c != 0.0)?;
    ohms(voltage?, rest_voltage?, current)
}

/// Direct resistances first, then fill gaps in cycle `i - 1` from the opposite
/// phase of cycle `i` when cycle `i` has no baseline sample of its own.
fn populate_resistance(cycles: &mut [Cycle]) {
    let mut charge: Vec<Option<f64>> = cycles
        .iter()
        .map(|c| {
            direct_resistance(
                c.start_resistance_current,
                c.start_resistance_voltage,
                c.end_rest_voltage,
            )
        })
        .collect();
    let mut discharge: Vec<Option<f64>> = cycles
        .iter()
        .map(|c| {
            direct_resistance(
                c.start_resistance_discharge_current,
                c.start_resistance_discharge_voltage,
                c.end_rest_discharge_voltage,
            )
        })
        .collect();

    for i in 1..cycles.len() {
        let previous = &cycles[i - 1];
        let current = &cycles[i];
        if current.start_resistance_current.is_none() && charge[i - 1].is_none() {
            charge[i - 1] = borrowed_resistance(
                current.start_resistance_discharge_current,
                current.start_resistance_discharge_voltage,
                previous.end_rest_voltage,
            );
        }
        if current.start_resistance_discharge_current.is_none() && discharge[i - 1].is_none() {
            discharge[i - 1] = borrowed_resistance(
                current.start_resistance_current,
                current.start_resistance_voltage,
                previous.end_rest_voltage,
            );
        }
    }

    for (cycle, (charge, discharge)) in cycles.iter_mut().zip(charge.into_iter().zip(discharge)) {
        cycle.resistance_ohms = charge;
        cycle.discharge_resistance = discharge;
    }
}

/// Seeded by the first cycle with a capacity, wherever it sits; only raised by
/// cycles inside the early window afterwards.
fn reference_capacity(
    cycles: &[Cycle],
    capacity: impl Fn(&Cycle) -> Option<f64>,
) -> Option<ReferenceCapacity> {
    let mut reference: Option<ReferenceCapacity> = None;
    for (position, cycle) in cycles.iter().enumerate() {
        let Some(value) = capacity(cycle) else {
            continue;
        };
        match reference {
            None => reference = Some(ReferenceCapacity { value, position }),
            Some(current) if value > current.value && position < EARLY_CYCLE_WINDOW => {
                reference = Some(ReferenceCapacity { value, position })
            }
            Some(_) => {}
        }
    }
    reference
}

fn retention(position: usize, capacity: Option<f64>, reference: ReferenceCapacity) -> Option<f64> {
    if position == reference.position {
        return Some(100.0);
    }
    capacity
        .map(|c| c / reference.value * 100.0)
        .filter(|r| r.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cycle: i32, time: f64, step: Step, voltage: f64, current: f64) -> Sample {
        Sample {
            voltage: Some(voltage),
            current: Some(current),
            ..Sample::new(cycle, time, step)
        }
    }

    fn with_capacity(mut s: Sample, capacity: f64) -> Sample {
        s.capacity = Some(capacity);
        s
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn empty_input_yields_no_cycles() {
        let out = extract_cycles(Vec::new());
        assert!(out.is_empty());
        assert!(out.samples.is_empty());
    }

    #[test]
    fn cycles_are_ascending_and_slices_are_time_sorted() {
        let input = vec![
            sample(3, 5.0, Step::Discharge, 3.0, -1.0),
            sample(1, 2.0, Step::ChargeConstantCurrent, 3.5, 1.0),
            sample(2, 1.0, Step::Rest, 3.2, 0.0),
            sample(3, 4.0, Step::Rest, 3.1, 0.0),
            sample(1, 1.0, Step::Rest, 3.0, 0.0),
            sample(2, 3.0, Step::Discharge, 2.9, -1.0),
            sample(1, 3.0, Step::ChargeConstantVoltage, 4.2, 0.5),
        ];
        let out = extract_cycles(input.clone());

        let indices: Vec<i32> = out.cycles.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let counts: Vec<usize> = out.cycles.iter().map(|c| c.sample_count).collect();
        assert_eq!(counts, vec![3, 2, 2]);

        let mut expected = input;
        expected.sort_by(|a, b| {
            a.cycle_index
                .cmp(&b.cycle_index)
                .then(a.time.total_cmp(&b.time))
        });
        assert_eq!(out.samples, expected);

        for cycle in &out.cycles {
            assert!(out
                .cycle_samples(cycle)
                .iter()
                .all(|s| s.cycle_index == cycle.index));
        }
    }

    #[test]
    fn cycle_time_is_duration() {
        let out = extract_cycles(vec![
            sample(1, 110.0, Step::Discharge, 3.0, -1.0),
            sample(1, 100.0, Step::Rest, 3.0, 0.0),
            sample(1, 160.0, Step::Discharge, 2.8, -1.0),
        ]);
        assert!(close(out.cycles[0].time, 60.0));
    }

    #[test]
    fn end_and_start_values_follow_phase_order() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::Rest, 3.0, 0.0),
            sample(1, 1.0, Step::ChargeConstantCurrent, 3.6, 1.0),
            sample(1, 2.0, Step::ChargeConstantCurrent, 3.9, 1.0),
            sample(1, 3.0, Step::ChargeConstantVoltage, 4.2, 0.3),
            sample(1, 4.0, Step::Rest, 4.1, 0.0),
            sample(1, 5.0, Step::Discharge, 3.9, -1.0),
            sample(1, 6.0, Step::Discharge, 3.2, -1.2),
            sample(1, 7.0, Step::Rest, 3.3, 0.0),
        ]);
        let c = &out.cycles[0];
        assert_eq!(c.end_current, Some(0.3));
        assert_eq!(c.end_voltage, Some(4.2));
        assert_eq!(c.start_current, Some(1.0));
        assert_eq!(c.start_charge_voltage, Some(3.6));
        assert_eq!(c.discharge_end_current, Some(-1.2));
        assert_eq!(c.discharge_end_voltage, Some(3.2));
        assert_eq!(c.start_discharge_current, Some(-1.0));
        assert_eq!(c.start_discharge_voltage, Some(3.9));
        assert_eq!(c.end_rest_voltage, Some(3.0));
        assert_eq!(c.end_rest_discharge_voltage, Some(4.1));
        assert_eq!(c.start_resistance_current, Some(1.0));
        assert_eq!(c.start_resistance_voltage, Some(3.6));
        assert_eq!(c.start_resistance_discharge_current, Some(-1.0));
        assert_eq!(c.start_resistance_discharge_voltage, Some(3.9));
    }

    #[test]
    fn rest_only_cycle_inherits_previous_rest_voltage() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::Rest, 3.4, 0.0),
            sample(1, 1.0, Step::ChargeConstantCurrent, 3.8, 1.0),
            sample(2, 2.0, Step::Rest, 3.7, 0.0),
            sample(2, 3.0, Step::Rest, 3.65, 0.0),
        ]);
        let rest_only = &out.cycles[1];
        assert_eq!(rest_only.end_current, None);
        assert_eq!(rest_only.end_voltage, None);
        assert_eq!(rest_only.discharge_end_current, None);
        assert_eq!(rest_only.discharge_end_voltage, None);
        assert_eq!(rest_only.start_current, None);
        assert_eq!(rest_only.start_discharge_voltage, None);
        assert_eq!(rest_only.end_rest_voltage, Some(3.65));
        assert_eq!(rest_only.end_rest_discharge_voltage, Some(3.65));
    }

    #[test]
    fn rest_voltage_carries_across_cycles() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::Rest, 3.3, 0.0),
            sample(2, 1.0, Step::Discharge, 3.1, -2.0),
        ]);
        let second = &out.cycles[1];
        assert_eq!(second.end_rest_discharge_voltage, Some(3.3));
        // No charge samples: falls back to the persisted rest value.
        assert_eq!(second.end_rest_voltage, Some(3.3));
        assert!(close(second.discharge_resistance, 100.0));
    }

    #[test]
    fn rest_samples_do_not_touch_temperature_or_end_values() {
        let mut charge = sample(1, 1.0, Step::ChargeConstantCurrent, 3.8, 1.0);
        charge.temperature = Some(25.0);
        let mut rest = sample(1, 2.0, Step::Rest, 3.7, 0.0);
        rest.temperature = Some(30.0);
        let out = extract_cycles(vec![charge, rest]);
        let c = &out.cycles[0];
        assert_eq!(c.temperature, Some(25.0));
        assert_eq!(c.end_voltage, Some(3.8));
        assert_eq!(c.end_current, Some(1.0));
    }

    #[test]
    fn energies_keep_last_reported_value() {
        let mut a = sample(1, 0.0, Step::ChargeConstantCurrent, 3.8, 1.0);
        a.energy = Some(1.5);
        let mut b = sample(1, 1.0, Step::Discharge, 3.6, -1.0);
        b.discharge_energy = Some(0.7);
        let mut c = sample(1, 2.0, Step::Discharge, 3.4, -1.0);
        c.energy = Some(2.0);
        let out = extract_cycles(vec![a, b, c]);
        assert_eq!(out.cycles[0].charge_energy, Some(2.0));
        assert_eq!(out.cycles[0].discharge_energy, Some(0.7));
    }

    #[test]
    fn mid_voltage_uses_final_step_run() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::ChargeConstantCurrent, 3.5, 1.0),
            sample(1, 1.0, Step::ChargeConstantCurrent, 3.6, 1.0),
            sample(1, 2.0, Step::ChargeConstantCurrent, 3.7, 1.0),
            sample(1, 3.0, Step::Discharge, 4.0, -1.0),
            sample(1, 4.0, Step::Discharge, 3.8, -1.0),
            sample(1, 5.0, Step::Discharge, 3.6, -1.0),
            sample(1, 6.0, Step::Discharge, 3.4, -1.0),
        ]);
        // Final run is samples 3..=6, middle is (4 - 1) / 2 = 1 -> 3.8.
        assert_eq!(out.cycles[0].mid_voltage, Some(3.8));
    }

    #[test]
    fn mid_voltage_of_empty_slice_is_zero() {
        assert_eq!(mid_voltage(&[]), Some(0.0));
    }

    #[test]
    fn capacities_take_last_present_in_phase_value() {
        let mut no_cap = sample(1, 3.0, Step::ChargeConstantVoltage, 4.2, 0.1);
        no_cap.capacity = None;
        let out = extract_cycles(vec![
            with_capacity(sample(1, 1.0, Step::ChargeConstantCurrent, 3.8, 1.0), 0.5),
            with_capacity(sample(1, 2.0, Step::ChargeConstantCurrent, 4.0, 1.0), 0.9),
            no_cap,
            with_capacity(sample(1, 4.0, Step::Rest, 4.1, 0.0), 5.0),
            with_capacity(sample(1, 5.0, Step::Discharge, 3.9, -1.0), 0.2),
            with_capacity(sample(1, 6.0, Step::Discharge, 3.1, -1.0), 0.85),
        ]);
        let c = &out.cycles[0];
        assert_eq!(c.charge_capacity, Some(0.9));
        assert_eq!(c.discharge_capacity, Some(0.85));
    }

    #[test]
    fn charge_resistance_from_rest_baseline() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::Rest, 3.0, 0.0),
            sample(1, 1.0, Step::ChargeConstantCurrent, 3.1, 0.5),
            sample(1, 2.0, Step::ChargeConstantCurrent, 3.5, 0.5),
        ]);
        assert!(close(out.cycles[0].resistance_ohms, 200.0));
        assert_eq!(out.cycles[0].discharge_resistance, None);
    }

    #[test]
    fn zero_current_resistance_is_exactly_zero() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::Rest, 3.0, 0.0),
            sample(1, 1.0, Step::ChargeConstantCurrent, 3.1, 0.0),
        ]);
        assert_eq!(out.cycles[0].resistance_ohms, Some(0.0));
    }

    #[test]
    fn missing_baseline_fills_previous_cycle_from_opposite_phase() {
        let out = extract_cycles(vec![
            sample(0, 0.0, Step::Rest, 3.0, 0.0),
            sample(1, 1.0, Step::Discharge, 2.9, -1.0),
            sample(1, 2.0, Step::Discharge, 2.7, -1.0),
        ]);
        let previous = &out.cycles[0];
        let current = &out.cycles[1];
        assert!(close(previous.resistance_ohms, 100.0));
        assert_eq!(previous.discharge_resistance, None);
        assert!(close(current.discharge_resistance, 100.0));
        assert_eq!(current.resistance_ohms, None);
    }

    #[test]
    fn gap_fill_keeps_existing_previous_resistance() {
        let out = extract_cycles(vec![
            sample(0, 0.0, Step::Rest, 3.0, 0.0),
            sample(0, 1.0, Step::ChargeConstantCurrent, 3.2, 1.0),
            sample(1, 2.0, Step::Discharge, 2.5, -1.0),
        ]);
        assert!(close(out.cycles[0].resistance_ohms, 200.0));
    }

    #[test]
    fn no_fill_without_previous_rest_baseline() {
        let out = extract_cycles(vec![
            sample(0, 0.0, Step::Discharge, 3.0, -1.0),
            sample(1, 1.0, Step::Rest, 3.2, 0.0),
            sample(1, 2.0, Step::Discharge, 3.0, -1.0),
        ]);
        let previous = &out.cycles[0];
        assert_eq!(previous.end_rest_voltage, None);
        assert_eq!(previous.resistance_ohms, None);
        assert_eq!(previous.discharge_resistance, None);
        assert!(close(out.cycles[1].discharge_resistance, 200.0));
    }

    #[test]
    fn no_fill_from_zero_current_baseline() {
        let out = extract_cycles(vec![
            sample(0, 0.0, Step::Rest, 3.0, 0.0),
            sample(1, 1.0, Step::Discharge, 2.9, 0.0),
        ]);
        assert_eq!(out.cycles[0].resistance_ohms, None);
        assert_eq!(out.cycles[1].discharge_resistance, Some(0.0));
    }

    #[test]
    fn retention_matches_reference_example() {
        let caps = [10.0, 12.0, 8.0];
        let input: Vec<Sample> = caps
            .iter()
            .enumerate()
            .map(|(i, &cap)| {
                with_capacity(
                    sample(i as i32, i as f64, Step::ChargeConstantCurrent, 4.0, 1.0),
                    cap,
                )
            })
            .collect();
        let out = extract_cycles(input);
        let r: Vec<Option<f64>> = out
            .cycles
            .iter()
            .map(|c| c.charge_capacity_retention)
            .collect();
        assert!(close(r[0], 10.0 / 12.0 * 100.0));
        assert_eq!(r[1], Some(100.0));
        assert!(close(r[2], 8.0 / 12.0 * 100.0));
        assert!(out.cycles.iter().all(|c| c.discharge_capacity_retention.is_none()));
    }

    #[test]
    fn late_cycles_cannot_raise_reference_capacity() {
        let input: Vec<Sample> = (0..12)
            .map(|i| {
                let cap = if i == 11 { 20.0 } else { 10.0 };
                with_capacity(sample(i, i as f64, Step::Discharge, 3.0, -1.0), cap)
            })
            .collect();
        let out = extract_cycles(input);
        assert_eq!(out.cycles[0].discharge_capacity_retention, Some(100.0));
        assert!(close(out.cycles[11].discharge_capacity_retention, 200.0));
        assert!(close(out.cycles[5].discharge_capacity_retention, 100.0));
    }

    #[test]
    fn reference_is_seeded_outside_window() {
        let mut input: Vec<Sample> = (0..12)
            .map(|i| sample(i, i as f64, Step::Rest, 3.0, 0.0))
            .collect();
        input.push(with_capacity(
            sample(12, 12.0, Step::ChargeConstantCurrent, 4.0, 1.0),
            4.0,
        ));
        input.push(with_capacity(
            sample(13, 13.0, Step::ChargeConstantCurrent, 4.0, 1.0),
            5.0,
        ));
        let out = extract_cycles(input);
        assert_eq!(out.cycles[12].charge_capacity_retention, Some(100.0));
        assert!(close(out.cycles[13].charge_capacity_retention, 125.0));
        assert_eq!(out.cycles[3].charge_capacity_retention, None);
    }

    #[test]
    fn discharge_power_uses_charge_end_voltage() {
        let out = extract_cycles(vec![
            sample(1, 0.0, Step::ChargeConstantCurrent, 4.0, 2.0),
            sample(1, 1.0, Step::Discharge, 3.0, -1.5),
        ]);
        let c = &out.cycles[0];
        assert!(close(c.power, 8.0));
        assert!(close(c.discharge_power, -6.0));
    }

    #[test]
    fn absent_values_propagate() {
        let mut s = Sample::new(1, 0.0, Step::ChargeConstantCurrent);
        s.current = Some(1.0);
        let out = extract_cycles(vec![s]);
        let c = &out.cycles[0];
        assert_eq!(c.end_voltage, None);
        assert_eq!(c.power, None);
        assert_eq!(c.mid_voltage, None);
        assert_eq!(c.charge_capacity, None);
        assert_eq!(c.resistance_ohms, None);
    }

    #[test]
    fn channels_are_extracted_independently() {
        let mut channels = BTreeMap::new();
        channels.insert(
            2,
            vec![
                sample(1, 0.0, Step::Rest, 3.0, 0.0),
                sample(2, 1.0, Step::Rest, 3.1, 0.0),
            ],
        );
        channels.insert(1, vec![sample(5, 0.0, Step::Discharge, 3.0, -1.0)]);
        let out = extract_channels(channels);
        let keys: Vec<i32> = out.keys().copied().collect();
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(out[&1].cycles.len(), 1);
        assert_eq!(out[&2].cycles.len(), 2);
    }
}
