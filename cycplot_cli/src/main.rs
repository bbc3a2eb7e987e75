use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use cycplot::{
    coulombic_efficiency, cycle_series, cycle_series_dual, derivative_series, extract_channels,
    finish_dual_series, finish_series, forced_every_nth, sample_series, simplify, simplify_dual,
    soc_series, Cycle, CycleMetric, Extraction, Phase, Point2Y, Sample, SampleField, Scale,
    SeriesParams, Step, VoltageWindow,
};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Battery cycler statistics CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract per-cycle statistics from one or more sample CSVs
    Cycles(CyclesArgs),
    /// Build a per-cycle series for one metric (or two with --metric2)
    Series(SeriesArgs),
    /// Plot sample fields (or their derivative) within a single cycle
    Curve(CurveArgs),
    /// Voltage against state of charge inside a voltage window, per cycle
    Soc(SocArgs),
    /// Reduce an x,y or x,y1,y2 CSV to a bounded number of points
    Simplify(SimplifyArgs),
    /// List the metric ids accepted by `series`
    Metrics,
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

impl LogArgs {
    fn timings(&self) -> bool {
        self.profile || self.verbose
    }
}

#[derive(Parser, Debug)]
struct CyclesArgs {
    /// Sample CSV files, one channel each
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "cycles.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Args, Debug)]
struct SeriesOpts {
    /// JSON file with series parameters; flags below override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// First cycle index to include
    #[arg(long = "from")]
    from_cycle: Option<i32>,

    /// Last cycle index to include
    #[arg(long = "to")]
    to_cycle: Option<i32>,

    /// Keep every n-th cycle (plus the first and last)
    #[arg(long)]
    every_nth: Option<i32>,

    /// Custom cycle filter such as "1-5, 8, 12-"
    #[arg(long = "cycles")]
    cycle_filter: Option<String>,

    /// Thin cycles when all channels together exceed this many
    #[arg(long)]
    max_cycles: Option<usize>,

    /// Upper bound on points per series
    #[arg(long)]
    max_points: Option<usize>,

    /// Simplify with the default point budget
    #[arg(long, action = ArgAction::SetTrue)]
    simplify: bool,

    /// Drop points below this y
    #[arg(long, allow_hyphen_values = true)]
    min_y: Option<f64>,

    /// Drop points above this y
    #[arg(long, allow_hyphen_values = true)]
    max_y: Option<f64>,

    /// Minimum |dx| between derivative samples
    #[arg(long)]
    threshold: Option<f64>,

    /// Skip charge-phase series
    #[arg(long, action = ArgAction::SetTrue)]
    no_charge: bool,

    /// Skip discharge-phase series
    #[arg(long, action = ArgAction::SetTrue)]
    no_discharge: bool,
}

#[derive(Parser, Debug)]
struct SeriesArgs {
    /// Sample CSV files, one channel each
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Metric id (see `cycplot metrics`)
    #[arg(long, value_parser = CycleMetric::from_id)]
    metric: CycleMetric,

    /// Second metric for a dual-channel series
    #[arg(long, value_parser = CycleMetric::from_id)]
    metric2: Option<CycleMetric>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "series.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Unit multiplier applied to values
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Normalization divider (electrode area, active mass) applied after --scale
    #[arg(long, default_value_t = 1.0)]
    divider: f64,

    #[command(flatten)]
    series: SeriesOpts,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Parser, Debug)]
struct CurveArgs {
    /// Sample CSV files, one channel each
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Cycle index to plot
    #[arg(long)]
    cycle: i32,

    /// Sample field on the x axis
    #[arg(long, value_parser = SampleField::from_id, default_value = "capacity")]
    x: SampleField,

    /// Sample field on the y axis
    #[arg(long, value_parser = SampleField::from_id, default_value = "voltage")]
    y: SampleField,

    /// Restrict to one phase (charge|discharge)
    #[arg(long, value_parser = Phase::from_id)]
    phase: Option<Phase>,

    /// Emit dy/dx instead of y (requires --phase)
    #[arg(long, action = ArgAction::SetTrue)]
    derivative: bool,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "curve.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    series: SeriesOpts,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Parser, Debug)]
struct SocArgs {
    /// Sample CSV files, one channel each
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Phase to plot (charge|discharge)
    #[arg(long, value_parser = Phase::from_id, default_value = "charge")]
    phase: Phase,

    /// Lower bound of the voltage window
    #[arg(long)]
    from_voltage: f64,

    /// Upper bound of the voltage window
    #[arg(long)]
    to_voltage: f64,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "soc.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    series: SeriesOpts,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Parser, Debug)]
struct SimplifyArgs {
    /// CSV with x,y or x,y1,y2 columns
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Maximum number of points to keep
    #[arg(long, default_value_t = cycplot::DEFAULT_MAX_POINTS_PER_SERIES)]
    max_points: usize,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Cycles(args) => args.log.verbose,
        Command::Series(args) => args.log.verbose,
        Command::Curve(args) => args.log.verbose,
        Command::Soc(args) => args.log.verbose,
        Command::Simplify(args) => args.log.verbose,
        Command::Metrics => false,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Cycles(args) => handle_cycles(args),
        Command::Series(args) => handle_series(args),
        Command::Curve(args) => handle_curve(args),
        Command::Soc(args) => handle_soc(args),
        Command::Simplify(args) => handle_simplify(args),
        Command::Metrics => handle_metrics(),
    }
}

fn handle_cycles(args: CyclesArgs) -> Result<()> {
    let channels = load_channels(&args.inputs, &args.log)?;

    let t_csv = Instant::now();
    let mut writer = open_output(&args.output)?;
    writer.write_record(CYCLE_COLUMNS)?;
    let mut rows = 0usize;
    for (channel, extraction) in &channels {
        for cycle in &extraction.cycles {
            writer.write_record(cycle_record(*channel, cycle))?;
            rows += 1;
        }
    }
    writer.flush()?;
    if args.log.timings() {
        info!(
            "CSV stage: {:.1} ms ({} rows)",
            t_csv.elapsed().as_secs_f64() * 1000.0,
            rows
        );
    }
    info!("Wrote {} cycles to {}", rows, args.output.display());
    Ok(())
}

fn handle_series(args: SeriesArgs) -> Result<()> {
    let mut params = series_params(&args.series)?;
    let unit = Scale::normalized(args.scale, args.divider);
    let channels = load_channels(&args.inputs, &args.log)?;
    apply_cycle_cap(&mut params, &channels);

    let t_series = Instant::now();
    let mut writer = open_output(&args.output)?;
    let mut rows = 0usize;
    match args.metric2 {
        None => {
            writer.write_record(["channel", "x", "y", "low_error", "high_error"])?;
            for (channel, extraction) in &channels {
                let points = finish_series(
                    cycle_series(&extraction.cycles, args.metric, &params, &unit),
                    &params,
                );
                debug!(
                    "Channel {}: {} points for {}",
                    channel,
                    points.len(),
                    args.metric.id()
                );
                for p in &points {
                    writer.write_record([
                        channel.to_string(),
                        p.x.to_string(),
                        p.y.to_string(),
                        fmt_opt(p.low_error),
                        fmt_opt(p.high_error),
                    ])?;
                }
                rows += points.len();
            }
        }
        Some(metric2) => {
            writer.write_record(["channel", "x", "y1", "y2"])?;
            for (channel, extraction) in &channels {
                let points = finish_dual_series(
                    cycle_series_dual(&extraction.cycles, args.metric, metric2, &params, &unit),
                    &params,
                );
                for p in &points {
                    writer.write_record([
                        channel.to_string(),
                        p.x.to_string(),
                        p.y1.to_string(),
                        p.y2.to_string(),
                    ])?;
                }
                rows += points.len();
            }
        }
    }
    writer.flush()?;

    if args.log.timings() {
        info!(
            "Series stage: {:.1} ms ({} points)",
            t_series.elapsed().as_secs_f64() * 1000.0,
            rows
        );
    }
    info!(
        "Wrote {} series ({} points) to {}",
        args.metric.name(),
        rows,
        args.output.display()
    );
    Ok(())
}

fn handle_soc(args: SocArgs) -> Result<()> {
    let mut params = series_params(&args.series)?;
    if args.from_voltage > args.to_voltage {
        return Err(anyhow!(
            "--from-voltage {} is above --to-voltage {}",
            args.from_voltage,
            args.to_voltage
        ));
    }
    let window = VoltageWindow {
        from: args.from_voltage,
        to: args.to_voltage,
    };
    let channels = load_channels(&args.inputs, &args.log)?;
    apply_cycle_cap(&mut params, &channels);

    let mut writer = open_output(&args.output)?;
    writer.write_record(["channel", "cycle", "x", "y"])?;
    let mut rows = 0usize;
    for (channel, extraction) in &channels {
        let curves = soc_series(
            &extraction.samples,
            &extraction.cycles,
            args.phase,
            window,
            &params,
        );
        debug!("Channel {}: {} state-of-charge curves", channel, curves.len());
        for (cycle, points) in curves {
            let points = finish_series(points, &params);
            for p in &points {
                writer.write_record([
                    channel.to_string(),
                    cycle.to_string(),
                    p.x.to_string(),
                    p.y.to_string(),
                ])?;
            }
            rows += points.len();
        }
    }
    writer.flush()?;
    info!("Wrote {} state-of-charge points to {}", rows, args.output.display());
    Ok(())
}

fn handle_curve(args: CurveArgs) -> Result<()> {
    let params = series_params(&args.series)?;
    let derivative_phase = match (args.derivative, args.phase) {
        (true, None) => return Err(anyhow!("--derivative requires --phase")),
        (true, Some(phase)) => Some(phase),
        (false, _) => None,
    };
    let channels = load_channels(&args.inputs, &args.log)?;

    let mut writer = open_output(&args.output)?;
    writer.write_record(["channel", "x", "y"])?;
    let mut rows = 0usize;
    for (channel, extraction) in &channels {
        let Some(cycle) = extraction.cycles.iter().find(|c| c.index == args.cycle) else {
            warn!("Channel {} has no cycle {}", channel, args.cycle);
            continue;
        };
        let points = match derivative_phase {
            Some(phase) => {
                derivative_series(&extraction.samples, cycle, phase, args.x, args.y, &params)
            }
            None => sample_series(
                &extraction.samples,
                cycle,
                args.x,
                args.y,
                args.phase,
                &params,
            ),
        };
        let points = finish_series(points, &params);
        for p in &points {
            writer.write_record([channel.to_string(), p.x.to_string(), p.y.to_string()])?;
        }
        rows += points.len();
    }
    writer.flush()?;
    info!(
        "Wrote {} points for cycle {} to {}",
        rows,
        args.cycle,
        args.output.display()
    );
    Ok(())
}

fn handle_simplify(args: SimplifyArgs) -> Result<()> {
    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let t_simplify = Instant::now();
    let table = read_xy_table(file)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    let mut writer = open_output(&args.output)?;
    let (before, after) = match table {
        XyTable::Single { header, points } => {
            let out = simplify(&points, args.max_points);
            writer.write_record(&header)?;
            for (x, y) in &out {
                writer.write_record([x.to_string(), y.to_string()])?;
            }
            (points.len(), out.len())
        }
        XyTable::Dual { header, points } => {
            let out = simplify_dual(&points, args.max_points);
            writer.write_record(&header)?;
            for p in &out {
                writer.write_record([p.x.to_string(), p.y1.to_string(), p.y2.to_string()])?;
            }
            (points.len(), out.len())
        }
    };
    writer.flush()?;

    if args.log.timings() {
        info!(
            "Simplify stage: {:.1} ms",
            t_simplify.elapsed().as_secs_f64() * 1000.0
        );
    }
    info!("Simplified {} -> {} points", before, after);
    Ok(())
}

fn handle_metrics() -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for metric in CycleMetric::ALL {
        writeln!(handle, "{:<30} {}", metric.id(), metric.name())?;
    }
    Ok(())
}

/// Parse every input in parallel and extract cycles per channel. Channels are
/// numbered from 1 in input order.
fn load_channels(inputs: &[PathBuf], log: &LogArgs) -> Result<BTreeMap<i32, Extraction>> {
    if inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }

    let t_parse = Instant::now();
    let mut parsed: Vec<(i32, Vec<Sample>)> = inputs
        .par_iter()
        .enumerate()
        .map(|(i, path)| -> Result<(i32, Vec<Sample>)> {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            let samples =
                read_samples(file).with_context(|| format!("failed to parse {}", path.display()))?;
            let channel = i32::try_from(i + 1).context("too many input files")?;
            Ok((channel, samples))
        })
        .collect::<Result<Vec<_>>>()?;
    parsed.sort_by_key(|(channel, _)| *channel);
    let total: usize = parsed.iter().map(|(_, s)| s.len()).sum();
    if log.timings() {
        info!(
            "Parse stage: {:.1} ms ({} samples)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            total
        );
    }

    let t_extract = Instant::now();
    let channels = extract_channels(parsed.into_iter().collect());
    if log.timings() {
        info!(
            "Extract stage: {:.1} ms ({} channels)",
            t_extract.elapsed().as_secs_f64() * 1000.0,
            channels.len()
        );
    }
    for (channel, extraction) in &channels {
        if extraction.is_empty() {
            warn!("Channel {} produced no cycles", channel);
        }
    }
    Ok(channels)
}

fn apply_cycle_cap(params: &mut SeriesParams, channels: &BTreeMap<i32, Extraction>) {
    let cycles: Vec<&[Cycle]> = channels.values().map(|e| e.cycles.as_slice()).collect();
    if let Some(n) = forced_every_nth(&cycles, params) {
        info!("Cycle cap exceeded, plotting every {} cycles", n);
        params.every_nth_cycle = Some(n);
    }
}

fn series_params(opts: &SeriesOpts) -> Result<SeriesParams> {
    let mut params = match opts.config.as_ref() {
        Some(path) => load_series_config(path)?,
        None => SeriesParams::default(),
    };

    if opts.from_cycle.is_some() {
        params.from_cycle = opts.from_cycle;
    }
    if opts.to_cycle.is_some() {
        params.to_cycle = opts.to_cycle;
    }
    if opts.every_nth.is_some() {
        params.every_nth_cycle = opts.every_nth;
    }
    if opts.cycle_filter.is_some() {
        params.custom_cycle_filter = opts.cycle_filter.clone();
    }
    if opts.max_cycles.is_some() {
        params.max_cycles = opts.max_cycles;
    }
    if opts.max_points.is_some() {
        params.max_points_per_series = opts.max_points;
    }
    if opts.simplify {
        params.simplification = params.simplification.max(1);
    }
    if opts.min_y.is_some() {
        params.min_y = opts.min_y;
    }
    if opts.max_y.is_some() {
        params.max_y = opts.max_y;
    }
    if opts.threshold.is_some() {
        params.threshold = opts.threshold;
    }
    if opts.no_charge {
        params.charge_enabled = false;
    }
    if opts.no_discharge {
        params.discharge_enabled = false;
    }

    params
        .validate()
        .context("invalid series parameters")?;
    Ok(params)
}

fn load_series_config(path: &Path) -> Result<SeriesParams> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read series config {}", path.display()))?;
    SeriesParams::from_json_str(&text)
        .with_context(|| format!("invalid series config {}", path.display()))
}

fn open_output(path: &Path) -> Result<csv::Writer<Box<dyn Write>>> {
    let sink: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )
    };
    Ok(csv::Writer::from_writer(sink))
}

#[derive(Debug, Deserialize)]
struct SampleRow {
    cycle_index: i32,
    time: f64,
    step: String,
    current: Option<f64>,
    voltage: Option<f64>,
    capacity: Option<f64>,
    energy: Option<f64>,
    discharge_energy: Option<f64>,
    temperature: Option<f64>,
}

fn parse_step(token: &str) -> Result<Step> {
    match token.trim().to_ascii_lowercase().as_str() {
        "rest" => Ok(Step::Rest),
        "charge_cc" => Ok(Step::ChargeConstantCurrent),
        "charge_cv" => Ok(Step::ChargeConstantVoltage),
        "discharge" => Ok(Step::Discharge),
        other => Err(anyhow!(
            "unknown step '{}': expected rest, charge_cc, charge_cv or discharge",
            other
        )),
    }
}

/// Read sample rows. Blank cells become absent values; missing optional
/// columns are allowed.
fn read_samples<R: Read>(reader: R) -> Result<Vec<Sample>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut samples = Vec::new();
    for (i, row) in csv_reader.deserialize::<SampleRow>().enumerate() {
        let line = i + 2;
        let row = row.with_context(|| format!("malformed sample at line {}", line))?;
        let step = parse_step(&row.step).with_context(|| format!("line {}", line))?;
        samples.push(Sample {
            cycle_index: row.cycle_index,
            time: row.time,
            step,
            current: row.current,
            voltage: row.voltage,
            capacity: row.capacity,
            energy: row.energy,
            discharge_energy: row.discharge_energy,
            temperature: row.temperature,
        });
    }
    Ok(samples)
}

#[derive(Debug)]
enum XyTable {
    Single {
        header: Vec<String>,
        points: Vec<(f64, f64)>,
    },
    Dual {
        header: Vec<String>,
        points: Vec<Point2Y>,
    },
}

fn read_xy_table<R: Read>(reader: R) -> Result<XyTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let header: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let columns = header.len();
    if columns != 2 && columns != 3 {
        return Err(anyhow!(
            "expected 2 (x,y) or 3 (x,y1,y2) columns, found {}",
            columns
        ));
    }

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        let line = i + 2;
        let record = record.with_context(|| format!("malformed row at line {}", line))?;
        let values = record
            .iter()
            .map(|cell| {
                cell.parse::<f64>()
                    .with_context(|| format!("invalid number '{}' at line {}", cell, line))
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(values);
    }

    Ok(if columns == 2 {
        XyTable::Single {
            header,
            points: rows.iter().map(|r| (r[0], r[1])).collect(),
        }
    } else {
        XyTable::Dual {
            header,
            points: rows.iter().map(|r| Point2Y::new(r[0], r[1], r[2])).collect(),
        }
    })
}

const CYCLE_COLUMNS: [&str; 31] = [
    "channel",
    "index",
    "sample_count",
    "time",
    "end_current",
    "discharge_end_current",
    "mid_voltage",
    "end_voltage",
    "discharge_end_voltage",
    "charge_capacity",
    "discharge_capacity",
    "charge_capacity_retention",
    "discharge_capacity_retention",
    "coulombic_efficiency",
    "power",
    "discharge_power",
    "charge_energy",
    "discharge_energy",
    "temperature",
    "end_rest_voltage",
    "end_rest_discharge_voltage",
    "start_current",
    "start_discharge_current",
    "start_charge_voltage",
    "start_discharge_voltage",
    "start_resistance_current",
    "start_resistance_voltage",
    "start_resistance_discharge_current",
    "start_resistance_discharge_voltage",
    "resistance_ohms",
    "discharge_resistance",
];

fn cycle_record(channel: i32, cycle: &Cycle) -> Vec<String> {
    let mut record = vec![
        channel.to_string(),
        cycle.index.to_string(),
        cycle.sample_count.to_string(),
    ];
    record.extend(
        [
            cycle.time,
            cycle.end_current,
            cycle.discharge_end_current,
            cycle.mid_voltage,
            cycle.end_voltage,
            cycle.discharge_end_voltage,
            cycle.charge_capacity,
            cycle.discharge_capacity,
            cycle.charge_capacity_retention,
            cycle.discharge_capacity_retention,
            coulombic_efficiency(cycle),
            cycle.power,
            cycle.discharge_power,
            cycle.charge_energy,
            cycle.discharge_energy,
            cycle.temperature,
            cycle.end_rest_voltage,
            cycle.end_rest_discharge_voltage,
            cycle.start_current,
            cycle.start_discharge_current,
            cycle.start_charge_voltage,
            cycle.start_discharge_voltage,
            cycle.start_resistance_current,
            cycle.start_resistance_voltage,
            cycle.start_resistance_discharge_current,
            cycle.start_resistance_discharge_voltage,
            cycle.resistance_ohms,
            cycle.discharge_resistance,
        ]
        .into_iter()
        .map(fmt_opt),
    );
    record
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &str = "\
cycle_index,time,step,current,voltage,capacity,energy,discharge_energy,temperature
1,0,rest,,3.50,,,,25.0
1,1,Charge_CC,1.0,3.60,0.1,,,25.5
1,2,charge_cv,0.5,4.20,0.9,3.4,,
1,3,DISCHARGE,-1.0,3.90,0.8,,3.1,26.0
";

    #[test]
    fn step_tokens_are_case_insensitive() {
        assert_eq!(parse_step("rest").unwrap(), Step::Rest);
        assert_eq!(parse_step(" Charge_CC ").unwrap(), Step::ChargeConstantCurrent);
        assert_eq!(parse_step("charge_cv").unwrap(), Step::ChargeConstantVoltage);
        assert_eq!(parse_step("Discharge").unwrap(), Step::Discharge);
        assert!(parse_step("pause").is_err());
    }

    #[test]
    fn blank_cells_are_absent() {
        let samples = read_samples(SAMPLES.as_bytes()).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].step, Step::Rest);
        assert_eq!(samples[0].current, None);
        assert_eq!(samples[0].voltage, Some(3.5));
        assert_eq!(samples[2].energy, Some(3.4));
        assert_eq!(samples[2].temperature, None);
        assert_eq!(samples[3].discharge_energy, Some(3.1));
    }

    #[test]
    fn optional_columns_may_be_missing() {
        let text = "cycle_index,time,step,voltage\n2,5.5,discharge,3.7\n";
        let samples = read_samples(text.as_bytes()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].cycle_index, 2);
        assert_eq!(samples[0].voltage, Some(3.7));
        assert_eq!(samples[0].capacity, None);
    }

    #[test]
    fn bad_step_reports_line() {
        let text = "cycle_index,time,step\n1,0,rest\n1,1,hold\n";
        let err = read_samples(text.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 3"));
    }

    #[test]
    fn flags_override_defaults_and_validate() {
        let opts = SeriesOpts {
            config: None,
            from_cycle: Some(2),
            to_cycle: Some(9),
            every_nth: Some(3),
            cycle_filter: None,
            max_cycles: Some(40),
            max_points: Some(50),
            simplify: false,
            min_y: None,
            max_y: None,
            threshold: None,
            no_charge: true,
            no_discharge: false,
        };
        let params = series_params(&opts).unwrap();
        assert_eq!(params.from_cycle, Some(2));
        assert_eq!(params.every_nth_cycle, Some(3));
        assert_eq!(params.max_points_per_series, Some(50));
        assert_eq!(params.max_cycles, Some(40));
        assert!(!params.charge_enabled);
        assert!(params.discharge_enabled);

        let bad = SeriesOpts {
            from_cycle: Some(9),
            to_cycle: Some(2),
            ..opts
        };
        assert!(series_params(&bad).is_err());
    }

    #[test]
    fn cycle_cap_forces_every_nth() {
        let cycles: Vec<Cycle> = (1..=50)
            .map(|index| Cycle {
                index,
                ..Cycle::default()
            })
            .collect();
        let mut channels = BTreeMap::new();
        channels.insert(
            1,
            Extraction {
                cycles,
                samples: Vec::new(),
            },
        );
        let mut params = SeriesParams {
            max_cycles: Some(11),
            ..SeriesParams::default()
        };
        apply_cycle_cap(&mut params, &channels);
        assert_eq!(params.every_nth_cycle, Some(5));
    }

    #[test]
    fn xy_tables_pick_variant_by_width() {
        let single = read_xy_table("x,y\n0,0\n1,2\n".as_bytes()).unwrap();
        assert!(matches!(single, XyTable::Single { ref points, .. } if points.len() == 2));

        let dual = read_xy_table("x,a,b\n0,1,2\n".as_bytes()).unwrap();
        match dual {
            XyTable::Dual { header, points } => {
                assert_eq!(header, vec!["x", "a", "b"]);
                assert_eq!(points, vec![Point2Y::new(0.0, 1.0, 2.0)]);
            }
            other => panic!("expected dual table, got {:?}", other),
        }

        assert!(read_xy_table("x\n1\n".as_bytes()).is_err());
        assert!(read_xy_table("x,y\n1,abc\n".as_bytes()).is_err());
    }

    #[test]
    fn cycle_record_matches_header_width() {
        let cycle = Cycle {
            index: 3,
            charge_capacity: Some(2.0),
            discharge_capacity: Some(1.5),
            ..Cycle::default()
        };
        let record = cycle_record(1, &cycle);
        assert_eq!(record.len(), CYCLE_COLUMNS.len());
        assert_eq!(record[1], "3");
        let ce = CYCLE_COLUMNS
            .iter()
            .position(|c| *c == "coulombic_efficiency")
            .unwrap();
        assert_eq!(record[ce], "75");
        assert_eq!(record[CYCLE_COLUMNS.len() - 1], "");
    }
}
