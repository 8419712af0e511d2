//! # Discovery Engine
//!
//! Calibrates an unknown meter deployment. The operator reads power and the
//! import/export energy counters off the meter display; the engine scans a
//! register range and reports which addresses, under which encoding, hold
//! values within tolerance of those references.
//!
//! - Power is tried as `uint16` then `int16` against an absolute tolerance.
//! - Energy is tried as 32-bit low-word-first and high-word-first, scaled by
//!   0.1, against `max(absolute, |expected| × ratio)`. Both are reported when
//!   both match.
//! - A match can be confirmed by re-reading the register; every read must
//!   match again.
//! - Power readings inside a widened band are collected while scanning. If no
//!   power match was accepted, the [`MAX_CANDIDATES`] closest of them are
//!   re-read into [`MeterCandidate`]s for operator review. Candidates are
//!   never applied.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::bytes::{ByteOrder, RegisterBuffers};
use crate::catalog::RegisterCatalog;
use crate::client::RegisterRead;
use crate::protocol::RegisterKind;

/// Scale applied to 32-bit energy counters.
pub const ENERGY_SCALE: f64 = 0.1;

/// Samples required before a candidate is reported.
pub const MIN_CANDIDATE_SAMPLES: usize = 4;

/// Registers sampled as candidates after a scan without a power match.
pub const MAX_CANDIDATES: usize = 5;

/// Candidate band, as a multiple of the power tolerance.
pub const CANDIDATE_BAND_FACTOR: f64 = 5.0;

/// Candidate band, as a fraction of the expected power.
pub const CANDIDATE_BAND_RATIO: f64 = 0.25;

/// Metrics the engine can locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMetric {
    Power,
    ImportEnergy,
    ExportEnergy,
}

impl DiscoveryMetric {
    /// Catalog id the metric is persisted under.
    pub fn metric_id(&self) -> &'static str {
        match self {
            Self::Power => "meter_power",
            Self::ImportEnergy => "grid_import_energy",
            Self::ExportEnergy => "grid_export_energy",
        }
    }
}

impl fmt::Display for DiscoveryMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_id())
    }
}

/// Operator-supplied reference readings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExpectedValues {
    pub power_w: Option<f64>,
    pub import_kwh: Option<f64>,
    pub export_kwh: Option<f64>,
}

impl ExpectedValues {
    pub fn requested(&self) -> Vec<DiscoveryMetric> {
        let mut metrics = Vec::with_capacity(3);
        if self.power_w.is_some() {
            metrics.push(DiscoveryMetric::Power);
        }
        if self.import_kwh.is_some() {
            metrics.push(DiscoveryMetric::ImportEnergy);
        }
        if self.export_kwh.is_some() {
            metrics.push(DiscoveryMetric::ExportEnergy);
        }
        metrics
    }

    pub fn is_empty(&self) -> bool {
        self.requested().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub power_w: f64,
    pub energy_abs_kwh: f64,
    pub energy_ratio: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            power_w: 100.0,
            energy_abs_kwh: 1.0,
            energy_ratio: 0.01,
        }
    }
}

impl Tolerances {
    /// Tolerances suggested by the catalog's discovery hints, falling back to
    /// the defaults for anything the catalog does not specify.
    pub fn from_catalog(catalog: &RegisterCatalog) -> Self {
        let mut tolerances = Self::default();
        let hint = |id: &str| catalog.get(id).and_then(|m| m.discovery.as_ref());

        if let Some(watts) = hint(DiscoveryMetric::Power.metric_id()).and_then(|h| h.tolerance_watts)
        {
            tolerances.power_w = watts;
        }
        if let Some(energy) =
            hint(DiscoveryMetric::ImportEnergy.metric_id()).and_then(|h| h.tolerance)
        {
            tolerances.energy_abs_kwh = energy.absolute_kwh;
            tolerances.energy_ratio = energy.relative;
        }
        tolerances
    }

    pub fn energy_tolerance(&self, expected: f64) -> f64 {
        self.energy_abs_kwh.max(expected.abs() * self.energy_ratio)
    }
}

/// A register whose reading matched a reference value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryMatch {
    pub metric: DiscoveryMetric,
    pub register: u16,
    pub value: f64,
    pub encoding: &'static str,
    pub deviation: f64,
}

/// Sample statistics of a near-miss power register.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterCandidate {
    pub register: u16,
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub stddev: f64,
    pub sign_changes: usize,
}

impl MeterCandidate {
    /// Statistics over `samples`; `None` for an empty slice.
    pub fn from_samples(register: u16, samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let sign_changes = samples
            .windows(2)
            .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
            .count();

        Some(Self {
            register,
            samples: samples.len(),
            mean,
            min,
            max,
            range: max - min,
            stddev: variance.sqrt(),
            sign_changes,
        })
    }
}

/// Every plausible match of one raw reading against the reference values.
pub fn evaluate_register(
    register: u16,
    words: &[u16],
    expected: &ExpectedValues,
    tolerances: &Tolerances,
) -> Vec<DiscoveryMatch> {
    let mut matches = Vec::new();
    let buffers = RegisterBuffers::from_words(words);

    if let (Some(target), Some(unsigned), Some(signed)) =
        (expected.power_w, buffers.u16(), buffers.i16())
    {
        let unsigned = unsigned as f64;
        let signed = signed as f64;
        let mut check = |value: f64, encoding: &'static str| {
            let deviation = (value - target).abs();
            if deviation <= tolerances.power_w {
                matches.push(DiscoveryMatch {
                    metric: DiscoveryMetric::Power,
                    register,
                    value,
                    encoding,
                    deviation,
                });
            }
        };
        check(unsigned, "uint16");
        if signed != unsigned {
            check(signed, "int16");
        }
    }

    let energy = [
        (DiscoveryMetric::ImportEnergy, expected.import_kwh),
        (DiscoveryMetric::ExportEnergy, expected.export_kwh),
    ];
    for (metric, target) in energy {
        let Some(target) = target else { continue };
        let tolerance = tolerances.energy_tolerance(target);
        for (order, encoding) in [
            (ByteOrder::Little, "uint32_le_x0.1"),
            (ByteOrder::Big, "uint32_be_x0.1"),
        ] {
            let Some(raw) = buffers.u32(order) else { continue };
            let value = raw as f64 * ENERGY_SCALE;
            let deviation = (value - target).abs();
            if deviation <= tolerance {
                matches.push(DiscoveryMatch {
                    metric,
                    register,
                    value,
                    encoding,
                    deviation,
                });
            }
        }
    }

    matches
}

/// Power reading of `words` closest to `target`, trying both signednesses.
fn power_reading(words: &[u16], target: f64) -> Option<f64> {
    let buffers = RegisterBuffers::from_words(words);
    let unsigned = buffers.u16()? as f64;
    let signed = buffers.i16()? as f64;
    if (signed - target).abs() < (unsigned - target).abs() {
        Some(signed)
    } else {
        Some(unsigned)
    }
}

/// Parameters of one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub kind: RegisterKind,
    /// First address, inclusive
    pub start: u16,
    /// Last address, inclusive
    pub end: u16,
    pub expected: ExpectedValues,
    pub tolerances: Tolerances,
    /// Total reads that must match before a hit is accepted; 0 or 1 accepts
    /// the first read.
    pub confirmation_reads: u32,
    /// Pause between confirmation and candidate re-reads
    pub reread_delay: Duration,
    /// Stop once every requested metric has a match
    pub stop_when_complete: bool,
    /// Samples collected per candidate beyond [`MIN_CANDIDATE_SAMPLES`]
    pub extra_candidate_reads: usize,
}

impl ScanOptions {
    pub fn new(kind: RegisterKind, start: u16, end: u16, expected: ExpectedValues) -> Self {
        Self {
            kind,
            start,
            end,
            expected,
            tolerances: Tolerances::default(),
            confirmation_reads: 0,
            reread_delay: Duration::ZERO,
            stop_when_complete: true,
            extra_candidate_reads: 0,
        }
    }

    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    pub fn with_confirmation_reads(mut self, reads: u32) -> Self {
        self.confirmation_reads = reads;
        self
    }

    pub fn with_reread_delay(mut self, delay: Duration) -> Self {
        self.reread_delay = delay;
        self
    }

    pub fn with_stop_when_complete(mut self, stop: bool) -> Self {
        self.stop_when_complete = stop;
        self
    }

    pub fn with_extra_candidate_reads(mut self, reads: usize) -> Self {
        self.extra_candidate_reads = reads;
        self
    }

    /// Half-width of the band around the expected power in which readings
    /// are sampled as candidates.
    pub fn candidate_band(&self) -> Option<f64> {
        self.expected.power_w.map(|p| {
            (self.tolerances.power_w * CANDIDATE_BAND_FACTOR).max(p.abs() * CANDIDATE_BAND_RATIO)
        })
    }
}

/// Outcome of [`scan_registers`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub matches: Vec<DiscoveryMatch>,
    /// Only filled when no power match was accepted; best first
    pub candidates: Vec<MeterCandidate>,
    pub addresses_scanned: usize,
    pub read_errors: usize,
}

impl ScanReport {
    pub fn match_for(&self, metric: DiscoveryMetric) -> Option<&DiscoveryMatch> {
        self.matches.iter().find(|m| m.metric == metric)
    }
}

fn words_at(address: u16) -> u16 {
    if address == u16::MAX {
        1
    } else {
        2
    }
}

/// Scan `options.start..=options.end`, two words per address.
///
/// Read errors at an address are counted and the address skipped.
pub async fn scan_registers<C: RegisterRead>(client: &mut C, options: &ScanOptions) -> ScanReport {
    let requested = options.expected.requested();
    let band = options.candidate_band();
    let mut report = ScanReport::default();
    let mut resolved: HashSet<DiscoveryMetric> = HashSet::new();
    // (register, first reading) inside the candidate band
    let mut in_band: Vec<(u16, f64)> = Vec::new();

    info!(
        "Scanning {} registers {}..={} for {:?}",
        options.kind, options.start, options.end, requested
    );

    for address in options.start..=options.end {
        if options.stop_when_complete && requested.iter().all(|m| resolved.contains(m)) {
            debug!("All requested metrics resolved, stopping at {}", address);
            break;
        }

        report.addresses_scanned += 1;
        let words = match client
            .read_registers(options.kind, address, words_at(address))
            .await
        {
            Ok(words) => words,
            Err(e) => {
                debug!("Read at {} failed: {}", address, e);
                report.read_errors += 1;
                continue;
            }
        };

        for hit in evaluate_register(address, &words, &options.expected, &options.tolerances) {
            if resolved.contains(&hit.metric) {
                continue;
            }
            if confirm(client, options, &hit).await {
                info!(
                    "{} found at {} as {} = {} (deviation {:.2})",
                    hit.metric, hit.register, hit.encoding, hit.value, hit.deviation
                );
                resolved.insert(hit.metric);
                report.matches.push(hit);
            } else {
                debug!("{} at {} failed confirmation", hit.metric, address);
            }
        }

        if let (Some(band), Some(target)) = (band, options.expected.power_w) {
            if let Some(first) = power_reading(&words, target) {
                if (first - target).abs() <= band {
                    in_band.push((address, first));
                }
            }
        }
    }

    if let Some(target) = options.expected.power_w {
        if !resolved.contains(&DiscoveryMetric::Power) {
            in_band.sort_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()));
            in_band.truncate(MAX_CANDIDATES);
            debug!("Sampling {} power candidates", in_band.len());

            let mut candidates = Vec::with_capacity(in_band.len());
            for (register, first) in in_band {
                if let Some(candidate) = sample_candidate(client, options, register, first).await {
                    candidates.push(candidate);
                }
            }
            candidates.sort_by(|a, b| {
                (a.mean - target)
                    .abs()
                    .total_cmp(&(b.mean - target).abs())
            });
            report.candidates = candidates;
        }
    }

    report
}

/// Re-read the register of `hit` until the configured number of reads
/// matched. Any miss or read failure rejects the hit.
async fn confirm<C: RegisterRead>(client: &mut C, options: &ScanOptions, hit: &DiscoveryMatch) -> bool {
    for _ in 1..options.confirmation_reads {
        if !options.reread_delay.is_zero() {
            tokio::time::sleep(options.reread_delay).await;
        }
        let words = match client
            .read_registers(options.kind, hit.register, words_at(hit.register))
            .await
        {
            Ok(words) => words,
            Err(_) => return false,
        };
        let again = evaluate_register(hit.register, &words, &options.expected, &options.tolerances);
        if !again
            .iter()
            .any(|m| m.metric == hit.metric && m.encoding == hit.encoding)
        {
            return false;
        }
    }
    true
}

async fn sample_candidate<C: RegisterRead>(
    client: &mut C,
    options: &ScanOptions,
    register: u16,
    first: f64,
) -> Option<MeterCandidate> {
    let target = options.expected.power_w?;
    let wanted = MIN_CANDIDATE_SAMPLES + options.extra_candidate_reads;
    let mut samples = vec![first];

    while samples.len() < wanted {
        if !options.reread_delay.is_zero() {
            tokio::time::sleep(options.reread_delay).await;
        }
        match client.read_registers(options.kind, register, 1).await {
            Ok(words) => match power_reading(&words, target) {
                Some(value) => samples.push(value),
                None => break,
            },
            Err(e) => {
                debug!("Candidate sampling at {} stopped: {}", register, e);
                break;
            }
        }
    }

    if samples.len() < MIN_CANDIDATE_SAMPLES {
        return None;
    }
    MeterCandidate::from_samples(register, &samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, BridgeResult};
    use std::collections::{HashMap, VecDeque};

    /// Scripted reader: each address replays its queue, repeating the last
    /// entry once the queue is down to one.
    #[derive(Default)]
    struct ScriptedReader {
        script: HashMap<u16, VecDeque<Vec<u16>>>,
        reads: usize,
    }

    impl ScriptedReader {
        fn with(mut self, address: u16, readings: &[&[u16]]) -> Self {
            self.script
                .insert(address, readings.iter().map(|r| r.to_vec()).collect());
            self
        }
    }

    impl RegisterRead for ScriptedReader {
        async fn read_registers(
            &mut self,
            _kind: RegisterKind,
            address: u16,
            quantity: u16,
        ) -> BridgeResult<Vec<u16>> {
            self.reads += 1;
            let queue = self
                .script
                .get_mut(&address)
                .ok_or_else(|| BridgeError::exception(0x04, 0x02))?;
            let mut words = if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            };
            words.resize(quantity as usize, 0);
            Ok(words)
        }

        async fn disconnect(&mut self) -> BridgeResult<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn tight_energy() -> Tolerances {
        Tolerances {
            power_w: 30.0,
            energy_abs_kwh: 1.0,
            energy_ratio: 0.0,
        }
    }

    #[test]
    fn test_big_endian_energy_literal() {
        let expected = ExpectedValues {
            import_kwh: Some(1234.5),
            ..Default::default()
        };
        let matches = evaluate_register(5098, &[0x0000, 0x3039], &expected, &tight_energy());

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].metric, DiscoveryMetric::ImportEnergy);
        assert_eq!(matches[0].encoding, "uint32_be_x0.1");
        assert!((matches[0].value - 1234.5).abs() < 1e-9);
    }

    #[test]
    fn test_both_energy_orders_reported() {
        // symmetric words decode identically in both orders
        let expected = ExpectedValues {
            export_kwh: Some(6_710_988.8),
            ..Default::default()
        };
        let matches = evaluate_register(1, &[0x0400, 0x0400], &expected, &tight_energy());

        let encodings: Vec<_> = matches.iter().map(|m| m.encoding).collect();
        assert_eq!(encodings, vec!["uint32_le_x0.1", "uint32_be_x0.1"]);
        assert!(matches.iter().all(|m| m.metric == DiscoveryMetric::ExportEnergy));
    }

    #[test]
    fn test_relative_energy_tolerance() {
        let tolerances = Tolerances {
            power_w: 10.0,
            energy_abs_kwh: 1.0,
            energy_ratio: 0.01,
        };
        assert_eq!(tolerances.energy_tolerance(50.0), 1.0);
        assert_eq!(tolerances.energy_tolerance(-5000.0), 50.0);

        // 1234.5 vs 1240: off by 5.5, inside 1% of 1240
        let expected = ExpectedValues {
            import_kwh: Some(1240.0),
            ..Default::default()
        };
        assert_eq!(
            evaluate_register(1, &[0x0000, 0x3039], &expected, &tolerances).len(),
            1
        );
    }

    #[test]
    fn test_power_signed_and_unsigned() {
        let expected = ExpectedValues {
            power_w: Some(-1500.0),
            ..Default::default()
        };
        let word = (-1490i16) as u16;
        let matches = evaluate_register(5600, &[word, 0], &expected, &tight_energy());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].encoding, "int16");
        assert_eq!(matches[0].value, -1490.0);

        // positive values only report the unsigned reading
        let expected = ExpectedValues {
            power_w: Some(1500.0),
            ..Default::default()
        };
        let matches = evaluate_register(5600, &[1510, 0], &expected, &tight_energy());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].encoding, "uint16");
    }

    #[tokio::test]
    async fn test_scan_finds_and_stops_early() {
        let mut reader = ScriptedReader::default()
            .with(5094, &[&[0x0000, 0x0064]])
            .with(5098, &[&[0x0000, 0x3039]]);
        let expected = ExpectedValues {
            import_kwh: Some(1234.5),
            export_kwh: Some(10.0),
            ..Default::default()
        };
        let options = ScanOptions::new(RegisterKind::Input, 5090, 5200, expected)
            .with_tolerances(tight_energy());

        let report = scan_registers(&mut reader, &options).await;

        assert_eq!(report.match_for(DiscoveryMetric::ExportEnergy).unwrap().register, 5094);
        assert_eq!(report.match_for(DiscoveryMetric::ImportEnergy).unwrap().register, 5098);
        // 5090..=5098, then stop
        assert_eq!(report.addresses_scanned, 9);
        assert_eq!(report.read_errors, 7);
    }

    #[tokio::test]
    async fn test_confirmation_rejects_unstable_register() {
        let mut reader = ScriptedReader::default().with(100, &[&[0x0000, 0x3039], &[0x0000, 0x5000]]);
        let expected = ExpectedValues {
            import_kwh: Some(1234.5),
            ..Default::default()
        };
        let options = ScanOptions::new(RegisterKind::Holding, 100, 100, expected)
            .with_tolerances(tight_energy())
            .with_confirmation_reads(2);

        let report = scan_registers(&mut reader, &options).await;
        assert!(report.matches.is_empty());
        assert_eq!(reader.reads, 2);
    }

    #[tokio::test]
    async fn test_confirmation_accepts_stable_register() {
        let mut reader = ScriptedReader::default().with(100, &[&[0x0000, 0x3039]]);
        let expected = ExpectedValues {
            import_kwh: Some(1234.5),
            ..Default::default()
        };
        let options = ScanOptions::new(RegisterKind::Holding, 100, 100, expected)
            .with_tolerances(tight_energy())
            .with_confirmation_reads(3);

        let report = scan_registers(&mut reader, &options).await;
        assert_eq!(report.matches.len(), 1);
        assert_eq!(reader.reads, 3);
    }

    #[tokio::test]
    async fn test_noisy_power_becomes_candidate() {
        let samples: [i16; 5] = [-5010, -4990, -5005, -4995, -5000];
        let words: Vec<Vec<u16>> = samples.iter().map(|s| vec![*s as u16, 0]).collect();
        let readings: Vec<&[u16]> = words.iter().map(|w| w.as_slice()).collect();
        let mut reader = ScriptedReader::default().with(5600, &readings);

        let expected = ExpectedValues {
            power_w: Some(-4900.0),
            ..Default::default()
        };
        let options = ScanOptions::new(RegisterKind::Input, 5598, 5602, expected)
            .with_tolerances(tight_energy())
            .with_extra_candidate_reads(1);

        let report = scan_registers(&mut reader, &options).await;

        assert!(report.matches.is_empty());
        assert_eq!(report.candidates.len(), 1);
        let candidate = &report.candidates[0];
        assert_eq!(candidate.register, 5600);
        assert_eq!(candidate.samples, 5);
        let average = samples.iter().map(|&s| s as f64).sum::<f64>() / 5.0;
        assert!((candidate.mean - average).abs() < 200.0);
        assert_eq!(candidate.min, -5010.0);
        assert_eq!(candidate.max, -4990.0);
        assert_eq!(candidate.range, 20.0);
        assert_eq!(candidate.sign_changes, 0);
    }

    #[tokio::test]
    async fn test_flat_registers_do_not_flood_candidates() {
        let mut reader = ScriptedReader::default();
        for address in 0..200 {
            reader = reader.with(address, &[&[0, 0]]);
        }
        let catalog = RegisterCatalog::builtin().unwrap();
        let expected = ExpectedValues {
            power_w: Some(2000.0),
            ..Default::default()
        };
        let options = ScanOptions::new(RegisterKind::Input, 0, 199, expected)
            .with_tolerances(Tolerances::from_catalog(&catalog));

        let report = scan_registers(&mut reader, &options).await;

        assert_eq!(report.addresses_scanned, 200);
        assert_eq!(report.candidates.len(), MAX_CANDIDATES);
        let resamples = MAX_CANDIDATES * (MIN_CANDIDATE_SAMPLES - 1);
        assert_eq!(reader.reads, 200 + resamples);
    }

    #[tokio::test]
    async fn test_power_match_skips_candidate_sampling() {
        let mut reader = ScriptedReader::default()
            .with(10, &[&[1900, 0]])
            .with(11, &[&[2000, 0]]);
        let expected = ExpectedValues {
            power_w: Some(2000.0),
            ..Default::default()
        };
        let options = ScanOptions::new(RegisterKind::Input, 10, 11, expected)
            .with_tolerances(tight_energy())
            .with_stop_when_complete(false);

        let report = scan_registers(&mut reader, &options).await;

        assert_eq!(report.match_for(DiscoveryMetric::Power).unwrap().register, 11);
        assert!(report.candidates.is_empty());
        assert_eq!(reader.reads, 2);
    }

    #[test]
    fn test_candidate_statistics() {
        let candidate = MeterCandidate::from_samples(7, &[-2.0, 2.0, -2.0, 2.0]).unwrap();
        assert_eq!(candidate.mean, 0.0);
        assert_eq!(candidate.stddev, 2.0);
        assert_eq!(candidate.sign_changes, 3);
        assert!(MeterCandidate::from_samples(7, &[]).is_none());
    }

    #[test]
    fn test_tolerances_from_builtin_catalog() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let tolerances = Tolerances::from_catalog(&catalog);
        assert_eq!(tolerances.power_w, 1500.0);
        assert_eq!(tolerances.energy_abs_kwh, 2.0);
        assert_eq!(tolerances.energy_ratio, 0.01);
    }
}
