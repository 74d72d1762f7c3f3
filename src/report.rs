//! Result aggregation and export
//!
//! The thin reporting layer: groups measurement samples per variant,
//! prints a summary table and optionally writes JSON/CSV files. Warmup
//! samples are carried in the exports but excluded from the summaries.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::benchmark::RunSample;
use crate::variant::VariantKind;

/// Aggregate throughput statistics for one variant's measurement samples
#[derive(Debug, Clone, Serialize)]
pub struct VariantSummary {
    pub variant: VariantKind,
    pub samples: usize,
    pub mean_throughput: f64,
    pub stddev_throughput: f64,
    pub min_throughput: f64,
    pub max_throughput: f64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub timed_out_samples: usize,
}

/// Summarize measurement samples per variant, in first-seen order
pub fn summarize(samples: &[RunSample]) -> Vec<VariantSummary> {
    let mut order: Vec<VariantKind> = Vec::new();
    for sample in samples.iter().filter(|s| s.phase.is_measurement()) {
        if !order.contains(&sample.variant) {
            order.push(sample.variant);
        }
    }

    order
        .into_iter()
        .map(|variant| {
            let group: Vec<&RunSample> = samples
                .iter()
                .filter(|s| s.phase.is_measurement() && s.variant == variant)
                .collect();

            let throughputs: Vec<f64> = group.iter().map(|s| s.throughput()).collect();
            let mean = throughputs.iter().sum::<f64>() / throughputs.len() as f64;
            let stddev = if throughputs.len() > 1 {
                let var = throughputs
                    .iter()
                    .map(|t| (t - mean) * (t - mean))
                    .sum::<f64>()
                    / (throughputs.len() - 1) as f64;
                var.sqrt()
            } else {
                0.0
            };

            VariantSummary {
                variant,
                samples: group.len(),
                mean_throughput: mean,
                stddev_throughput: stddev,
                min_throughput: throughputs.iter().cloned().fold(f64::INFINITY, f64::min),
                max_throughput: throughputs.iter().cloned().fold(0.0, f64::max),
                total_completed: group.iter().map(|s| s.completed).sum(),
                total_failed: group.iter().map(|s| s.failed).sum(),
                timed_out_samples: group.iter().filter(|s| s.timed_out).count(),
            }
        })
        .collect()
}

/// Print the per-variant summary table
pub fn print_report(summaries: &[VariantSummary]) {
    println!("\n====================================");
    println!("BENCHMARK COMPLETE");
    println!("====================================");

    for summary in summaries {
        println!("\n=== {} ===", summary.variant);
        println!(
            "Throughput: {} ops/s +/- {} ({} samples)",
            format_count(summary.mean_throughput as u64),
            format_count(summary.stddev_throughput as u64),
            summary.samples
        );
        println!(
            "Range: {} .. {} ops/s | Completed: {} | Failed: {}{}",
            format_count(summary.min_throughput as u64),
            format_count(summary.max_throughput as u64),
            format_count(summary.total_completed),
            format_count(summary.total_failed),
            if summary.timed_out_samples > 0 {
                format!(" | Timed out: {} samples", summary.timed_out_samples)
            } else {
                String::new()
            }
        );
    }

    if summaries.is_empty() {
        println!("\nNo measurement samples were recorded.");
    }
}

#[derive(Serialize)]
struct SampleRecord {
    variant: VariantKind,
    phase: &'static str,
    fork: u32,
    iteration: u32,
    elapsed_secs: f64,
    completed: u64,
    failed: u64,
    timed_out: bool,
    throughput: f64,
    p50_latency_ms: f64,
    p99_latency_ms: f64,
}

impl SampleRecord {
    fn from_sample(sample: &RunSample) -> Self {
        Self {
            variant: sample.variant,
            phase: sample.phase.as_str(),
            fork: sample.fork,
            iteration: sample.iteration,
            elapsed_secs: sample.elapsed.as_secs_f64(),
            completed: sample.completed,
            failed: sample.failed,
            timed_out: sample.timed_out,
            throughput: sample.throughput(),
            p50_latency_ms: sample.p50_us as f64 / 1000.0,
            p99_latency_ms: sample.p99_us as f64 / 1000.0,
        }
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    config: &'a str,
    summaries: &'a [VariantSummary],
    samples: Vec<SampleRecord>,
}

/// Export full results (summaries plus every sample) to a JSON file
pub fn write_json(
    config_summary: &str,
    samples: &[RunSample],
    summaries: &[VariantSummary],
    path: &Path,
) -> io::Result<()> {
    let document = ReportDocument {
        config: config_summary,
        summaries,
        samples: samples.iter().map(SampleRecord::from_sample).collect(),
    };
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &document)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Export one CSV row per sample
pub fn write_csv(samples: &[RunSample], path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(
        file,
        "variant,phase,fork,iteration,elapsed_secs,completed,failed,timed_out,throughput,p50_ms,p99_ms"
    )?;
    for sample in samples {
        writeln!(
            file,
            "{},{},{},{},{:.4},{},{},{},{:.2},{:.3},{:.3}",
            sample.variant,
            sample.phase.as_str(),
            sample.fork,
            sample.iteration,
            sample.elapsed.as_secs_f64(),
            sample.completed,
            sample.failed,
            sample.timed_out,
            sample.throughput(),
            sample.p50_us as f64 / 1000.0,
            sample.p99_us as f64 / 1000.0,
        )?;
    }
    Ok(())
}

/// Format large numbers with thousands separators
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::Phase;
    use std::time::Duration;

    fn sample(variant: VariantKind, phase: Phase, completed: u64, millis: u64) -> RunSample {
        RunSample {
            variant,
            phase,
            fork: 0,
            iteration: 0,
            elapsed: Duration::from_millis(millis),
            completed,
            failed: 0,
            timed_out: false,
            p50_us: 1000,
            p99_us: 5000,
        }
    }

    #[test]
    fn test_summarize_excludes_warmup() {
        let samples = vec![
            sample(VariantKind::Text, Phase::Warmup, 1_000_000, 1000),
            sample(VariantKind::Text, Phase::Measurement, 100, 1000),
            sample(VariantKind::Text, Phase::Measurement, 300, 1000),
        ];

        let summaries = summarize(&samples);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].samples, 2);
        assert_eq!(summaries[0].mean_throughput, 200.0);
        assert_eq!(summaries[0].total_completed, 400);
    }

    #[test]
    fn test_summarize_stddev() {
        let samples = vec![
            sample(VariantKind::Binary, Phase::Measurement, 100, 1000),
            sample(VariantKind::Binary, Phase::Measurement, 300, 1000),
        ];
        let summary = &summarize(&samples)[0];
        // Sample stddev of {100, 300} is sqrt(2 * 100^2 / 1)
        assert!((summary.stddev_throughput - 141.42).abs() < 0.01);
        assert_eq!(summary.min_throughput, 100.0);
        assert_eq!(summary.max_throughput, 300.0);
    }

    #[test]
    fn test_summarize_keeps_variant_order() {
        let samples = vec![
            sample(VariantKind::Binary, Phase::Measurement, 10, 100),
            sample(VariantKind::Text, Phase::Measurement, 10, 100),
        ];
        let summaries = summarize(&samples);
        assert_eq!(summaries[0].variant, VariantKind::Binary);
        assert_eq!(summaries[1].variant, VariantKind::Text);
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(123), "123");
        assert_eq!(format_count(1234), "1,234");
        assert_eq!(format_count(1234567), "1,234,567");
    }
}
