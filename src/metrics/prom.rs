use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts, Registry, TextEncoder};

use crate::error::ExporterError;
use crate::metrics::{MetricShape, Sample};

/// Prometheus descriptor for a shape.
pub fn descriptor(shape: &MetricShape) -> Result<Desc, ExporterError> {
    let desc = Desc::new(
        shape.name.to_string(),
        shape.help.to_string(),
        shape.label_names.iter().map(|l| l.to_string()).collect(),
        HashMap::new(),
    )?;
    Ok(desc)
}

/// Turns samples into gauge families, one per shape that has samples.
///
/// Samples with identical label values share one series, which keeps the
/// earliest expiry. A chain decoded from one file yields its leaf and CA under
/// the same labels, and the leaf usually expires first.
pub fn gauge_families(shapes: &[&MetricShape], samples: &[Sample]) -> Vec<MetricFamily> {
    let mut families = Vec::new();
    for shape in shapes {
        let gauge = match GaugeVec::new(Opts::new(shape.name, shape.help), shape.label_names) {
            Ok(gauge) => gauge,
            Err(e) => {
                tracing::error!(metric = shape.name, error = %e, "could not declare metric");
                continue;
            }
        };

        let series = earliest_per_series(shape, samples);
        let mut populated = false;
        for (label_values, value) in series {
            let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
            match gauge.get_metric_with_label_values(&values) {
                Ok(series) => {
                    series.set(value);
                    populated = true;
                }
                Err(e) => {
                    tracing::error!(metric = shape.name, error = %e, "dropping sample");
                }
            }
        }
        if populated {
            families.extend(gauge.collect());
        }
    }
    families
}

fn earliest_per_series<'a>(
    shape: &MetricShape,
    samples: &'a [Sample],
) -> BTreeMap<&'a [String], f64> {
    let mut series: BTreeMap<&[String], f64> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.metric_name == shape.name) {
        match series.entry(sample.label_values.as_slice()) {
            Entry::Vacant(entry) => {
                entry.insert(sample.value);
            }
            Entry::Occupied(mut entry) => {
                let kept = entry.get().min(sample.value);
                tracing::warn!(
                    metric = shape.name,
                    labels = ?sample.label_values,
                    kept,
                    "several samples share one series, keeping the earliest"
                );
                entry.insert(kept);
            }
        }
    }
    series
}

/// Gathers `registry` and renders it in the text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String, ExporterError> {
    let metric_families = registry.gather();
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&metric_families, &mut buffer)?;
    Ok(buffer)
}
