use std::collections::HashMap;

/// A named ratio derived from two or more raw counter values.
///
/// `required` lists the counter names `compute` reads from the intermediate value map.
/// If any of them is missing, `compute` returns `None` rather than panicking or
/// substituting a default.
pub struct Metric {
    name: &'static str,
    required: &'static [&'static str],
    compute: fn(&HashMap<String, f64>) -> Option<f64>,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn required_event_names(&self) -> &'static [&'static str] {
        self.required
    }

    /// Evaluates the metric against a map of already-summed raw counter values.
    pub fn compute(&self, values: &HashMap<String, f64>) -> Option<f64> {
        (self.compute)(values)
    }
}

fn ratio(values: &HashMap<String, f64>, numerator: &str, denominator: &str) -> Option<f64> {
    let numerator = *values.get(numerator)?;
    let denominator = *values.get(denominator)?;
    Some(numerator / denominator)
}

pub fn built_in_metrics() -> Vec<Metric> {
    vec![
        Metric {
            name: "cycles-per-instruction",
            required: &["cycles", "instructions"],
            compute: |v| ratio(v, "cycles", "instructions"),
        },
        // Named for the legacy formula it reproduces, not for what it actually measures:
        // references divided by misses, the inverse of what "hit ratio" usually means.
        Metric {
            name: "cache-hit-ratio",
            required: &["cache-references", "cache-misses"],
            compute: |v| ratio(v, "cache-references", "cache-misses"),
        },
        Metric {
            name: "dTLB-miss-ratio",
            required: &["dTLB-load-misses", "dTLB-loads"],
            compute: |v| ratio(v, "dTLB-load-misses", "dTLB-loads"),
        },
        Metric {
            name: "iTLB-miss-ratio",
            required: &["iTLB-load-misses", "iTLB-loads"],
            compute: |v| ratio(v, "iTLB-load-misses", "iTLB-loads"),
        },
        Metric {
            name: "L1-data-miss-ratio",
            required: &["L1-dcache-load-misses", "L1-dcache-loads"],
            compute: |v| ratio(v, "L1-dcache-load-misses", "L1-dcache-loads"),
        },
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cpi_divides_cycles_by_instructions() {
        let metric = built_in_metrics().into_iter().find(|m| m.name() == "cycles-per-instruction").unwrap();
        let mut values = HashMap::new();
        values.insert("cycles".to_owned(), 200.0);
        values.insert("instructions".to_owned(), 100.0);
        assert_eq!(metric.compute(&values), Some(2.0));
    }

    #[test]
    fn missing_dependency_yields_none() {
        let metric = built_in_metrics().into_iter().find(|m| m.name() == "cache-hit-ratio").unwrap();
        let values = HashMap::new();
        assert_eq!(metric.compute(&values), None);
    }
}
