/// Classification of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// An absolute quantity, e.g. a number of covered blocks.
    CoverageAbsolute,
    /// A percentage in the range 0..=100.
    CoveragePercentual,
    /// A quality indicator such as cyclomatic complexity.
    CodeQuality,
}

/// Direction used when two values of the same metric are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricMergeOrder {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

/// A named metric value attached to a method.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub explanation_url: Option<String>,
    pub metric_type: MetricType,
    pub value: Option<f64>,
    pub merge_order: MetricMergeOrder,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        explanation_url: Option<String>,
        metric_type: MetricType,
        value: Option<f64>,
    ) -> Self {
        Metric {
            name: name.into(),
            explanation_url,
            metric_type,
            value,
            merge_order: MetricMergeOrder::default(),
        }
    }

    pub fn with_merge_order(mut self, merge_order: MetricMergeOrder) -> Self {
        self.merge_order = merge_order;
        self
    }

    pub fn cyclomatic_complexity(value: Option<f64>) -> Self {
        Metric::new(
            "Cyclomatic complexity",
            Some("https://en.wikipedia.org/wiki/Cyclomatic_complexity".into()),
            MetricType::CodeQuality,
            value,
        )
        .with_merge_order(MetricMergeOrder::LowerIsBetter)
    }

    pub fn npath_complexity(value: Option<f64>) -> Self {
        Metric::new(
            "NPath complexity",
            Some("https://modess.io/npath-complexity-cyclomatic-complexity-explained/".into()),
            MetricType::CodeQuality,
            value,
        )
        .with_merge_order(MetricMergeOrder::LowerIsBetter)
    }

    pub fn crap_score(value: Option<f64>) -> Self {
        Metric::new(
            "Crap Score",
            Some("https://googletesting.blogspot.de/2011/02/this-code-is-crap.html".into()),
            MetricType::CodeQuality,
            value,
        )
        .with_merge_order(MetricMergeOrder::LowerIsBetter)
    }

    pub fn line_coverage(value: Option<f64>) -> Self {
        Metric::new("Line coverage", None, MetricType::CoveragePercentual, value)
    }

    pub fn sequence_coverage(value: Option<f64>) -> Self {
        Metric::new(
            "Sequence coverage",
            None,
            MetricType::CoveragePercentual,
            value,
        )
    }

    pub fn branch_coverage(value: Option<f64>) -> Self {
        Metric::new(
            "Branch coverage",
            None,
            MetricType::CoveragePercentual,
            value,
        )
    }

    pub fn blocks_covered(value: Option<f64>) -> Self {
        Metric::new("Blocks covered", None, MetricType::CoverageAbsolute, value)
    }

    pub fn blocks_not_covered(value: Option<f64>) -> Self {
        Metric::new(
            "Blocks not covered",
            None,
            MetricType::CoverageAbsolute,
            value,
        )
        .with_merge_order(MetricMergeOrder::LowerIsBetter)
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Metric {}

/// The metrics recorded for a single method.
///
/// Identity is the pair of full name and line so that partial classes
/// contributing methods of the same name on different lines stay apart.
#[derive(Debug, Clone)]
pub struct MethodMetric {
    pub full_name: String,
    pub short_name: String,
    pub line: Option<i32>,
    metrics: Vec<Metric>,
}

impl MethodMetric {
    pub fn new(full_name: impl Into<String>, short_name: impl Into<String>) -> Self {
        MethodMetric {
            full_name: full_name.into(),
            short_name: short_name.into(),
            line: None,
            metrics: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: Option<i32>) -> Self {
        self.line = line;
        self
    }

    #[must_use]
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn add_metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    pub fn insert_metric(&mut self, index: usize, metric: Metric) {
        self.metrics.insert(index, metric);
    }

    /// Merges another set of metrics for the same method. Values present on
    /// both sides are combined according to the metric's merge order, values
    /// missing on one side are taken from the other.
    pub fn merge(&mut self, other: MethodMetric) {
        for metric in other.metrics {
            match self.metrics.iter_mut().find(|m| **m == metric) {
                Some(existing) => match (existing.value, metric.value) {
                    (None, Some(_)) => existing.value = metric.value,
                    (Some(a), Some(b)) => {
                        existing.value = Some(match existing.merge_order {
                            MetricMergeOrder::HigherIsBetter => a.max(b),
                            MetricMergeOrder::LowerIsBetter => a.min(b),
                        });
                    }
                    _ => {}
                },
                None => self.metrics.push(metric),
            }
        }
    }
}

impl PartialEq for MethodMetric {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name && self.line == other.line
    }
}

impl Eq for MethodMetric {}
