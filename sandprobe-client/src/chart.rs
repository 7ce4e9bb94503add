use std::collections::VecDeque;

/// Number of points a chart keeps before it starts evicting the oldest one.
pub const WINDOW: usize = 16;

const Y_MIN: f64 = 0.0;
const Y_MAX: f64 = 100.0;
const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// A rolling line chart of percentages with a fixed [0, 100] axis.
#[derive(Debug, Clone)]
pub struct Chart {
    label: &'static str,
    labels: VecDeque<String>,
    values: VecDeque<f64>,
}

impl Chart {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            labels: VecDeque::with_capacity(WINDOW),
            values: VecDeque::with_capacity(WINDOW),
        }
    }

    /// Appends a point, evicting the oldest label and value first once the window is full.
    pub fn push(&mut self, label: impl Into<String>, value: f64) {
        if self.labels.len() >= WINDOW {
            self.labels.pop_front();
            self.values.pop_front();
        }
        self.labels.push_back(label.into());
        self.values.push_back(value);
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[cfg(test)]
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    #[cfg(test)]
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// One bar per point, scaled to the chart's axis. Values outside it are clamped.
    pub fn sparkline(&self) -> String {
        self.values
            .iter()
            .map(|v| {
                let ratio = ((v - Y_MIN) / (Y_MAX - Y_MIN)).clamp(0.0, 1.0);
                // NaN survives clamp but casts to index 0
                BARS[(ratio * (BARS.len() - 1) as f64).round() as usize]
            })
            .collect()
    }
}
