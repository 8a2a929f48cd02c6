use chrono::NaiveDate;

/// One contiguous slice of the run's sample list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<'a> {
    pub index: usize,
    /// Offset of the first sample in the full list.
    pub start: usize,
    /// Offset one past the last sample in the full list.
    pub end: usize,
    pub sample_names: &'a [String],
}

impl Batch<'_> {
    /// `{prefix}_{date}_{start}_{end}`; used as the batch directory and the
    /// remote upload directory.
    pub fn action_name(&self, prefix: &str, run_date: NaiveDate) -> String {
        format!(
            "{prefix}_{}_{}_{}",
            run_date.format("%Y-%m-%d"),
            self.start,
            self.end
        )
    }

    pub fn len(&self) -> usize {
        self.sample_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_names.is_empty()
    }
}

/// Lazily yields fixed-size batches in input order; only the last batch may
/// be shorter.
#[derive(Debug, Clone)]
pub struct BatchPlanner<'a> {
    names: &'a [String],
    size: usize,
    next: usize,
}

impl<'a> BatchPlanner<'a> {
    /// A `size` of zero is treated as one.
    pub fn new(names: &'a [String], size: usize) -> Self {
        Self {
            names,
            size: size.max(1),
            next: 0,
        }
    }

    pub fn batch_count(&self) -> usize {
        self.names.len().div_ceil(self.size)
    }
}

impl<'a> Iterator for BatchPlanner<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next * self.size;
        if start >= self.names.len() {
            return None;
        }
        let end = (start + self.size).min(self.names.len());
        let batch = Batch {
            index: self.next,
            start,
            end,
            sample_names: &self.names[start..end],
        };
        self.next += 1;
        Some(batch)
    }
}
