use std::ops::RangeInclusive;

/// Marks interesting lines of a log and turns them into contiguous blocks.
///
/// Blocks separated by a single unmarked line are glued together, and a block
/// always covers at least two lines unless it starts on the last line.
#[derive(Debug, Clone)]
pub struct BlockMarker {
    marked: Vec<bool>,
}

impl BlockMarker {
    pub fn new(line_count: usize) -> Self {
        Self {
            marked: vec![false; line_count],
        }
    }

    /// Marks `min..=max`, clamped to the log.
    pub fn mark(&mut self, min: isize, max: isize) {
        if self.marked.is_empty() || max < 0 {
            return;
        }
        let min = usize::try_from(min).unwrap_or(0);
        let max = usize::try_from(max)
            .unwrap_or(0)
            .min(self.marked.len() - 1);
        for line in min..=max {
            self.marked[line] = true;
        }
    }

    pub fn is_marked(&self, line: usize) -> bool {
        self.marked.get(line).copied().unwrap_or(false)
    }

    /// Disjoint, sorted, inclusive line ranges.
    pub fn blocks(&self) -> Vec<RangeInclusive<usize>> {
        let mut blocks = Vec::new();
        let mut range_start: Option<usize> = None;

        for i in 0..self.marked.len() {
            let bridges_gap = i > 0 && self.is_marked(i - 1) && self.is_marked(i + 1);
            let too_short = i > 0 && range_start == Some(i - 1);

            if self.marked[i] || bridges_gap || too_short {
                range_start.get_or_insert(i);
            } else if let Some(start) = range_start.take() {
                blocks.push(start..=i - 1);
            }
        }

        if let Some(start) = range_start {
            blocks.push(start..=self.marked.len() - 1);
        }
        blocks
    }
}
