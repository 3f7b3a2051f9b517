use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const SETUP_TIME: &str = "before (setup time)";
pub const CLEANUP_TIME: &str = "after (cleanup time)";
pub const TOTAL: &str = "total";

/// Duration of a leaf step, or the breakdown of a step with children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepTiming {
    Seconds(f64),
    Breakdown(IndexMap<String, StepTiming>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

#[derive(Debug)]
struct StepNode {
    name: String,
    display: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    start_index: usize,
    end_index: usize,
    parent: Option<StepId>,
    /// First-level steps stay where they were opened.
    anchored: bool,
    /// Closed children, keyed by a unique display name.
    children: IndexMap<String, StepId>,
    /// Open children by name; `None` once the step is closed.
    open_children: Option<IndexMap<String, StepId>>,
}

/// Steps reconstructed from a linear log.
///
/// Steps are opened by [`StepTree::update`] along a path of names and
/// closed explicitly. A closed step that is not anchored moves under the
/// smallest closed sibling whose line range contains it, and may in turn
/// adopt siblings that fit inside its own range.
#[derive(Debug)]
pub struct StepTree {
    steps: Vec<StepNode>,
}

impl StepTree {
    pub fn new(name: &str, start_time: DateTime<Utc>, start_index: usize) -> Self {
        let mut tree = Self { steps: Vec::new() };
        tree.push(name, start_time, start_index, None);
        tree
    }

    fn push(
        &mut self,
        name: &str,
        start_time: DateTime<Utc>,
        start_index: usize,
        parent: Option<StepId>,
    ) -> StepId {
        let anchored = match parent {
            Some(parent) => self.steps[parent.0].parent.is_none(),
            None => true,
        };
        let id = StepId(self.steps.len());
        self.steps.push(StepNode {
            name: name.to_string(),
            display: name.to_string(),
            start_time,
            end_time: start_time,
            start_index,
            end_index: start_index,
            parent,
            anchored,
            children: IndexMap::new(),
            open_children: Some(IndexMap::new()),
        });
        id
    }

    pub fn root(&self) -> StepId {
        StepId(0)
    }

    pub fn name(&self, step: StepId) -> &str {
        &self.steps[step.0].name
    }

    pub fn parent(&self, step: StepId) -> Option<StepId> {
        self.steps[step.0].parent
    }

    pub fn start_time(&self, step: StepId) -> DateTime<Utc> {
        self.steps[step.0].start_time
    }

    /// Inclusive line range of the step.
    #[cfg(test)]
    pub fn lines(&self, step: StepId) -> (usize, usize) {
        let node = &self.steps[step.0];
        (node.start_index, node.end_index)
    }

    pub fn duration(&self, step: StepId) -> f64 {
        let node = &self.steps[step.0];
        seconds_between(node.start_time, node.end_time)
    }

    pub fn set_display(&mut self, step: StepId, display: impl Into<String>) {
        self.steps[step.0].display = display.into();
    }

    pub fn is_open(&self, step: StepId) -> bool {
        self.steps[step.0].open_children.is_some()
    }

    /// Closed children, by display key.
    #[cfg(test)]
    pub fn children(&self, step: StepId) -> impl Iterator<Item = (&str, StepId)> {
        self.steps[step.0].children.iter().map(|(key, id)| (key.as_str(), *id))
    }

    pub fn open_child_names(&self, step: StepId) -> Vec<String> {
        self.steps[step.0]
            .open_children
            .as_ref()
            .map(|open| open.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The open step at `path` below `step`.
    pub fn get(&self, step: StepId, path: &[&str]) -> Option<StepId> {
        let mut current = step;
        for name in path {
            current = *self.steps[current.0].open_children.as_ref()?.get(*name)?;
        }
        Some(current)
    }

    /// Extends `step` and every step along `path` to `time` / `index`, opening
    /// missing steps on the way. Returns the step at the end of the path.
    pub fn update(&mut self, step: StepId, path: &[&str], time: DateTime<Utc>, index: usize) -> StepId {
        let mut current = step;
        self.touch(current, time, Some(index));
        for name in path {
            let existing = match &self.steps[current.0].open_children {
                Some(open) => open.get(*name).copied(),
                None => return current,
            };
            let child = match existing {
                Some(child) => child,
                None => {
                    let child = self.push(name, time, index, Some(current));
                    if let Some(open) = &mut self.steps[current.0].open_children {
                        open.insert((*name).to_string(), child);
                    }
                    child
                }
            };
            self.touch(child, time, Some(index));
            current = child;
        }
        current
    }

    /// Moves the end time of a step without touching its line range.
    pub fn extend(&mut self, step: StepId, time: DateTime<Utc>) {
        self.touch(step, time, None);
    }

    fn touch(&mut self, step: StepId, time: DateTime<Utc>, index: Option<usize>) {
        let node = &mut self.steps[step.0];
        node.end_time = time;
        if let Some(index) = index {
            node.end_index = index;
        }
    }

    /// Closes a step and everything open below it, then files it under its
    /// best closed parent.
    pub fn close(&mut self, step: StepId) {
        let Some(open) = self.steps[step.0].open_children.clone() else {
            return;
        };
        for child in open.values() {
            self.close(*child);
        }
        self.steps[step.0].open_children = None;

        if let Some(parent) = self.steps[step.0].parent {
            self.close_child(parent, step);
        }
    }

    pub fn close_path(&mut self, step: StepId, path: &[&str]) {
        if let Some(target) = self.get(step, path) {
            self.close(target);
        }
    }

    /// Closes every open child except the one named by `path`, recursively
    /// along the path.
    pub fn close_all_except(&mut self, step: StepId, path: &[&str]) {
        let Some((keep, rest)) = path.split_first() else {
            return;
        };
        let open = self.steps[step.0].open_children.clone().unwrap_or_default();
        for (name, child) in open {
            if name == *keep {
                self.close_all_except(child, rest);
            } else {
                self.close(child);
            }
        }
    }

    pub fn close_all(&mut self, step: StepId) {
        let open = self.steps[step.0].open_children.clone().unwrap_or_default();
        for child in open.into_values() {
            self.close(child);
        }
    }

    fn close_child(&mut self, parent: StepId, child: StepId) {
        let name = self.steps[child.0].name.clone();
        if let Some(open) = &mut self.steps[parent.0].open_children {
            if open.get(&name) == Some(&child) {
                open.shift_remove(&name);
            }
        }

        let target = if self.steps[child.0].anchored {
            parent
        } else {
            let siblings: Vec<StepId> = self.steps[parent.0].children.values().copied().collect();
            siblings
                .into_iter()
                .find_map(|sibling| self.best_parent(sibling, child))
                .unwrap_or(parent)
        };
        self.add_closed_child(target, child);
    }

    fn add_closed_child(&mut self, parent: StepId, child: StepId) {
        let others: Vec<(String, StepId)> = self.steps[parent.0]
            .children
            .iter()
            .map(|(key, id)| (key.clone(), *id))
            .collect();
        for (key, other) in others {
            if other == child || self.steps[other.0].anchored {
                continue;
            }
            if let Some(best) = self.best_parent(child, other) {
                self.steps[parent.0].children.shift_remove(&key);
                self.add_closed_child(best, other);
            }
        }

        let display = self.steps[child.0].display.clone();
        let mut key = display.clone();
        let mut index = 1;
        while self.steps[parent.0].children.contains_key(&key) {
            index += 1;
            key = format!("{display} {index}");
        }
        self.steps[child.0].parent = Some(parent);
        self.steps[parent.0].children.insert(key, child);
    }

    /// The smallest step at or below `candidate` whose line range contains
    /// `step`.
    fn best_parent(&self, candidate: StepId, step: StepId) -> Option<StepId> {
        let outer = &self.steps[candidate.0];
        let inner = &self.steps[step.0];
        if candidate == step || outer.start_index > inner.start_index || outer.end_index < inner.end_index {
            return None;
        }
        outer
            .children
            .values()
            .find_map(|child| self.best_parent(*child, step))
            .or(Some(candidate))
    }

    /// Timing summary of a closed step. Entries shorter than `threshold`
    /// seconds are dropped; a step without a breakdown is its duration.
    pub fn step_timing(&self, step: StepId, threshold: f64) -> StepTiming {
        let node = &self.steps[step.0];
        let duration = self.duration(step);
        let mut result = IndexMap::new();

        let children: Vec<(&String, &StepNode)> = node
            .children
            .iter()
            .map(|(key, id)| (key, &self.steps[id.0]))
            .collect();
        let first_start = children.iter().map(|(_, c)| c.start_time).min();
        let last_end = children.iter().map(|(_, c)| c.end_time).max();

        if let Some(first_start) = first_start {
            let before = seconds_between(node.start_time, first_start);
            if first_start != node.start_time && before.abs() >= threshold {
                result.insert(SETUP_TIME.to_string(), StepTiming::Seconds(before));
            }
        }
        for (key, id) in &node.children {
            match self.step_timing(*id, threshold) {
                StepTiming::Seconds(seconds) if seconds < threshold => {}
                StepTiming::Breakdown(breakdown) if breakdown.is_empty() => {}
                timing => {
                    result.insert(key.clone(), timing);
                }
            }
        }
        if let Some(last_end) = last_end {
            let after = seconds_between(last_end, node.end_time);
            if last_end != node.end_time && after.abs() >= threshold {
                result.insert(CLEANUP_TIME.to_string(), StepTiming::Seconds(after));
            }
        }

        if result.is_empty() {
            return StepTiming::Seconds(duration);
        }
        if duration > threshold && result.len() > 1 {
            result.shift_insert(0, TOTAL.to_string(), StepTiming::Seconds(duration));
        }
        StepTiming::Breakdown(result)
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}
