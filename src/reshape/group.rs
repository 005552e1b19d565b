use std::ops::Range;

/// A half-open span of columns `[start, end)` between two boundary columns.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ColumnGroup {
    start: usize,
    end: usize,
}

impl ColumnGroup {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Turns sorted boundary positions into the groups that lie between consecutive boundaries.
/// Adjacent boundaries enclose no columns; those empty groups are dropped.
pub fn partition(boundaries: &[usize]) -> Vec<ColumnGroup> {
    boundaries
        .windows(2)
        .map(|w| ColumnGroup::new(w[0] + 1, w[1]))
        .filter(|g| !g.is_empty())
        .collect()
}

/// The ordered groups of a worksheet. The first group is the anchor block and every other group
/// is a measure block.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Layout {
    groups: Vec<ColumnGroup>,
}

impl Layout {
    pub fn new(groups: Vec<ColumnGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[ColumnGroup] {
        &self.groups
    }

    pub fn anchor(&self) -> Option<&ColumnGroup> {
        self.groups.first()
    }

    pub fn measures(&self) -> &[ColumnGroup] {
        self.groups.get(1..).unwrap_or_default()
    }

    /// The number of measure columns across all measure blocks.
    pub fn measure_width(&self) -> usize {
        self.measures().iter().map(ColumnGroup::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition() {
        let groups = partition(&[0, 3, 6, 9]);
        assert_eq!(
            groups,
            vec![
                ColumnGroup::new(1, 3),
                ColumnGroup::new(4, 6),
                ColumnGroup::new(7, 9)
            ]
        );
    }

    #[test]
    fn test_partition_drops_empty_groups() {
        let groups = partition(&[0, 2, 3, 4, 7]);
        assert_eq!(groups, vec![ColumnGroup::new(1, 2), ColumnGroup::new(5, 7)]);
    }

    #[test]
    fn test_partition_too_few_boundaries() {
        assert!(partition(&[]).is_empty());
        assert!(partition(&[4]).is_empty());
    }

    #[test]
    fn test_layout() {
        let layout = Layout::new(partition(&[0, 2, 5, 7]));
        assert_eq!(layout.anchor(), Some(&ColumnGroup::new(1, 2)));
        assert_eq!(layout.measures().len(), 2);
        assert_eq!(layout.measure_width(), 3);

        let empty = Layout::default();
        assert!(empty.anchor().is_none());
        assert!(empty.measures().is_empty());
        assert_eq!(empty.measure_width(), 0);
    }
}
