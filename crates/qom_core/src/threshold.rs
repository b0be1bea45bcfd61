use crate::loopers::{Grid, GridIndex};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Which extremum to locate and which of its occurrences to keep.
///
/// Occurrences are ordered row-major: `*_min` keeps the first, `*_max` the last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    MinMin,
    MinMax,
    #[default]
    MaxMin,
    MaxMax,
}

impl ThresholdMode {
    /// True when the extremum sought is a maximum.
    pub fn targets_max(self) -> bool {
        matches!(self, ThresholdMode::MaxMin | ThresholdMode::MaxMax)
    }

    fn keeps_last(self) -> bool {
        matches!(self, ThresholdMode::MinMax | ThresholdMode::MaxMax)
    }
}

/// Index of the threshold cell in `grid`. NaN cells are skipped and rows may
/// have different lengths.
pub fn threshold_index(grid: &Grid, mode: ThresholdMode) -> Result<GridIndex> {
    let cells: Vec<(GridIndex, f64)> = match grid {
        Grid::OneD(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| (GridIndex::One(i), *v))
            .collect(),
        Grid::TwoD(rows) => rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(move |(j, v)| (GridIndex::Two(i, j), *v))
            })
            .collect(),
    };
    if cells.is_empty() {
        bail!("Cannot extract a threshold from an empty grid.");
    }

    let mut best: Option<(GridIndex, f64)> = None;
    for (index, value) in cells.into_iter().filter(|(_, v)| !v.is_nan()) {
        let replace = match best {
            None => true,
            Some((_, current)) => {
                let better = if mode.targets_max() {
                    value > current
                } else {
                    value < current
                };
                better || (value == current && mode.keeps_last())
            }
        };
        if replace {
            best = Some((index, value));
        }
    }

    match best {
        Some((index, _)) => Ok(index),
        None => bail!("Cannot extract a threshold: every value is NaN."),
    }
}

#[cfg(test)]
mod tests {
    use super::{threshold_index, ThresholdMode};
    use crate::loopers::{Grid, GridIndex};

    #[test]
    fn picks_first_or_last_occurrence() {
        let grid = Grid::OneD(vec![1.0, 3.0, 5.0, 5.0, 2.0]);
        assert_eq!(threshold_index(&grid, ThresholdMode::MaxMin).unwrap(), GridIndex::One(2));
        assert_eq!(threshold_index(&grid, ThresholdMode::MaxMax).unwrap(), GridIndex::One(3));
        assert_eq!(threshold_index(&grid, ThresholdMode::MinMin).unwrap(), GridIndex::One(0));
        assert_eq!(threshold_index(&grid, ThresholdMode::MinMax).unwrap(), GridIndex::One(0));
    }

    #[test]
    fn two_d_is_row_major_and_skips_nan() {
        let grid = Grid::TwoD(vec![
            vec![f64::NAN, 4.0, 1.0],
            vec![4.0, 0.5],
            vec![f64::NAN],
        ]);
        assert_eq!(threshold_index(&grid, ThresholdMode::MaxMin).unwrap(), GridIndex::Two(0, 1));
        assert_eq!(threshold_index(&grid, ThresholdMode::MaxMax).unwrap(), GridIndex::Two(1, 0));
        assert_eq!(threshold_index(&grid, ThresholdMode::MinMin).unwrap(), GridIndex::Two(1, 1));
    }

    #[test]
    fn empty_and_all_nan_grids_fail() {
        assert!(threshold_index(&Grid::OneD(vec![]), ThresholdMode::MaxMin).is_err());
        let err = threshold_index(&Grid::TwoD(vec![vec![f64::NAN]]), ThresholdMode::MinMin)
            .unwrap_err();
        assert!(format!("{err}").contains("NaN"));
    }

    #[test]
    fn mode_names_match_config_codes() {
        let mode: ThresholdMode = serde_json::from_str("\"min_max\"").unwrap();
        assert_eq!(mode, ThresholdMode::MinMax);
        assert!(!mode.targets_max());
    }
}
