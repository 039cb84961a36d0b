//! Greedy maximum-coverage selection of launch candidates.

use crate::cellset::{BitGrid, CellSet};
use crate::grid::Candidate;

/// One selected candidate with the cells it newly covers.
#[derive(Debug, Clone)]
pub struct SelectedSegment {
    pub candidate_index: usize,
    pub new_cells: Vec<u32>,
}

#[derive(Debug)]
pub struct Selection {
    pub segments: Vec<SelectedSegment>,
    pub covered: BitGrid,
}

/// Runs greedy selection over `(candidates[i], visible[i])` pairs.
///
/// Each round scores every remaining candidate by its novel coverage, damped
/// above the preferred segment size: `gain` when `gain <= preferred`, else
/// `preferred` (the damping factor `preferred/gain` cancels against the
/// gain). Ties fall to larger raw gain, then access priority, then the lower
/// candidate index, which keeps the result deterministic.
pub fn select_segments(
    candidates: &[Candidate],
    visible: &[CellSet],
    frame_len: usize,
    preferred_cells: usize,
) -> Selection {
    debug_assert_eq!(candidates.len(), visible.len());
    let preferred = preferred_cells.max(1);
    let min_useful = ((0.02 * preferred as f64) as usize).max(1);

    let mut covered = BitGrid::new(frame_len);
    let mut selected = vec![false; candidates.len()];
    let mut segments = Vec::new();

    loop {
        let mut best: Option<(usize, usize, usize)> = None; // (score, gain, idx)
        for (idx, set) in visible.iter().enumerate() {
            if selected[idx] {
                continue;
            }
            let gain = set.difference_size(&covered);
            if gain == 0 {
                continue;
            }
            let score = gain.min(preferred);
            let better = match best {
                None => true,
                Some((best_score, best_gain, best_idx)) => {
                    let best_access = candidates[best_idx].access.priority();
                    let access = candidates[idx].access.priority();
                    (score, gain, std::cmp::Reverse(access))
                        > (best_score, best_gain, std::cmp::Reverse(best_access))
                }
            };
            if better {
                best = Some((score, gain, idx));
            }
        }

        let Some((_, gain, idx)) = best else {
            break;
        };
        if gain < min_useful {
            tracing::debug!(gain, min_useful, "stopping selection below useful gain");
            break;
        }

        let new_cells = visible[idx].difference(&covered);
        visible[idx].union_into(&mut covered);
        selected[idx] = true;
        tracing::debug!(
            candidate = candidates[idx].index,
            gain,
            total_covered = covered.count_ones(),
            "selected segment"
        );
        segments.push(SelectedSegment {
            candidate_index: idx,
            new_cells,
        });
    }

    Selection { segments, covered }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessMode;

    fn candidate(index: usize, access: AccessMode) -> Candidate {
        Candidate {
            index,
            x: 0.0,
            y: 0.0,
            row: 0,
            col: 0,
            ground_elev_m: 0.0,
            access,
        }
    }

    fn sets(raw: &[Vec<u32>], frame_len: usize) -> Vec<CellSet> {
        raw.iter()
            .map(|cells| CellSet::from_sorted(cells.clone(), frame_len))
            .collect()
    }

    #[test]
    fn covers_greedily_and_disjointly() {
        let candidates: Vec<Candidate> =
            (0..3).map(|i| candidate(i, AccessMode::Anywhere)).collect();
        let visible = sets(
            &[vec![0, 1, 2, 3, 4, 5], vec![4, 5, 6, 7], vec![8, 9]],
            64,
        );
        let selection = select_segments(&candidates, &visible, 64, 100);
        assert_eq!(selection.segments.len(), 3);
        assert_eq!(selection.segments[0].candidate_index, 0);
        // Second pick only gets the novel cells.
        assert_eq!(selection.segments[1].new_cells, vec![6, 7]);
        assert_eq!(selection.covered.count_ones(), 10);

        // Disjointness across all picks.
        let mut seen = std::collections::HashSet::new();
        for segment in &selection.segments {
            for cell in &segment.new_cells {
                assert!(seen.insert(*cell));
            }
        }
    }

    #[test]
    fn oversize_ties_resolve_to_larger_gain() {
        let candidates: Vec<Candidate> =
            (0..2).map(|i| candidate(i, AccessMode::Anywhere)).collect();
        // Both exceed the preferred size of 3, so they tie on score.
        let a: Vec<u32> = (0..4).collect();
        let b: Vec<u32> = (10..20).collect();
        let visible = sets(&[a, b], 64);
        let selection = select_segments(&candidates, &visible, 64, 3);
        assert_eq!(selection.segments[0].candidate_index, 1);
    }

    #[test]
    fn access_priority_breaks_exact_ties() {
        let candidates = vec![
            candidate(0, AccessMode::OffRoad),
            candidate(1, AccessMode::Road),
            candidate(2, AccessMode::Trail),
        ];
        let visible = sets(&[vec![0, 1], vec![2, 3], vec![4, 5]], 64);
        let selection = select_segments(&candidates, &visible, 64, 100);
        assert_eq!(selection.segments[0].candidate_index, 1);
        assert_eq!(selection.segments[1].candidate_index, 2);
        assert_eq!(selection.segments[2].candidate_index, 0);
    }

    #[test]
    fn index_breaks_remaining_ties() {
        let candidates: Vec<Candidate> =
            (0..2).map(|i| candidate(i, AccessMode::Anywhere)).collect();
        let visible = sets(&[vec![0, 1], vec![2, 3]], 64);
        let selection = select_segments(&candidates, &visible, 64, 100);
        assert_eq!(selection.segments[0].candidate_index, 0);
    }

    #[test]
    fn stops_below_useful_gain() {
        let candidates: Vec<Candidate> =
            (0..2).map(|i| candidate(i, AccessMode::Anywhere)).collect();
        // Preferred 1000 cells -> threshold 20 cells.
        let big: Vec<u32> = (0..500).collect();
        let tiny: Vec<u32> = (600..610).collect();
        let visible = sets(&[big, tiny], 2048);
        let selection = select_segments(&candidates, &visible, 2048, 1000);
        assert_eq!(selection.segments.len(), 1);
        assert_eq!(selection.segments[0].candidate_index, 0);
    }

    #[test]
    fn empty_visible_sets_select_nothing() {
        let candidates = vec![candidate(0, AccessMode::Anywhere)];
        let visible = sets(&[Vec::new()], 64);
        let selection = select_segments(&candidates, &visible, 64, 10);
        assert!(selection.segments.is_empty());
        assert_eq!(selection.covered.count_ones(), 0);
    }

    #[test]
    fn coverage_is_monotone_in_selection_order() {
        let candidates: Vec<Candidate> =
            (0..4).map(|i| candidate(i, AccessMode::Anywhere)).collect();
        let visible = sets(&[vec![0, 1, 2], vec![2, 3], vec![3, 4, 5, 6], vec![7]], 64);
        let selection = select_segments(&candidates, &visible, 64, 100);
        let mut running = 0;
        for segment in &selection.segments {
            assert!(!segment.new_cells.is_empty());
            running += segment.new_cells.len();
        }
        assert_eq!(running, selection.covered.count_ones());
    }
}
