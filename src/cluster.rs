//! Distance-based merging of duplicate detections.
//!
//! Overlapping tiles see the same boat several times, so nearby detections
//! are grouped with average-linkage agglomerative clustering and each group
//! is condensed to a single representative. The dendrogram is cut at a
//! distance cutoff: pixels within one image, degrees across images.

use ndarray::Array2;

use crate::types::{Boat, ClassLabel, Detection};

/// Anything with a 2-d position that can be clustered.
pub trait ClusterPoint {
    fn pos(&self) -> (f64, f64);
}

impl ClusterPoint for Detection {
    fn pos(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl ClusterPoint for Boat {
    fn pos(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Pairwise Euclidean distance matrix between point positions.
fn distance_matrix(points: &[impl ClusterPoint]) -> Array2<f64> {
    let n = points.len();
    let mut distances = Array2::zeros((n, n));
    for i in 0..n {
        let (xi, yi) = points[i].pos();
        for j in (i + 1)..n {
            let (xj, yj) = points[j].pos();
            let d = ((xi - xj).powi(2) + (yi - yj).powi(2)).sqrt();
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }
    distances
}

/// Assign a cluster index to every point.
///
/// Repeatedly merges the pair of clusters with the smallest average
/// inter-cluster distance until that distance exceeds `cutoff`
/// (Lance-Williams update). Average linkage is monotone, so the greedy
/// cut is equivalent to cutting the full dendrogram at `cutoff`.
pub fn assign_clusters(points: &[impl ClusterPoint], cutoff: f64) -> Vec<usize> {
    let n = points.len();
    if n < 2 {
        return vec![0; n];
    }

    let mut distances = distance_matrix(points);
    // members[i] is Some(point indices) while cluster i is alive.
    let mut members: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if members[i].is_none() {
                continue;
            }
            for j in (i + 1)..n {
                if members[j].is_none() {
                    continue;
                }
                let d = distances[[i, j]];
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((i, j, d));
                }
            }
        }
        let Some((i, j, d)) = best else { break };
        if d > cutoff {
            break;
        }

        let ni = members[i].as_ref().map_or(0, Vec::len) as f64;
        let nj = members[j].as_ref().map_or(0, Vec::len) as f64;
        for k in 0..n {
            if k == i || k == j || members[k].is_none() {
                continue;
            }
            let merged = (ni * distances[[i, k]] + nj * distances[[j, k]]) / (ni + nj);
            distances[[i, k]] = merged;
            distances[[k, i]] = merged;
        }
        let absorbed = members[j].take().unwrap_or_default();
        if let Some(kept) = members[i].as_mut() {
            kept.extend(absorbed);
        }
    }

    let mut assignment = vec![0; n];
    for (cluster, group) in members.iter().flatten().enumerate() {
        for &point in group {
            assignment[point] = cluster;
        }
    }
    assignment
}

/// Group points into clusters under the given distance cutoff.
pub fn cluster<T: ClusterPoint>(points: Vec<T>, cutoff: f64) -> Vec<Vec<T>> {
    let assignment = assign_clusters(&points, cutoff);
    let n_clusters = assignment.iter().copied().max().map_or(0, |m| m + 1);
    let mut groups: Vec<Vec<T>> = (0..n_clusters).map(|_| Vec::new()).collect();
    for (point, cluster) in points.into_iter().zip(assignment) {
        groups[cluster].push(point);
    }
    groups
}

/// Most common class in a cluster; ties break toward the smaller class id.
fn modal_class(counts: [usize; 2]) -> ClassLabel {
    if counts[1] > counts[0] {
        ClassLabel::Moving
    } else {
        ClassLabel::Stationary
    }
}

fn join_sources<'a>(sources: impl Iterator<Item = &'a str>) -> String {
    let mut unique: Vec<&str> = sources.flat_map(|s| s.split(' ')).filter(|s| !s.is_empty()).collect();
    unique.sort_unstable();
    unique.dedup();
    unique.join(" ")
}

/// Condense one cluster of detections into a single boat.
///
/// Mean position and extent, maximum confidence, modal class.
pub fn condense(group: &[Detection]) -> Boat {
    let n = group.len() as f64;
    let mut counts = [0usize; 2];
    for d in group {
        counts[d.class.id() as usize] += 1;
    }
    Boat {
        x: group.iter().map(|d| d.x).sum::<f64>() / n,
        y: group.iter().map(|d| d.y).sum::<f64>() / n,
        confidence: group.iter().map(|d| d.confidence).fold(f64::MIN, f64::max),
        class: modal_class(counts),
        width: group.iter().map(|d| d.width).sum::<f64>() / n,
        height: group.iter().map(|d| d.height).sum::<f64>() / n,
        sources: join_sources(group.iter().map(|d| d.source.as_str())),
    }
}

/// Condense one cluster of already-condensed boats, merging their sources.
pub fn condense_boats(group: &[Boat]) -> Boat {
    let n = group.len() as f64;
    let mut counts = [0usize; 2];
    for b in group {
        counts[b.class.id() as usize] += 1;
    }
    Boat {
        x: group.iter().map(|b| b.x).sum::<f64>() / n,
        y: group.iter().map(|b| b.y).sum::<f64>() / n,
        confidence: group.iter().map(|b| b.confidence).fold(f64::MIN, f64::max),
        class: modal_class(counts),
        width: group.iter().map(|b| b.width).sum::<f64>() / n,
        height: group.iter().map(|b| b.height).sum::<f64>() / n,
        sources: join_sources(group.iter().map(|b| b.sources.as_str())),
    }
}

/// Cluster detections and condense every group in one step.
pub fn merge_detections(detections: Vec<Detection>, cutoff: f64) -> Vec<Boat> {
    cluster(detections, cutoff).iter().map(|g| condense(g)).collect()
}

/// Cluster boats from different images and condense every group.
pub fn merge_boats(boats: Vec<Boat>, cutoff: f64) -> Vec<Boat> {
    cluster(boats, cutoff).iter().map(|g| condense_boats(g)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x: f64, y: f64, confidence: f64, class: ClassLabel, source: &str) -> Detection {
        Detection {
            x,
            y,
            confidence,
            class,
            width: 8.0,
            height: 4.0,
            source: source.to_string(),
        }
    }

    fn stationary(x: f64, y: f64) -> Detection {
        detection(x, y, 0.9, ClassLabel::Stationary, "img")
    }

    #[test]
    fn test_empty_and_singleton() {
        assert!(cluster(Vec::<Detection>::new(), 6.0).is_empty());
        let groups = cluster(vec![stationary(1.0, 1.0)], 6.0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
    }

    #[test]
    fn test_within_cutoff_merges() {
        let groups = cluster(vec![stationary(0.0, 0.0), stationary(3.0, 4.0)], 6.0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_beyond_cutoff_stays_separate() {
        let groups = cluster(vec![stationary(0.0, 0.0), stationary(0.0, 7.0)], 6.0);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_average_linkage_limits_chaining() {
        // 0 -- 5 -- 10 on a line with cutoff 6: the close pair merges at
        // distance 5, but the average distance from {0, 5} to {10} is 7.5,
        // so single-linkage style chaining must not occur.
        let points = vec![stationary(0.0, 0.0), stationary(5.0, 0.0), stationary(10.0, 0.0)];
        let mut groups = cluster(points, 6.0);
        groups.sort_by_key(Vec::len);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[0][0].x, 10.0);
    }

    #[test]
    fn test_distant_groups_both_merge() {
        let points = vec![
            stationary(0.0, 0.0),
            stationary(1.0, 0.0),
            stationary(100.0, 100.0),
            stationary(101.0, 100.0),
        ];
        let groups = cluster(points, 6.0);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 2));
    }

    #[test]
    fn test_clustering_idempotent() {
        // Re-merging condensed output whose points are farther apart than
        // the cutoff changes nothing.
        let points = vec![
            stationary(0.0, 0.0),
            stationary(2.0, 0.0),
            stationary(50.0, 0.0),
            stationary(52.0, 0.0),
        ];
        let boats = merge_detections(points, 6.0);
        assert_eq!(boats.len(), 2);
        let again = merge_boats(boats.clone(), 6.0);
        let mut boats = boats;
        boats.sort_by(|a, b| a.x.total_cmp(&b.x));
        let mut again = again;
        again.sort_by(|a, b| a.x.total_cmp(&b.x));
        assert_eq!(boats, again);
    }

    #[test]
    fn test_condense_takes_max_confidence_and_mean_position() {
        let group = vec![
            detection(10.0, 20.0, 0.6, ClassLabel::Stationary, "a"),
            detection(12.0, 22.0, 0.9, ClassLabel::Stationary, "b"),
        ];
        let boat = condense(&group);
        assert_eq!(boat.x, 11.0);
        assert_eq!(boat.y, 21.0);
        assert_eq!(boat.confidence, 0.9);
        assert_eq!(boat.sources, "a b");
    }

    #[test]
    fn test_condense_modal_class() {
        let group = vec![
            detection(0.0, 0.0, 0.9, ClassLabel::Moving, "a"),
            detection(1.0, 0.0, 0.8, ClassLabel::Moving, "a"),
            detection(2.0, 0.0, 0.7, ClassLabel::Stationary, "a"),
        ];
        assert_eq!(condense(&group).class, ClassLabel::Moving);

        // Ties break toward the stationary class, matching the smaller id.
        let tied = &group[1..];
        assert_eq!(condense(tied).class, ClassLabel::Stationary);
    }

    #[test]
    fn test_condense_boats_unions_sources() {
        let boats = vec![
            Boat {
                x: 0.0,
                y: 0.0,
                confidence: 0.7,
                class: ClassLabel::Stationary,
                width: 8.0,
                height: 4.0,
                sources: "b a".to_string(),
            },
            Boat {
                x: 1.0,
                y: 0.0,
                confidence: 0.9,
                class: ClassLabel::Stationary,
                width: 8.0,
                height: 4.0,
                sources: "a c".to_string(),
            },
        ];
        let merged = condense_boats(&boats);
        assert_eq!(merged.sources, "a b c");
        assert_eq!(merged.confidence, 0.9);
    }
}
