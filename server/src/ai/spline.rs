//! Immutable directed graph of road points the AI traverses.
//!
//! Points are identified by dense ids (`id == index`), so AI identities can
//! hold plain ids without aliasing the graph. Junctions are kept in a side
//! table; traversal through them goes via [`JunctionEvaluator`], which
//! records each branch choice so repeated traversals of one identity stay
//! on the same route.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use glam::Vec3;
use log::info;
use rand::prelude::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Id value meaning "no point".
pub const NO_POINT: i32 = -1;

/// One node of the spline graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplinePoint {
    pub id: i32,
    pub position: Vec3,
    /// Unit vector toward the next point.
    pub forward: Vec3,
    /// Distance to the next point in metres.
    pub length: f32,
    pub next_id: i32,
    pub previous_id: i32,
    /// Sibling points at the same longitudinal position, this one included.
    pub lane_ids: Vec<i32>,
    /// Direction class; lanes sharing a class run the same way.
    pub direction: i8,
}

/// Serialized spline cache layout.
#[derive(Serialize, Deserialize)]
struct SplineCache {
    points: Vec<SplinePoint>,
    junctions: HashMap<i32, Vec<i32>>,
}

/// The immutable road graph.
pub struct AiSpline {
    points: Vec<SplinePoint>,
    /// Point id → alternative successor ids (in addition to `next_id`).
    junctions: HashMap<i32, Vec<i32>>,
    /// XZ-bucketed point index for nearest-point queries.
    grid: HashMap<(i32, i32), Vec<i32>>,
    cell_size: f32,
}

const GRID_CELL_SIZE: f32 = 64.0;

impl AiSpline {
    /// Builds a spline from points indexed by id and a junction table.
    ///
    /// Panics if any point's id does not equal its index; the cache format
    /// guarantees this and programmatic builders must too.
    pub fn new(points: Vec<SplinePoint>, junctions: HashMap<i32, Vec<i32>>) -> Self {
        for (index, point) in points.iter().enumerate() {
            assert_eq!(point.id, index as i32, "spline point ids must be dense");
        }

        let cell_size = GRID_CELL_SIZE;
        let mut grid: HashMap<(i32, i32), Vec<i32>> = HashMap::new();
        for point in &points {
            grid.entry(Self::cell(point.position, cell_size))
                .or_default()
                .push(point.id);
        }

        Self {
            points,
            junctions,
            grid,
            cell_size,
        }
    }

    /// Loads a bincode spline cache.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let reader = BufReader::new(File::open(path)?);
        let cache: SplineCache = bincode::deserialize_from(reader)?;
        info!(
            "Loaded AI spline: {} points, {} junctions",
            cache.points.len(),
            cache.junctions.len()
        );
        Ok(Self::new(cache.points, cache.junctions))
    }

    /// Writes the bincode spline cache.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let writer = BufWriter::new(File::create(path)?);
        let cache = SplineCache {
            points: self.points.clone(),
            junctions: self.junctions.clone(),
        };
        bincode::serialize_into(writer, &cache)?;
        Ok(())
    }

    fn cell(position: Vec3, cell_size: f32) -> (i32, i32) {
        (
            (position.x / cell_size).floor() as i32,
            (position.z / cell_size).floor() as i32,
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, id: i32) -> Option<&SplinePoint> {
        if id < 0 {
            return None;
        }
        self.points.get(id as usize)
    }

    /// Nearest point to a world position: `(point_id, squared distance)`.
    ///
    /// Returns `(NO_POINT, f32::MAX)` on an empty spline. Callers decide
    /// whether the distance is acceptable.
    pub fn world_to_spline(&self, position: Vec3) -> (i32, f32) {
        let (cx, cz) = Self::cell(position, self.cell_size);

        let mut best = (NO_POINT, f32::MAX);
        for dx in -1..=1 {
            for dz in -1..=1 {
                if let Some(ids) = self.grid.get(&(cx + dx, cz + dz)) {
                    for &id in ids {
                        let dist = self.points[id as usize].position.distance_squared(position);
                        if dist < best.1 {
                            best = (id, dist);
                        }
                    }
                }
            }
        }

        if best.0 != NO_POINT {
            return best;
        }

        // Position outside every populated cell neighborhood; scan.
        for point in &self.points {
            let dist = point.position.distance_squared(position);
            if dist < best.1 {
                best = (point.id, dist);
            }
        }
        best
    }

    /// Unit forward vector at a point, zero for invalid ids.
    pub fn forward(&self, id: i32) -> Vec3 {
        self.point(id).map(|p| p.forward).unwrap_or(Vec3::ZERO)
    }

    pub fn next(&self, id: i32) -> i32 {
        self.point(id).map(|p| p.next_id).unwrap_or(NO_POINT)
    }

    pub fn previous(&self, id: i32) -> i32 {
        self.point(id).map(|p| p.previous_id).unwrap_or(NO_POINT)
    }

    pub fn lanes(&self, id: i32) -> &[i32] {
        self.point(id).map(|p| p.lane_ids.as_slice()).unwrap_or(&[])
    }

    pub fn is_same_direction(&self, a: i32, b: i32) -> bool {
        match (self.point(a), self.point(b)) {
            (Some(pa), Some(pb)) => pa.direction == pb.direction,
            _ => false,
        }
    }

    /// Uniformly random lane sibling of a point (possibly the point itself).
    pub fn random_lane(&self, id: i32, rng: &mut impl Rng) -> i32 {
        let lanes = self.lanes(id);
        lanes.choose(rng).copied().unwrap_or(id)
    }

    /// All successor ids of a point: `next_id` plus junction branches.
    pub fn successors(&self, id: i32) -> Vec<i32> {
        let mut out = Vec::new();
        if let Some(point) = self.point(id) {
            if point.next_id >= 0 {
                out.push(point.next_id);
            }
        }
        if let Some(branches) = self.junctions.get(&id) {
            out.extend(branches.iter().copied().filter(|&b| b >= 0));
        }
        out
    }

    pub fn has_junction(&self, id: i32) -> bool {
        self.junctions.get(&id).map(|b| !b.is_empty()).unwrap_or(false)
    }

    /// Walks `offset` points along the graph, forward for positive offsets,
    /// backward for negative. Junction branches are resolved through the
    /// evaluator. Stops early at a dead end and returns the last valid id.
    pub fn traverse(
        &self,
        evaluator: &mut JunctionEvaluator,
        rng: &mut impl Rng,
        start: i32,
        offset: i32,
    ) -> i32 {
        let mut current = start;
        for _ in 0..offset.unsigned_abs() {
            let step = if offset >= 0 {
                evaluator.next_point(self, current, rng)
            } else {
                self.previous(current)
            };
            if step < 0 {
                break;
            }
            current = step;
        }
        current
    }
}

/// Branch memory for junction traversal.
///
/// The first time an identity crosses a junction the evaluator picks a
/// random viable branch and records it; later crossings of the same
/// junction reuse the recorded branch, keeping the identity's route
/// deterministic until [`JunctionEvaluator::clear`].
#[derive(Debug, Default, Clone)]
pub struct JunctionEvaluator {
    taken: HashMap<i32, i32>,
}

impl JunctionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successor of `id`, resolving junctions via recorded choices.
    pub fn next_point(&mut self, spline: &AiSpline, id: i32, rng: &mut impl Rng) -> i32 {
        if !spline.has_junction(id) {
            return spline.next(id);
        }

        if let Some(&branch) = self.taken.get(&id) {
            return branch;
        }

        let successors = spline.successors(id);
        let choice = successors.choose(rng).copied().unwrap_or(NO_POINT);
        if choice >= 0 {
            self.taken.insert(id, choice);
        }
        choice
    }

    /// Forgets all recorded branches, e.g. after a teleport.
    pub fn clear(&mut self) {
        self.taken.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Straight single-lane spline along +X with 10 m spacing.
    pub fn straight_spline(count: usize) -> AiSpline {
        let points = (0..count)
            .map(|i| SplinePoint {
                id: i as i32,
                position: Vec3::new(i as f32 * 10.0, 0.0, 0.0),
                forward: Vec3::X,
                length: 10.0,
                next_id: if i + 1 < count { (i + 1) as i32 } else { NO_POINT },
                previous_id: if i > 0 { (i - 1) as i32 } else { NO_POINT },
                lane_ids: vec![i as i32],
                direction: 1,
            })
            .collect();
        AiSpline::new(points, HashMap::new())
    }

    #[test]
    fn test_world_to_spline_nearest() {
        let spline = straight_spline(10);

        let (id, dist) = spline.world_to_spline(Vec3::new(42.0, 0.0, 3.0));
        assert_eq!(id, 4);
        // 2 m along, 3 m across
        assert!((dist - 13.0).abs() < 1e-4);
    }

    #[test]
    fn test_world_to_spline_far_position_scans() {
        let spline = straight_spline(4);
        let (id, _) = spline.world_to_spline(Vec3::new(-5000.0, 0.0, 9000.0));
        assert_eq!(id, 0);
    }

    #[test]
    fn test_traverse_forward_and_back() {
        let spline = straight_spline(20);
        let mut evaluator = JunctionEvaluator::new();
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(spline.traverse(&mut evaluator, &mut rng, 3, 5), 8);
        assert_eq!(spline.traverse(&mut evaluator, &mut rng, 8, -6), 2);
        // Dead end clamps
        assert_eq!(spline.traverse(&mut evaluator, &mut rng, 17, 10), 19);
        assert_eq!(spline.traverse(&mut evaluator, &mut rng, 2, -10), 0);
    }

    #[test]
    fn test_junction_choice_is_recorded() {
        // 0 -> 1 with a junction at 1 branching to 2 or 5
        let mut points = Vec::new();
        for i in 0..8 {
            points.push(SplinePoint {
                id: i,
                position: Vec3::new(i as f32 * 10.0, 0.0, 0.0),
                forward: Vec3::X,
                length: 10.0,
                next_id: if i + 1 < 8 { i + 1 } else { NO_POINT },
                previous_id: if i > 0 { i - 1 } else { NO_POINT },
                lane_ids: vec![i],
                direction: 1,
            });
        }
        let mut junctions = HashMap::new();
        junctions.insert(1, vec![5]);
        let spline = AiSpline::new(points, junctions);

        let mut rng = StdRng::seed_from_u64(7);
        let mut evaluator = JunctionEvaluator::new();

        let first = evaluator.next_point(&spline, 1, &mut rng);
        assert!(first == 2 || first == 5);

        // Every later crossing repeats the recorded branch.
        for _ in 0..10 {
            assert_eq!(evaluator.next_point(&spline, 1, &mut rng), first);
        }

        evaluator.clear();
        let successors = spline.successors(1);
        assert_eq!(successors, vec![2, 5]);
    }

    #[test]
    fn test_lane_queries() {
        let mut points = Vec::new();
        // Two-lane road: even ids forward (direction 1), odd ids reverse (-1)
        for i in 0..4 {
            let forward = i % 2 == 0;
            points.push(SplinePoint {
                id: i,
                position: Vec3::new((i / 2) as f32 * 10.0, 0.0, if forward { 0.0 } else { 4.0 }),
                forward: if forward { Vec3::X } else { Vec3::NEG_X },
                length: 10.0,
                next_id: NO_POINT,
                previous_id: NO_POINT,
                lane_ids: vec![i - i % 2, i - i % 2 + 1],
                direction: if forward { 1 } else { -1 },
            });
        }
        let spline = AiSpline::new(points, HashMap::new());

        assert!(spline.is_same_direction(0, 2));
        assert!(!spline.is_same_direction(0, 1));
        assert_eq!(spline.lanes(0), &[0, 1]);

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let lane = spline.random_lane(0, &mut rng);
            assert!(lane == 0 || lane == 1);
        }
    }
}
