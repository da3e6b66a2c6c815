//! Least-squares elevation adjustment.
//!
//! Given a set of points, every triangle with one of them as a corner is
//! gathered with its dots. Each dot contributes one observation row: its
//! barycentric coordinates toward those corners that are being solved for,
//! and as right-hand side its vertical distance from the current facet. The
//! solution is the change of elevation of each point.
//!
//! Small systems are folded on the calling thread. Large ones are cut with
//! [`block_sizes`] and assembled on the shared [`TaskPool`], the partial
//! normal equations then merged with [`pairwise_reduce`].
//!
//! Solved changes are clamped to a plausible band. A point the system
//! cannot determine, or whose change is not finite or absurdly large, moves
//! to the mean elevation of its mesh neighbors instead.
//!
//! [`TaskPool`]: crate::concurrency::tasks::TaskPool

use std::ops::Range;
use std::sync::Arc;

use crate::concurrency::tasks::{block_sizes, BLOCK_STEP};
use crate::core::bootstrap::ClipLimits;
use crate::core::handles::{PointId, TriangleId};
use crate::core::topology::Topology;
use crate::core::triangle::TriangleGeometry;
use crate::geometry::matrix::{NormalEquations, Solution};
use crate::geometry::point::Xyz;
use crate::geometry::sum::{pairwise_mean, pairwise_reduce, pairwise_sum};
use crate::refine::log::AdjustRecord;
use crate::refine::refiner::Refiner;

/// One triangle's share of an adjustment.
#[derive(Clone, Debug)]
struct Piece {
    geometry: TriangleGeometry,
    /// Column of each corner, if it is being solved for.
    columns: [Option<usize>; 3],
    dots: Arc<Vec<Xyz>>,
}

impl Piece {
    fn fold(&self, range: Range<usize>, equations: &mut NormalEquations) {
        for dot in &self.dots[range] {
            let bary = self.geometry.barycentric(dot.xy());
            let mut entries = [(0, 0.0); 3];
            let mut n = 0;
            for (column, weight) in self.columns.iter().zip(bary) {
                if let Some(column) = *column {
                    entries[n] = (column, weight);
                    n += 1;
                }
            }
            let residual = dot.z - self.geometry.elevation(dot.xy());
            equations.add_row(&entries[..n], residual, dot.z);
        }
    }
}

/// Everything an adjustment reads, copied under the mesh read lock.
#[derive(Debug)]
struct AdjustJob {
    points: Vec<PointId>,
    before: Vec<f64>,
    /// Elevations of each point's mesh neighbors.
    neighbors: Vec<Vec<f64>>,
    pieces: Arc<Vec<Piece>>,
    triangles: Vec<TriangleId>,
}

impl AdjustJob {
    fn gather(topo: &Topology, points: &[PointId]) -> Self {
        let mut unique: Vec<PointId> = Vec::with_capacity(points.len());
        for &p in points {
            if p.index() < topo.number_of_points() && !unique.contains(&p) {
                unique.push(p);
            }
        }
        let triangles: Vec<TriangleId> = topo.neighborhood(&unique).into_iter().collect();
        let pieces = triangles
            .iter()
            .filter_map(|&t| {
                let tri = topo.triangle(t)?;
                Some(Piece {
                    geometry: topo.geometry(t),
                    columns: tri
                        .corners()
                        .map(|c| unique.iter().position(|&p| p == c)),
                    dots: tri.dots_arc(),
                })
            })
            .collect();
        Self {
            before: unique.iter().map(|&p| topo.xyz(p).z).collect(),
            neighbors: unique
                .iter()
                .map(|&p| {
                    topo.neighbor_points(p)
                        .into_iter()
                        .map(|q| topo.xyz(q).z)
                        .collect()
                })
                .collect(),
            points: unique,
            pieces: Arc::new(pieces),
            triangles,
        }
    }

    fn dot_count(&self) -> usize {
        self.pieces.iter().map(|p| p.dots.len()).sum()
    }

    /// Elevation band for point `k`: the local dot range widened by its own
    /// span on each side, then to the second-lowest and second-highest
    /// neighbor, within the clip limits.
    fn band(&self, k: usize, equations: &NormalEquations, clip: ClipLimits) -> (f64, f64) {
        let mut around = self.neighbors[k].clone();
        around.sort_by(f64::total_cmp);
        let span = equations.hi - equations.lo;
        let (mut lo, mut hi) = (equations.lo - span, equations.hi + span);
        if around.len() >= 2 {
            lo = lo.min(around[1]);
            hi = hi.max(around[around.len() - 2]);
        }
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return (clip.lo, clip.hi);
        }
        (lo.max(clip.lo), hi.min(clip.hi))
    }

    /// New elevation of each point and whether every unknown was solved.
    fn settle(&self, equations: &NormalEquations, clip: ClipLimits) -> (Vec<f64>, bool) {
        let solution: Option<Solution> = equations.solve().ok();
        let limit = clip.hi - clip.lo;
        let mut valid_matrix = true;
        let elevations = (0..self.points.len())
            .map(|k| {
                let before = self.before[k];
                let solved = solution
                    .as_ref()
                    .filter(|s| s.valid[k])
                    .map(|s| s.values[k]);
                match solved {
                    Some(delta) if delta.is_finite() && delta.abs() <= limit => {
                        let (lo, hi) = self.band(k, equations, clip);
                        (before + delta).clamp(lo, hi)
                    }
                    other => {
                        valid_matrix = false;
                        if let Some(delta) = other {
                            tracing::warn!(
                                point = %self.points[k],
                                delta,
                                "implausible elevation change replaced by neighbor mean"
                            );
                        }
                        pairwise_mean(&self.neighbors[k]).map_or(before, |z| clip.clamp(z))
                    }
                }
            })
            .collect();
        (elevations, valid_matrix)
    }
}

impl Refiner {
    /// Re-fits the elevations of `points` to the dots around them.
    ///
    /// The caller must hold every triangle around `points`. The record is
    /// appended to the adjustment log before it is returned.
    pub fn adjust(&self, points: &[PointId]) -> AdjustRecord {
        let job = AdjustJob::gather(&self.mesh.read(), points);
        if job.points.is_empty() {
            return AdjustRecord::unmoved();
        }
        let equations = self.assemble(&job);
        let (after, valid_matrix) = job.settle(&equations, self.clip);

        {
            let mut topo = self.mesh.write();
            for (&p, &z) in job.points.iter().zip(&after) {
                topo.set_elevation(p, z);
            }
            for &t in &job.triangles {
                topo.triangles[t.index()].invalidate_error();
            }
        }
        self.touch(job.triangles.iter().copied());

        let squares: Vec<f64> = after
            .iter()
            .zip(&job.before)
            .map(|(a, b)| (a - b) * (a - b))
            .collect();
        let record = AdjustRecord {
            valid_matrix,
            ms_adjustment: pairwise_sum(&squares) / squares.len() as f64,
            max_movement: squares.iter().fold(0.0_f64, |m, s| m.max(s.sqrt())),
        };
        self.log.append(record);
        record
    }

    /// Re-fits every point of the mesh and returns the worst residual
    /// afterwards. Only for use before any worker runs.
    pub fn adjust_all(&self) -> f64 {
        let points: Vec<PointId> = self.mesh.read().points().map(|(p, _)| p).collect();
        let _ = self.adjust(&points);
        self.mesh.worst_residual()
    }

    /// Folds every dot of `job` into normal equations, in blocks on the task
    /// pool when there are many.
    fn assemble(&self, job: &AdjustJob) -> NormalEquations {
        let unknowns = job.points.len();
        let total = job.dot_count();
        if total < BLOCK_STEP {
            let mut equations = NormalEquations::zeros(unknowns);
            for piece in job.pieces.iter() {
                piece.fold(0..piece.dots.len(), &mut equations);
            }
            return equations;
        }

        let blocks = cut_blocks(&job.pieces, &block_sizes(total));
        let tasks: Vec<_> = blocks
            .into_iter()
            .map(|segments| {
                let pieces = Arc::clone(&job.pieces);
                move || {
                    let mut equations = NormalEquations::zeros(unknowns);
                    for (index, range) in segments {
                        pieces[index].fold(range, &mut equations);
                    }
                    equations
                }
            })
            .collect();
        let partials = self.tasks.run_job(tasks);
        pairwise_reduce(partials, NormalEquations::merge)
            .unwrap_or_else(|| NormalEquations::zeros(unknowns))
    }
}

/// Cuts the concatenated dot lists of `pieces` into consecutive blocks of
/// the given sizes, each a list of `(piece, dot range)` segments.
fn cut_blocks(pieces: &[Piece], sizes: &[usize]) -> Vec<Vec<(usize, Range<usize>)>> {
    let mut blocks = Vec::with_capacity(sizes.len());
    let (mut piece, mut offset) = (0, 0);
    for &size in sizes {
        let mut segments = Vec::new();
        let mut wanted = size;
        while wanted > 0 && piece < pieces.len() {
            let available = pieces[piece].dots.len() - offset;
            let take = available.min(wanted);
            if take > 0 {
                segments.push((piece, offset..offset + take));
            }
            wanted -= take;
            offset += take;
            if offset == pieces[piece].dots.len() {
                piece += 1;
                offset = 0;
            }
        }
        blocks.push(segments);
    }
    blocks
}
