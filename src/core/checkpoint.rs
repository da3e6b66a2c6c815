//! Serializable mesh checkpoints.
//!
//! A [`Checkpoint`] holds everything needed to resume refinement: points,
//! hull, triangles with their dots, and the tolerances in force. It derives
//! `serde` traits so any codec can write it; the crate itself defines no
//! file format.
//!
//! Two rotate-xor checksums, one over points and one over triangles, catch
//! truncation and bit rot. They are not a cryptographic guarantee.
//! [`Mesh::from_checkpoint`] either restores a fully valid mesh or reports
//! what is wrong; it never returns a partially loaded one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::handles::{PointId, TriangleId};
use crate::core::mesh::Mesh;
use crate::core::topology::Topology;
use crate::core::validation::TopologyError;
use crate::geometry::point::Xyz;

/// Format tag written by this version.
pub const CHECKPOINT_FORMAT: &str = "tinfit-checkpoint-1";

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Why a checkpoint cannot be restored.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CheckpointError {
    /// The format tag is not one this version reads.
    #[error("unknown checkpoint format {found:?}")]
    UnknownFormat {
        /// The tag found.
        found: String,
    },

    /// A declared count disagrees with the data present.
    #[error("checkpoint declares {declared} {section} but holds {actual}")]
    CountMismatch {
        /// `"points"` or `"triangles"`.
        section: &'static str,
        /// Count in the header.
        declared: usize,
        /// Count of records present.
        actual: usize,
    },

    /// A triangle corner names a point that does not exist.
    #[error("triangle {triangle} references missing point {point}")]
    InvalidPointReference {
        /// Position of the triangle.
        triangle: usize,
        /// The bad index.
        point: usize,
    },

    /// A hull entry names a point that does not exist.
    #[error("hull position {position} references missing point {point}")]
    InvalidHullReference {
        /// Position in the hull sequence.
        position: usize,
        /// The bad index.
        point: usize,
    },

    /// A stored checksum does not match the data.
    #[error("{section} checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch {
        /// `"point"` or `"triangle"`.
        section: &'static str,
        /// Value in the checkpoint.
        stored: u64,
        /// Value recomputed from the data.
        computed: u64,
    },

    /// The data is intact but does not form a valid mesh.
    #[error("checkpoint topology is invalid: {source}")]
    InvalidTopology {
        /// The violated invariant.
        #[from]
        source: TopologyError,
    },
}

/// One triangle and its dots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTriangle {
    /// Counter-clockwise point indices.
    pub corners: [usize; 3],
    /// Cloud samples owned by the triangle.
    pub dots: Vec<Xyz>,
}

/// A complete, self-checking copy of a mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format tag, [`CHECKPOINT_FORMAT`].
    pub format: String,
    /// Target tolerance of the run.
    pub tolerance: f64,
    /// Stage tolerance when the checkpoint was taken.
    pub stage_tolerance: f64,
    /// Declared number of points.
    pub point_count: usize,
    /// Declared number of triangles.
    pub triangle_count: usize,
    /// Point positions.
    pub points: Vec<Xyz>,
    /// Hull point indices, counter-clockwise.
    pub hull: Vec<usize>,
    /// Triangles with their dots.
    pub triangles: Vec<CheckpointTriangle>,
    /// Checksum of `points`.
    pub point_checksum: u64,
    /// Checksum of `triangles`.
    pub triangle_checksum: u64,
}

/// Rotate-xor accumulator.
#[derive(Clone, Copy, Debug, Default)]
struct Checksum(u64);

impl Checksum {
    fn word(&mut self, w: u64) {
        self.0 = self.0.rotate_left(7) ^ w;
    }

    fn xyz(&mut self, p: Xyz) {
        self.word(p.x.to_bits());
        self.word(p.y.to_bits());
        self.word(p.z.to_bits());
    }
}

fn point_checksum(points: &[Xyz]) -> u64 {
    let mut sum = Checksum::default();
    for &p in points {
        sum.xyz(p);
    }
    sum.0
}

fn triangle_checksum(triangles: &[CheckpointTriangle]) -> u64 {
    let mut sum = Checksum::default();
    for t in triangles {
        for c in t.corners {
            sum.word(c as u64);
        }
        sum.word(t.dots.len() as u64);
        for &d in &t.dots {
            sum.xyz(d);
        }
    }
    sum.0
}

impl Checkpoint {
    /// Checks format, counts, references and checksums, without building a
    /// mesh.
    ///
    /// # Errors
    ///
    /// The first problem found, in the order listed on [`CheckpointError`].
    pub fn verify(&self) -> Result<(), CheckpointError> {
        if self.format != CHECKPOINT_FORMAT {
            return Err(CheckpointError::UnknownFormat { found: self.format.clone() });
        }
        if self.point_count != self.points.len() {
            return Err(CheckpointError::CountMismatch {
                section: "points",
                declared: self.point_count,
                actual: self.points.len(),
            });
        }
        if self.triangle_count != self.triangles.len() {
            return Err(CheckpointError::CountMismatch {
                section: "triangles",
                declared: self.triangle_count,
                actual: self.triangles.len(),
            });
        }
        let n = self.points.len();
        for (triangle, t) in self.triangles.iter().enumerate() {
            if let Some(&point) = t.corners.iter().find(|&&c| c >= n) {
                return Err(CheckpointError::InvalidPointReference { triangle, point });
            }
        }
        for (position, &point) in self.hull.iter().enumerate() {
            if point >= n {
                return Err(CheckpointError::InvalidHullReference { position, point });
            }
        }
        let computed = point_checksum(&self.points);
        if computed != self.point_checksum {
            return Err(CheckpointError::ChecksumMismatch {
                section: "point",
                stored: self.point_checksum,
                computed,
            });
        }
        let computed = triangle_checksum(&self.triangles);
        if computed != self.triangle_checksum {
            return Err(CheckpointError::ChecksumMismatch {
                section: "triangle",
                stored: self.triangle_checksum,
                computed,
            });
        }
        Ok(())
    }

    /// Total dots across all triangles.
    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.triangles.iter().map(|t| t.dots.len()).sum()
    }
}

impl Mesh {
    /// Captures the mesh under one read lock.
    #[must_use]
    pub fn to_checkpoint(&self, tolerance: f64, stage_tolerance: f64) -> Checkpoint {
        let topo = self.read();
        let points: Vec<Xyz> = topo.points().map(|(_, p)| p.coords()).collect();
        let triangles: Vec<CheckpointTriangle> = topo
            .triangles()
            .map(|(_, t)| CheckpointTriangle {
                corners: t.corners().map(PointId::index),
                dots: t.dots().to_vec(),
            })
            .collect();
        Checkpoint {
            format: CHECKPOINT_FORMAT.to_owned(),
            tolerance,
            stage_tolerance,
            point_count: points.len(),
            triangle_count: triangles.len(),
            point_checksum: point_checksum(&points),
            triangle_checksum: triangle_checksum(&triangles),
            hull: topo.hull().iter().map(|p| p.index()).collect(),
            points,
            triangles,
        }
    }

    /// Restores a mesh from a checkpoint.
    ///
    /// # Errors
    ///
    /// Any [`CheckpointError`]; the structural checks of
    /// [`Topology::validate`] surface as [`CheckpointError::InvalidTopology`].
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, CheckpointError> {
        checkpoint.verify()?;
        let corners: Vec<[usize; 3]> = checkpoint.triangles.iter().map(|t| t.corners).collect();
        let hull = checkpoint.hull.iter().copied().map(PointId::new).collect();
        let mut topo = Topology::from_triangles(checkpoint.points.clone(), &corners, Some(hull))?;
        topo.validate()?;
        for (i, t) in checkpoint.triangles.iter().enumerate() {
            topo.install_dots(TriangleId::new(i), Arc::new(t.dots.clone()));
        }
        tracing::debug!(
            points = checkpoint.point_count,
            triangles = checkpoint.triangle_count,
            dots = checkpoint.dot_count(),
            "checkpoint restored"
        );
        Ok(Self::new(topo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        let topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 1.0),
                Xyz::new(2.0, 0.0, 1.0),
                Xyz::new(2.0, 2.0, 1.0),
                Xyz::new(0.0, 2.0, 1.0),
            ],
            &[[0, 1, 2], [0, 2, 3]],
            None,
        )
        .unwrap();
        let mesh = Mesh::new(topo);
        mesh.write()
            .install_dots(TriangleId::new(0), Arc::new(vec![Xyz::new(1.5, 0.5, 1.2)]));
        mesh.to_checkpoint(0.1, 0.4)
    }

    #[test]
    fn restores_what_it_captured() {
        let cp = sample();
        cp.verify().unwrap();
        let mesh = Mesh::from_checkpoint(&cp).unwrap();
        assert_eq!(mesh.to_checkpoint(0.1, 0.4), cp);
        assert_eq!(mesh.read().dot_count(), 1);
    }

    #[test]
    fn each_corruption_has_its_own_error() {
        let mut cp = sample();
        cp.format = "ptin".into();
        assert!(matches!(cp.verify(), Err(CheckpointError::UnknownFormat { .. })));

        let mut cp = sample();
        cp.points.pop();
        assert!(matches!(
            cp.verify(),
            Err(CheckpointError::CountMismatch { section: "points", .. })
        ));

        let mut cp = sample();
        cp.triangles[1].corners[2] = 9;
        assert_eq!(
            cp.verify(),
            Err(CheckpointError::InvalidPointReference { triangle: 1, point: 9 })
        );

        let mut cp = sample();
        cp.hull[3] = 4;
        assert_eq!(
            cp.verify(),
            Err(CheckpointError::InvalidHullReference { position: 3, point: 4 })
        );

        let mut cp = sample();
        cp.points[2].z = 1.5;
        assert!(matches!(
            cp.verify(),
            Err(CheckpointError::ChecksumMismatch { section: "point", .. })
        ));

        let mut cp = sample();
        cp.triangles[0].dots.clear();
        assert!(matches!(
            cp.verify(),
            Err(CheckpointError::ChecksumMismatch { section: "triangle", .. })
        ));
    }

    #[test]
    fn intact_but_inconsistent_data_is_rejected() {
        let mut cp = sample();
        cp.hull.swap(1, 3);
        assert!(matches!(
            Mesh::from_checkpoint(&cp),
            Err(CheckpointError::InvalidTopology { .. })
        ));
    }
}
