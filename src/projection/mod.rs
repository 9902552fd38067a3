//! Particle-to-mesh projection.
//!
//! Recovers nodal field values from scattered samples: given a source
//! expression and a set of sample points (particle positions, or the
//! target's own nodes for mesh-evaluatable sources), find the nodal
//! vector whose bilinear interpolant best fits the samples in the
//! least-squares sense, with optional graph-Laplacian smoothing.
//!
//! The normal equations `(AᵀA + λL) u = Aᵀ b` are assembled per solve
//! and factorized once with a full-pivot LU; vector targets reuse the
//! factorization across components as a multi-column right-hand side.
//!
//! The projection variant is fixed at construction by the target
//! field's shape: scalar and vector targets solve directly, tensor
//! targets cycle each component through a scalar work field.

use faer::{linalg::solvers::Solve, Mat};
use tracing::debug;

use crate::error::HistoryError;
use crate::evaluate::{EvalMode, Evaluator};
use crate::expr::FieldExpr;
use crate::field::NodalField;
use crate::mesh::NodeLattice;
use crate::types::{FieldShape, NodeIndex};

/// Keeps the normal matrix invertible where nodes lack sample coverage.
const REGULARIZATION: f64 = 1e-12;

/// Which part of the domain boundary a condition applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryRegion {
    /// The whole boundary.
    All,
    /// x = x_min edge.
    West,
    /// x = x_max edge.
    East,
    /// y = y_min edge.
    South,
    /// y = y_max edge.
    North,
}

impl BoundaryRegion {
    /// Whether `node` lies on this region of the lattice boundary.
    pub fn contains(&self, lattice: &NodeLattice, degree: usize, node: NodeIndex) -> bool {
        let (sx, sy) = lattice.nodes_per_side(degree);
        let i = node.get() % sx;
        let j = node.get() / sx;
        match self {
            BoundaryRegion::All => i == 0 || j == 0 || i == sx - 1 || j == sy - 1,
            BoundaryRegion::West => i == 0,
            BoundaryRegion::East => i == sx - 1,
            BoundaryRegion::South => j == 0,
            BoundaryRegion::North => j == sy - 1,
        }
    }
}

/// Dirichlet condition imposed on projected values after each solve.
#[derive(Clone, Debug)]
pub struct DirichletBc {
    /// Boundary region the condition covers.
    pub region: BoundaryRegion,
    /// Value expression, sampled at the boundary nodes.
    pub value: FieldExpr,
}

/// Projection solve options.
#[derive(Clone, Debug, Default)]
pub struct ProjectionConfig {
    /// Graph-Laplacian smoothing coefficient (0 = no smoothing).
    pub smoothing: f64,
    /// Dirichlet conditions applied after the solve.
    pub bcs: Vec<DirichletBc>,
    /// Optional scalar mask multiplied into the projected values.
    pub bc_mask: Option<FieldExpr>,
}

enum ProjectionKind {
    Scalar,
    Vector,
    Tensor { work: NodalField },
}

/// Particle-to-mesh projection bound to one target field.
pub struct Projection {
    target: NodalField,
    kind: ProjectionKind,
    config: ProjectionConfig,
    evaluator: Evaluator,
}

impl Projection {
    /// Build a projection for `target`, selecting the solve variant
    /// from the target's shape. Tensor shapes allocate one scalar work
    /// field named `{label}.work`.
    pub fn for_field(
        target: &NodalField,
        config: ProjectionConfig,
        label: &str,
    ) -> Result<Self, HistoryError> {
        let kind = match target.shape() {
            FieldShape::Scalar => ProjectionKind::Scalar,
            FieldShape::Vector => ProjectionKind::Vector,
            FieldShape::SymTensor | FieldShape::Tensor => ProjectionKind::Tensor {
                work: NodalField::new(
                    &format!("{}.work", label),
                    FieldShape::Scalar,
                    target.degree(),
                    target.continuous(),
                    target.lattice().clone(),
                )?,
            },
        };
        let evaluator = Evaluator::new(target.lattice().clone(), target.degree())?;
        Ok(Self {
            target: target.clone(),
            kind,
            config,
            evaluator,
        })
    }

    /// The field this projection writes.
    pub fn target(&self) -> &NodalField {
        &self.target
    }

    /// The scalar work field, present for tensor targets.
    pub fn work_field(&self) -> Option<&NodalField> {
        match &self.kind {
            ProjectionKind::Tensor { work } => Some(work),
            _ => None,
        }
    }

    /// Project `source` onto the target field.
    ///
    /// Particle sources are fitted at their particle positions using
    /// the raw per-particle values; any other source is sampled at the
    /// target's own nodes.
    pub fn solve(&self, source: &FieldExpr, mode: EvalMode) -> Result<(), HistoryError> {
        let n_comp = self.target.n_components();
        if source.n_components() != n_comp {
            return Err(HistoryError::ComponentMismatch {
                expected: n_comp,
                got: source.n_components(),
            });
        }

        let (points, values) = match source {
            FieldExpr::Particle(field) => (field.positions_snapshot(), field.snapshot()),
            other => {
                let points = self
                    .target
                    .lattice()
                    .node_positions(self.target.degree());
                let values = self.evaluator.evaluate(other, &points, mode)?;
                (points, values)
            }
        };
        if points.is_empty() {
            return Err(HistoryError::Projection(
                "no sample points to project from".to_string(),
            ));
        }

        debug!(
            target = self.target.name(),
            samples = points.len(),
            smoothing = self.config.smoothing,
            "projection solve"
        );

        let lattice = self.target.lattice().clone();
        let degree = self.target.degree();
        let n = self.target.n_nodes();

        let normal = assemble_normal_matrix(&lattice, degree, &points, self.config.smoothing);
        let lu = normal.as_ref().full_piv_lu();

        match &self.kind {
            ProjectionKind::Scalar | ProjectionKind::Vector => {
                let rhs = assemble_rhs(&lattice, degree, &points, &values, n_comp, None);
                let solution = lu.solve(&rhs);
                check_finite(&solution)?;
                let mut guard = self.target.write();
                for node in 0..n {
                    for c in 0..n_comp {
                        guard[node * n_comp + c] = solution[(node, c)];
                    }
                }
            }
            ProjectionKind::Tensor { work } => {
                // One scalar solve per component, staged through the
                // work field.
                for c in 0..n_comp {
                    let rhs = assemble_rhs(&lattice, degree, &points, &values, n_comp, Some(c));
                    let solution = lu.solve(&rhs);
                    check_finite(&solution)?;
                    {
                        let mut work_guard = work.write();
                        for node in 0..n {
                            work_guard[node] = solution[(node, 0)];
                        }
                    }
                    let component = work.snapshot();
                    let mut guard = self.target.write();
                    for node in 0..n {
                        guard[node * n_comp + c] = component[node];
                    }
                }
            }
        }

        self.apply_dirichlet()?;
        self.apply_mask()?;
        Ok(())
    }

    fn apply_dirichlet(&self) -> Result<(), HistoryError> {
        if self.config.bcs.is_empty() {
            return Ok(());
        }
        let n_comp = self.target.n_components();
        let lattice = self.target.lattice().clone();
        let degree = self.target.degree();
        let n = self.target.n_nodes();

        for bc in &self.config.bcs {
            if bc.value.n_components() != n_comp {
                return Err(HistoryError::ComponentMismatch {
                    expected: n_comp,
                    got: bc.value.n_components(),
                });
            }
            let covered: Vec<NodeIndex> = NodeIndex::iter(n)
                .filter(|&node| bc.region.contains(&lattice, degree, node))
                .collect();
            let points: Vec<[f64; 2]> = covered
                .iter()
                .map(|&node| lattice.node_position(degree, node))
                .collect();
            let values = self
                .evaluator
                .evaluate(&bc.value, &points, EvalMode::General)?;

            let mut guard = self.target.write();
            for (k, &node) in covered.iter().enumerate() {
                for c in 0..n_comp {
                    guard[node.get() * n_comp + c] = values[k * n_comp + c];
                }
            }
        }
        Ok(())
    }

    fn apply_mask(&self) -> Result<(), HistoryError> {
        let Some(mask) = &self.config.bc_mask else {
            return Ok(());
        };
        if mask.n_components() != 1 {
            return Err(HistoryError::ComponentMismatch {
                expected: 1,
                got: mask.n_components(),
            });
        }
        let lattice = self.target.lattice().clone();
        let degree = self.target.degree();
        let n_comp = self.target.n_components();
        let points = lattice.node_positions(degree);
        let mask_values = self.evaluator.evaluate(mask, &points, EvalMode::General)?;

        let mut guard = self.target.write();
        for (node, &m) in mask_values.iter().enumerate() {
            for c in 0..n_comp {
                guard[node * n_comp + c] *= m;
            }
        }
        Ok(())
    }
}

/// Assemble `AᵀA + λL + εI` for the sample set.
fn assemble_normal_matrix(
    lattice: &NodeLattice,
    degree: usize,
    points: &[[f64; 2]],
    smoothing: f64,
) -> Mat<f64> {
    let n = lattice.node_count(degree);
    let mut m = Mat::zeros(n, n);

    for &p in points {
        let (nodes, weights) = lattice.interp_stencil(degree, p);
        for a in 0..4 {
            for b in 0..4 {
                m[(nodes[a], nodes[b])] += weights[a] * weights[b];
            }
        }
    }

    if smoothing > 0.0 {
        for node in 0..n {
            let (neighbors, count) = lattice.node_neighbors(degree, node);
            m[(node, node)] += smoothing * count as f64;
            for &neighbor in &neighbors[..count] {
                m[(node, neighbor)] -= smoothing;
            }
        }
    }

    for i in 0..n {
        m[(i, i)] += REGULARIZATION;
    }
    m
}

/// Assemble `Aᵀ b`. With `component` set, a single column for that
/// component; otherwise one column per component.
fn assemble_rhs(
    lattice: &NodeLattice,
    degree: usize,
    points: &[[f64; 2]],
    values: &[f64],
    n_comp: usize,
    component: Option<usize>,
) -> Mat<f64> {
    let n = lattice.node_count(degree);
    let n_cols = if component.is_some() { 1 } else { n_comp };
    let mut rhs = Mat::zeros(n, n_cols);

    for (p, value) in points.iter().zip(values.chunks_exact(n_comp)) {
        let (nodes, weights) = lattice.interp_stencil(degree, *p);
        for (&node, &w) in nodes.iter().zip(weights.iter()) {
            match component {
                Some(c) => rhs[(node, 0)] += w * value[c],
                None => {
                    for c in 0..n_comp {
                        rhs[(node, c)] += w * value[c];
                    }
                }
            }
        }
    }
    rhs
}

fn check_finite(solution: &Mat<f64>) -> Result<(), HistoryError> {
    for i in 0..solution.nrows() {
        for j in 0..solution.ncols() {
            if !solution[(i, j)].is_finite() {
                return Err(HistoryError::Projection(
                    "solve produced non-finite values".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::Swarm;
    use crate::types::Bounds2D;
    use std::rc::Rc;

    fn lattice(nx: usize) -> Rc<NodeLattice> {
        Rc::new(NodeLattice::new(Bounds2D::unit_square(), nx, nx).unwrap())
    }

    fn nodal(name: &str, shape: FieldShape, l: &Rc<NodeLattice>) -> NodalField {
        NodalField::new(name, shape, 1, true, l.clone()).unwrap()
    }

    #[test]
    fn test_scalar_projection_from_node_anchored_particles() {
        let l = lattice(3);
        let target = nodal("psi_star", FieldShape::Scalar, &l);
        let projection =
            Projection::for_field(&target, ProjectionConfig::default(), "test").unwrap();

        // Particles exactly at nodes carrying x + y: the fit is exact.
        let swarm = Swarm::from_positions(l.clone(), "aux", l.node_positions(1));
        let source = swarm
            .add_field("sample", FieldShape::Scalar, 1, true)
            .unwrap();
        {
            let positions = source.positions_snapshot();
            let mut guard = source.write();
            for (i, p) in positions.iter().enumerate() {
                guard[i] = p[0] + p[1];
            }
        }

        projection
            .solve(&source.sym(), EvalMode::General)
            .unwrap();

        let data = target.read();
        for (i, p) in l.node_positions(1).iter().enumerate() {
            assert!(
                (data[i] - (p[0] + p[1])).abs() < 1e-9,
                "node {}: {} vs {}",
                i,
                data[i],
                p[0] + p[1]
            );
        }
    }

    #[test]
    fn test_analytic_source_sampled_at_nodes() {
        let l = lattice(3);
        let target = nodal("psi_star", FieldShape::Scalar, &l);
        let projection =
            Projection::for_field(&target, ProjectionConfig::default(), "test").unwrap();
        let source = FieldExpr::analytic("plane", 1, |p, out| {
            out[0] = 3.0 * p[0] - p[1];
        });

        projection.solve(&source, EvalMode::General).unwrap();

        let data = target.read();
        for (i, p) in l.node_positions(1).iter().enumerate() {
            assert!((data[i] - (3.0 * p[0] - p[1])).abs() < 1e-9);
        }
    }

    #[test]
    fn test_vector_projection_solves_both_components() {
        let l = lattice(2);
        let target = nodal("v_star", FieldShape::Vector, &l);
        let projection =
            Projection::for_field(&target, ProjectionConfig::default(), "test").unwrap();
        assert!(projection.work_field().is_none());

        let source = FieldExpr::analytic("shear", 2, |p, out| {
            out[0] = p[1];
            out[1] = -p[0];
        });
        projection.solve(&source, EvalMode::General).unwrap();

        let data = target.read();
        for (i, p) in l.node_positions(1).iter().enumerate() {
            assert!((data[2 * i] - p[1]).abs() < 1e-9);
            assert!((data[2 * i + 1] + p[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tensor_projection_goes_through_work_field() {
        let l = lattice(2);
        let target = nodal("tau_star", FieldShape::SymTensor, &l);
        let projection =
            Projection::for_field(&target, ProjectionConfig::default(), "test").unwrap();
        let work = projection.work_field().expect("tensor target has work field");
        assert_eq!(work.name(), "test.work");

        let source = FieldExpr::analytic("stress", 3, |p, out| {
            out[0] = p[0];
            out[1] = p[1];
            out[2] = 2.0;
        });
        projection.solve(&source, EvalMode::General).unwrap();

        // Work field holds the last projected component.
        let work_data = work.snapshot();
        for &v in &work_data {
            assert!((v - 2.0).abs() < 1e-9);
        }

        let data = target.read();
        for (i, p) in l.node_positions(1).iter().enumerate() {
            assert!((data[3 * i] - p[0]).abs() < 1e-9);
            assert!((data[3 * i + 1] - p[1]).abs() < 1e-9);
            assert!((data[3 * i + 2] - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_smoothing_flattens_spike() {
        let l = lattice(4);
        let sharp_target = nodal("sharp", FieldShape::Scalar, &l);
        let smooth_target = nodal("smooth", FieldShape::Scalar, &l);
        let sharp =
            Projection::for_field(&sharp_target, ProjectionConfig::default(), "a").unwrap();
        let smooth = Projection::for_field(
            &smooth_target,
            ProjectionConfig {
                smoothing: 0.5,
                ..Default::default()
            },
            "b",
        )
        .unwrap();

        let spike = FieldExpr::analytic("spike", 1, |p, out| {
            let d2 = (p[0] - 0.5).powi(2) + (p[1] - 0.5).powi(2);
            out[0] = if d2 < 1e-4 { 1.0 } else { 0.0 };
        });
        sharp.solve(&spike, EvalMode::General).unwrap();
        smooth.solve(&spike, EvalMode::General).unwrap();

        let peak = |f: &NodalField| {
            f.read()
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max)
        };
        assert!(peak(&smooth_target) < peak(&sharp_target));
    }

    #[test]
    fn test_dirichlet_overrides_boundary() {
        let l = lattice(2);
        let target = nodal("psi_star", FieldShape::Scalar, &l);
        let config = ProjectionConfig {
            bcs: vec![DirichletBc {
                region: BoundaryRegion::All,
                value: FieldExpr::scalar(-1.0),
            }],
            ..Default::default()
        };
        let projection = Projection::for_field(&target, config, "test").unwrap();
        projection
            .solve(&FieldExpr::scalar(5.0), EvalMode::General)
            .unwrap();

        let data = target.read();
        for node in NodeIndex::iter(target.n_nodes()) {
            let expected = if l.is_boundary_node(1, node) { -1.0 } else { 5.0 };
            assert!((data[node.get()] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mask_multiplies_result() {
        let l = lattice(2);
        let target = nodal("psi_star", FieldShape::Scalar, &l);
        let config = ProjectionConfig {
            bc_mask: Some(FieldExpr::analytic("half_mask", 1, |p, out| {
                out[0] = if p[0] < 0.25 { 0.0 } else { 1.0 };
            })),
            ..Default::default()
        };
        let projection = Projection::for_field(&target, config, "test").unwrap();
        projection
            .solve(&FieldExpr::scalar(4.0), EvalMode::General)
            .unwrap();

        let data = target.read();
        for (i, p) in l.node_positions(1).iter().enumerate() {
            let expected = if p[0] < 0.25 { 0.0 } else { 4.0 };
            assert!((data[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_component_mismatch_rejected() {
        let l = lattice(2);
        let target = nodal("psi_star", FieldShape::Scalar, &l);
        let projection =
            Projection::for_field(&target, ProjectionConfig::default(), "test").unwrap();
        let result = projection.solve(&FieldExpr::constant(&[1.0, 2.0]), EvalMode::General);
        assert!(matches!(
            result,
            Err(HistoryError::ComponentMismatch { expected: 1, got: 2 })
        ));
    }
}
