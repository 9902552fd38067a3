//! Particle-held field storage.

use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::error::HistoryError;
use crate::expr::FieldExpr;
use crate::mesh::NodeLattice;
use crate::types::FieldShape;

use super::{scatter_to_nodes, FieldMeta, NodalField};

/// Field carried by a particle population.
///
/// Values are interleaved per particle: `data[particle * n_comp + c]`.
/// Every particle field maintains a nodal proxy on the swarm's lattice
/// so that the field can be sampled away from the particles; the proxy
/// is rebuilt on each committed write and whenever the particle
/// positions are committed.
///
/// Handles are cheap to clone and share storage, like [`NodalField`].
#[derive(Clone)]
pub struct ParticleField {
    meta: Rc<FieldMeta>,
    positions: Rc<RefCell<Vec<[f64; 2]>>>,
    data: Rc<RefCell<Vec<f64>>>,
    proxy: NodalField,
}

impl ParticleField {
    /// Allocate a zero-initialized particle field over an existing
    /// particle position buffer.
    pub(crate) fn new(
        name: &str,
        shape: FieldShape,
        proxy_degree: usize,
        continuous: bool,
        lattice: Rc<NodeLattice>,
        positions: Rc<RefCell<Vec<[f64; 2]>>>,
    ) -> Result<Self, HistoryError> {
        let meta = FieldMeta::new(name, shape, proxy_degree, continuous)?;
        let proxy_name = format!("{}.proxy", name);
        let proxy = NodalField::new(&proxy_name, shape, proxy_degree, continuous, lattice)?;
        let n = positions.borrow().len() * meta.n_components();
        Ok(Self {
            meta: Rc::new(meta),
            positions,
            data: Rc::new(RefCell::new(vec![0.0; n])),
            proxy,
        })
    }

    /// Field name.
    pub fn name(&self) -> &str {
        self.meta.name()
    }

    /// Field shape.
    pub fn shape(&self) -> FieldShape {
        self.meta.shape()
    }

    /// Components per particle.
    pub fn n_components(&self) -> usize {
        self.meta.n_components()
    }

    /// Particle count.
    pub fn len(&self) -> usize {
        self.positions.borrow().len()
    }

    /// Whether the population is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The nodal proxy used to sample this field away from particles.
    pub fn proxy(&self) -> &NodalField {
        &self.proxy
    }

    /// Symbolic identity of this field.
    pub fn sym(&self) -> FieldExpr {
        FieldExpr::Particle(self.clone())
    }

    /// Shared read access to the raw per-particle data.
    pub fn read(&self) -> Ref<'_, Vec<f64>> {
        self.data.borrow()
    }

    /// Copy of the raw per-particle data.
    pub fn snapshot(&self) -> Vec<f64> {
        self.data.borrow().clone()
    }

    /// Copy of the particle positions.
    pub fn positions_snapshot(&self) -> Vec<[f64; 2]> {
        self.positions.borrow().clone()
    }

    /// Open a scoped write over the per-particle values. Dropping the
    /// guard commits the write and rebuilds the nodal proxy.
    ///
    /// # Panics
    ///
    /// Panics if any other access to this field's data is alive.
    pub fn write(&self) -> ParticleWriteGuard<'_> {
        ParticleWriteGuard {
            data: self.data.borrow_mut(),
            field: self,
        }
    }

    /// Resize storage to `n` particles, zero-filling new entries, and
    /// refresh the proxy. Called when the owning swarm is (re)populated.
    pub(crate) fn resize(&self, n: usize) {
        self.data
            .borrow_mut()
            .resize(n * self.meta.n_components(), 0.0);
        self.rebuild_proxy();
    }

    /// Rebuild the nodal proxy from current particle data and positions.
    pub(crate) fn rebuild_proxy(&self) {
        let data = self.data.borrow();
        self.rebuild_proxy_from(&data);
    }

    /// Proxy rebuild from an explicit data slice. Used from the write
    /// guard's drop, where the data borrow is already held.
    pub(crate) fn rebuild_proxy_from(&self, data: &[f64]) {
        let positions = self.positions.borrow();
        let mut proxy_guard = self.proxy.write();
        scatter_to_nodes(
            self.proxy.lattice(),
            self.meta.degree(),
            &positions,
            data,
            self.meta.n_components(),
            &mut proxy_guard,
        );
    }

    /// Proxy rebuild from an explicit position slice. Used from the
    /// swarm position guard's drop, where the position borrow is
    /// already held.
    pub(crate) fn rebuild_proxy_at(&self, positions: &[[f64; 2]]) {
        let data = self.data.borrow();
        let mut proxy_guard = self.proxy.write();
        scatter_to_nodes(
            self.proxy.lattice(),
            self.meta.degree(),
            positions,
            &data,
            self.meta.n_components(),
            &mut proxy_guard,
        );
    }
}

/// Scoped write access to a [`ParticleField`].
///
/// Dereferences to the raw per-particle component slice. Dropping the
/// guard commits: the nodal proxy is rebuilt from the new values.
pub struct ParticleWriteGuard<'a> {
    data: RefMut<'a, Vec<f64>>,
    field: &'a ParticleField,
}

impl Deref for ParticleWriteGuard<'_> {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.data
    }
}

impl DerefMut for ParticleWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl Drop for ParticleWriteGuard<'_> {
    fn drop(&mut self) {
        self.field.rebuild_proxy_from(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bounds2D;

    fn setup() -> (Rc<NodeLattice>, Rc<RefCell<Vec<[f64; 2]>>>) {
        let lattice = Rc::new(NodeLattice::new(Bounds2D::unit_square(), 2, 2).unwrap());
        // One particle on each lattice node.
        let positions = Rc::new(RefCell::new(lattice.node_positions(1)));
        (lattice, positions)
    }

    #[test]
    fn test_allocation_tracks_population() {
        let (lattice, positions) = setup();
        let field = ParticleField::new(
            "psi",
            FieldShape::Scalar,
            1,
            true,
            lattice,
            positions,
        )
        .unwrap();
        assert_eq!(field.len(), 9);
        assert_eq!(field.read().len(), 9);
        assert_eq!(field.proxy().name(), "psi.proxy");
    }

    #[test]
    fn test_write_commit_rebuilds_proxy() {
        let (lattice, positions) = setup();
        let field = ParticleField::new(
            "psi",
            FieldShape::Scalar,
            1,
            true,
            lattice,
            positions,
        )
        .unwrap();

        {
            let mut guard = field.write();
            for (i, v) in guard.iter_mut().enumerate() {
                *v = i as f64;
            }
        } // commit rebuilds the proxy

        // Particles sit exactly on nodes, so the proxy is an exact copy.
        let proxy = field.proxy().read();
        for (i, &v) in proxy.iter().enumerate() {
            assert!((v - i as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn test_resize_zero_fills() {
        let (lattice, positions) = setup();
        let field = ParticleField::new(
            "psi",
            FieldShape::Vector,
            1,
            true,
            lattice,
            positions.clone(),
        )
        .unwrap();

        positions.borrow_mut().push([0.5, 0.5]);
        field.resize(10);
        assert_eq!(field.read().len(), 20);
        assert_eq!(field.read()[18], 0.0);
    }
}
