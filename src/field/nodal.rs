//! Mesh-nodal field storage.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::error::HistoryError;
use crate::expr::FieldExpr;
use crate::mesh::NodeLattice;
use crate::types::FieldShape;

use super::FieldMeta;

/// Field stored at the nodes of a lattice.
///
/// Values are laid out row-major over nodes, components interleaved:
/// `data[node * n_comp + c]`. The handle is cheap to clone; clones share
/// storage, so an expression built from [`NodalField::sym`] observes
/// every committed write.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use ddt_rs::field::NodalField;
/// use ddt_rs::mesh::NodeLattice;
/// use ddt_rs::types::{Bounds2D, FieldShape};
///
/// let lattice = Rc::new(NodeLattice::new(Bounds2D::unit_square(), 2, 2).unwrap());
/// let field = NodalField::new("psi", FieldShape::Scalar, 1, true, lattice).unwrap();
///
/// {
///     let mut guard = field.write();
///     guard[0] = 1.5;
/// } // commit
///
/// assert_eq!(field.read()[0], 1.5);
/// assert_eq!(field.revision(), 1);
/// ```
#[derive(Clone)]
pub struct NodalField {
    meta: Rc<FieldMeta>,
    lattice: Rc<NodeLattice>,
    data: Rc<RefCell<Vec<f64>>>,
    revision: Rc<Cell<u64>>,
}

impl NodalField {
    /// Allocate a zero-initialized nodal field.
    pub fn new(
        name: &str,
        shape: FieldShape,
        degree: usize,
        continuous: bool,
        lattice: Rc<NodeLattice>,
    ) -> Result<Self, HistoryError> {
        let meta = FieldMeta::new(name, shape, degree, continuous)?;
        let n = lattice.node_count(degree) * meta.n_components();
        Ok(Self {
            meta: Rc::new(meta),
            lattice,
            data: Rc::new(RefCell::new(vec![0.0; n])),
            revision: Rc::new(Cell::new(0)),
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

    /// Storage polynomial degree.
    pub fn degree(&self) -> usize {
        self.meta.degree()
    }

    /// Whether the representation is continuous across cells.
    pub fn continuous(&self) -> bool {
        self.meta.continuous()
    }

    /// Components per node.
    pub fn n_components(&self) -> usize {
        self.meta.n_components()
    }

    /// Node count of the underlying lattice at this field's degree.
    pub fn n_nodes(&self) -> usize {
        self.lattice.node_count(self.meta.degree())
    }

    /// The lattice this field is stored on.
    pub fn lattice(&self) -> &Rc<NodeLattice> {
        &self.lattice
    }

    /// Number of committed writes since creation.
    pub fn revision(&self) -> u64 {
        self.revision.get()
    }

    /// Symbolic identity of this field.
    pub fn sym(&self) -> FieldExpr {
        FieldExpr::Nodal(self.clone())
    }

    /// Shared read access to the raw data.
    ///
    /// # Panics
    ///
    /// Panics if a write guard for this field is alive: read access
    /// while a write scope is open violates the access contract.
    pub fn read(&self) -> Ref<'_, Vec<f64>> {
        self.data.borrow()
    }

    /// Copy of the raw data.
    pub fn snapshot(&self) -> Vec<f64> {
        self.data.borrow().clone()
    }

    /// Open a scoped write. The commit runs when the guard drops.
    ///
    /// # Panics
    ///
    /// Panics if any other access to this field is alive.
    pub fn write(&self) -> NodalWriteGuard<'_> {
        NodalWriteGuard {
            data: self.data.borrow_mut(),
            revision: &self.revision,
        }
    }

    /// Bilinearly interpolate this field at a point.
    pub fn sample_into(&self, p: [f64; 2], out: &mut [f64]) {
        let n_comp = self.n_components();
        debug_assert_eq!(out.len(), n_comp);
        let (nodes, weights) = self.lattice.interp_stencil(self.meta.degree(), p);
        let data = self.data.borrow();
        for c in 0..n_comp {
            out[c] = nodes
                .iter()
                .zip(weights.iter())
                .map(|(&node, &w)| w * data[node * n_comp + c])
                .sum();
        }
    }
}

/// Scoped write access to a [`NodalField`].
///
/// Dereferences to the raw component slice. Dropping the guard commits
/// the write (bumps the field revision).
pub struct NodalWriteGuard<'a> {
    data: RefMut<'a, Vec<f64>>,
    revision: &'a Cell<u64>,
}

impl Deref for NodalWriteGuard<'_> {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.data
    }
}

impl DerefMut for NodalWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl Drop for NodalWriteGuard<'_> {
    fn drop(&mut self) {
        self.revision.set(self.revision.get() + 1);
    }
}
