//! MNA matrix assembly and solving.

use crate::circuit::{BranchId, NodeId};
use crate::error::{PowersimError, Result};

/// Pivot magnitude below which the system is treated as singular.
const PIVOT_EPSILON: f64 = 1e-15;

/// MNA matrix system Ax = z.
///
/// All stamp helpers are additive: devices sharing a node accumulate their
/// contributions and never overwrite each other.
#[derive(Debug, Clone)]
pub struct MnaMatrix {
    /// System matrix A (row-major)
    pub a: Vec<f64>,
    /// Excitation vector z
    pub z: Vec<f64>,
    /// Solution vector x
    pub x: Vec<f64>,
    /// Matrix dimension
    pub size: usize,
    /// Number of nodes including ground
    num_nodes: usize,
    /// LU decomposition of A (for efficient solving)
    lu: Vec<f64>,
    /// Pivot indices for LU decomposition
    pivots: Vec<usize>,
    /// Whether `lu` matches the current contents of `a`
    factored: bool,
}

impl MnaMatrix {
    /// Create a system for `num_nodes` nodes (ground included) and `num_branches`
    /// auxiliary branch unknowns.
    pub fn new(num_nodes: usize, num_branches: usize) -> Self {
        let size = num_nodes.saturating_sub(1) + num_branches;
        Self {
            a: vec![0.0; size * size],
            z: vec![0.0; size],
            x: vec![0.0; size],
            size,
            num_nodes,
            lu: vec![0.0; size * size],
            pivots: vec![0; size],
            factored: false,
        }
    }

    /// Clear the conductance matrix. Invalidates the cached factorization.
    pub fn clear_matrix(&mut self) {
        self.a.fill(0.0);
        self.factored = false;
    }

    /// Clear the excitation vector.
    pub fn clear_excitation(&mut self) {
        self.z.fill(0.0);
    }

    /// Get matrix element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.a[row * self.size + col]
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
        self.factored = false;
    }

    /// Add to excitation vector element.
    pub fn add_source(&mut self, row: usize, value: f64) {
        self.z[row] += value;
    }

    /// Row index of a branch unknown.
    pub fn branch_row(&self, branch: BranchId) -> usize {
        branch.row(self.num_nodes)
    }

    /// Stamp a conductance between two nodes.
    /// For a conductance G between nodes n1 and n2:
    ///   A[n1,n1] += G
    ///   A[n2,n2] += G
    ///   A[n1,n2] -= G
    ///   A[n2,n1] -= G
    pub fn stamp_conductance(&mut self, n1: NodeId, n2: NodeId, g: f64) {
        self.stamp_transconductance(n1, n2, n1, n2, g);
    }

    /// Stamp a current from `(out_pos -> out_neg)` proportional to the voltage
    /// across `(ctrl_pos, ctrl_neg)`.
    pub fn stamp_transconductance(
        &mut self,
        out_pos: NodeId,
        out_neg: NodeId,
        ctrl_pos: NodeId,
        ctrl_neg: NodeId,
        g: f64,
    ) {
        if let (Some(i), Some(k)) = (out_pos.row(), ctrl_pos.row()) {
            self.add(i, k, g);
        }
        if let (Some(i), Some(l)) = (out_pos.row(), ctrl_neg.row()) {
            self.add(i, l, -g);
        }
        if let (Some(j), Some(k)) = (out_neg.row(), ctrl_pos.row()) {
            self.add(j, k, -g);
        }
        if let (Some(j), Some(l)) = (out_neg.row(), ctrl_neg.row()) {
            self.add(j, l, g);
        }
    }

    /// Stamp the incidence of a branch unknown between two nodes.
    ///
    /// The branch current leaves `n_pos` and enters `n_neg`; the branch row
    /// reads `V[n_pos] - V[n_neg]`.
    pub fn stamp_branch(&mut self, n_pos: NodeId, n_neg: NodeId, branch: BranchId) {
        let br = self.branch_row(branch);
        if let Some(i) = n_pos.row() {
            self.add(br, i, 1.0);
            self.add(i, br, 1.0);
        }
        if let Some(j) = n_neg.row() {
            self.add(br, j, -1.0);
            self.add(j, br, -1.0);
        }
    }

    /// Add a voltage term to the right-hand side of a branch row.
    pub fn stamp_branch_voltage(&mut self, branch: BranchId, voltage: f64) {
        let br = self.branch_row(branch);
        self.add_source(br, voltage);
    }

    /// Stamp a current source between two nodes.
    /// Current flows from n+ through the element to n-.
    pub fn stamp_current_source(&mut self, n_pos: NodeId, n_neg: NodeId, current: f64) {
        // Current leaves n+ and enters n-
        if let Some(i) = n_pos.row() {
            self.add_source(i, -current);
        }
        if let Some(j) = n_neg.row() {
            self.add_source(j, current);
        }
    }

    /// Whether the cached LU factors still match `a`.
    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Perform LU decomposition with partial pivoting.
    pub fn factor(&mut self) -> Result<()> {
        let n = self.size;
        self.lu.copy_from_slice(&self.a);

        for i in 0..n {
            self.pivots[i] = i;
        }

        for k in 0..n {
            // Find pivot
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;

            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if !max_val.is_finite() || max_val < PIVOT_EPSILON {
                return Err(PowersimError::SingularMatrix);
            }

            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }

        self.factored = true;
        Ok(())
    }

    /// Solve the system, factoring first if `a` changed since the last factorization.
    pub fn solve(&mut self) -> Result<()> {
        if !self.factored {
            self.factor()?;
        }
        let n = self.size;

        // Apply pivot permutation to z
        for i in 0..n {
            self.x[i] = self.z[self.pivots[i]];
        }

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
            self.x[i] /= self.lu[i * n + i];
        }

        Ok(())
    }

    /// Get the solved potential of a node (ground reads 0).
    pub fn voltage(&self, node: NodeId) -> f64 {
        node.row().map(|i| self.x[i]).unwrap_or(0.0)
    }

    /// Get the solved voltage `V[n_pos] - V[n_neg]`.
    pub fn voltage_across(&self, n_pos: NodeId, n_neg: NodeId) -> f64 {
        self.voltage(n_pos) - self.voltage(n_neg)
    }

    /// Get the solved value of a branch unknown.
    pub fn branch_current(&self, branch: BranchId) -> f64 {
        self.x[self.branch_row(branch)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resistor_stamp_is_symmetric() {
        let mut mna = MnaMatrix::new(3, 0);
        let r = 47.0;
        mna.stamp_conductance(NodeId(1), NodeId(2), 1.0 / r);

        assert_relative_eq!(mna.get(0, 0), 1.0 / r);
        assert_relative_eq!(mna.get(1, 1), 1.0 / r);
        assert_relative_eq!(mna.get(0, 1), -1.0 / r);
        assert_relative_eq!(mna.get(1, 0), -1.0 / r);
        // No net injection: each row sums to zero
        assert_relative_eq!(mna.get(0, 0) + mna.get(0, 1), 0.0);
    }

    #[test]
    fn test_stamps_are_additive() {
        let mut mna = MnaMatrix::new(2, 0);
        mna.stamp_conductance(NodeId(1), NodeId::GROUND, 0.5);
        mna.stamp_conductance(NodeId(1), NodeId::GROUND, 0.25);
        assert_relative_eq!(mna.get(0, 0), 0.75);

        mna.stamp_current_source(NodeId::GROUND, NodeId(1), 1.0);
        mna.stamp_current_source(NodeId::GROUND, NodeId(1), 2.0);
        assert_relative_eq!(mna.z[0], 3.0);
    }

    #[test]
    fn test_voltage_divider_solve() {
        // 10V source at node 1, 1k from 1 to 2, 1k from 2 to ground
        let mut mna = MnaMatrix::new(3, 1);
        mna.stamp_branch(NodeId(1), NodeId::GROUND, BranchId(0));
        mna.stamp_branch_voltage(BranchId(0), 10.0);
        mna.stamp_conductance(NodeId(1), NodeId(2), 1e-3);
        mna.stamp_conductance(NodeId(2), NodeId::GROUND, 1e-3);
        mna.solve().unwrap();

        assert_relative_eq!(mna.voltage(NodeId(1)), 10.0, epsilon = 1e-9);
        assert_relative_eq!(mna.voltage(NodeId(2)), 5.0, epsilon = 1e-9);
        // Branch current leaves the + terminal into the source: -5 mA
        assert_relative_eq!(mna.branch_current(BranchId(0)), -5e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_factorization_is_reused_until_matrix_changes() {
        let mut mna = MnaMatrix::new(2, 0);
        mna.stamp_conductance(NodeId(1), NodeId::GROUND, 2.0);
        mna.add_source(0, 4.0);
        mna.solve().unwrap();
        assert!(mna.is_factored());
        assert_relative_eq!(mna.voltage(NodeId(1)), 2.0);

        // Excitation-only change keeps the factors
        mna.clear_excitation();
        mna.add_source(0, 8.0);
        assert!(mna.is_factored());
        mna.solve().unwrap();
        assert_relative_eq!(mna.voltage(NodeId(1)), 4.0);

        mna.stamp_conductance(NodeId(1), NodeId::GROUND, 2.0);
        assert!(!mna.is_factored());
    }

    #[test]
    fn test_singular_matrix_detected() {
        let mut mna = MnaMatrix::new(3, 0);
        mna.stamp_conductance(NodeId(1), NodeId(2), 1.0);
        assert!(matches!(mna.factor(), Err(PowersimError::SingularMatrix)));
    }

    #[test]
    fn test_non_finite_pivot_is_singular() {
        let mut mna = MnaMatrix::new(2, 0);
        mna.stamp_conductance(NodeId(1), NodeId::GROUND, f64::INFINITY);
        assert!(matches!(mna.factor(), Err(PowersimError::SingularMatrix)));

        let mut mna = MnaMatrix::new(2, 0);
        mna.stamp_conductance(NodeId(1), NodeId::GROUND, f64::NAN);
        assert!(matches!(mna.solve(), Err(PowersimError::SingularMatrix)));
    }
}
