//! Magnetically coupled inductors.
//!
//! The members of a group share one inductance matrix
//!
//! ```text
//!   Λ = diag(L) + M,    M[i][j] = k_ij * sqrt(L_i * L_j)  (i != j)
//! ```
//!
//! and are stamped in nodal form through its inverse Γ = Λ⁻¹. For member `i`
//! the step increment is `ΔI_i = dt * Σ_j Γ_ij * V_j`, where the trapezoidal
//! rule uses `V_j_new + V_j_old`. `M` is never stamped; its diagonal is unused.

use crate::circuit::{ComponentId, NodeId};
use crate::error::{PowersimError, Result};
use crate::solver::{IntegrationMethod, MnaMatrix};

use super::{HistoryUpdatable, Stampable};

/// One inductor branch inside a coupled group.
#[derive(Debug, Clone)]
pub struct CoupledMember {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub inductance: f64,
    pub voltage: f64,
    pub current: f64,
    v_old: f64,
    i_old: f64,
    i_old_old: f64,
}

impl CoupledMember {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        inductance: f64,
        initial_current: f64,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            inductance,
            voltage: 0.0,
            current: initial_current,
            v_old: 0.0,
            i_old: initial_current,
            i_old_old: initial_current,
        }
    }
}

/// Set of inductors sharing a mutual-inductance matrix.
#[derive(Debug, Clone)]
pub struct CoupledInductorGroup {
    pub id: ComponentId,
    pub name: String,
    pub members: Vec<CoupledMember>,
    pub method: IntegrationMethod,
    mutual: Vec<Vec<f64>>,
    gamma: Vec<Vec<f64>>,
}

impl CoupledInductorGroup {
    /// Build a group from its members and `(i, j, k)` coupling factors.
    pub fn new(
        id: ComponentId,
        name: String,
        members: Vec<CoupledMember>,
        couplings: &[(usize, usize, f64)],
        method: IntegrationMethod,
    ) -> Result<Self> {
        let n = members.len();
        let mut mutual = vec![vec![0.0; n]; n];
        for &(i, j, k) in couplings {
            if i == j || i >= n || j >= n {
                return Err(PowersimError::invalid_component(
                    &name,
                    "coupling must join two distinct members",
                ));
            }
            let m = k * (members[i].inductance * members[j].inductance).sqrt();
            mutual[i][j] = m;
            mutual[j][i] = m;
        }

        let mut lambda = mutual.clone();
        for (i, member) in members.iter().enumerate() {
            lambda[i][i] = member.inductance;
        }
        let gamma = cholesky_inverse(&lambda)
            .ok_or_else(|| PowersimError::NotPositiveDefinite { group: name.clone() })?;

        Ok(Self {
            id,
            name,
            members,
            method,
            mutual,
            gamma,
        })
    }

    /// Mutual inductance between members `i` and `j`; `None` on the diagonal.
    pub fn mutual_inductance(&self, i: usize, j: usize) -> Option<f64> {
        (i != j).then(|| self.mutual[i][j])
    }

    /// Inverse inductance matrix Γ.
    pub fn inverse_inductance(&self) -> &[Vec<f64>] {
        &self.gamma
    }

    /// `Σ_j Γ_ij * V_j_old` for every member.
    fn old_voltage_products(&self) -> Vec<f64> {
        self.gamma
            .iter()
            .map(|row| row.iter().zip(&self.members).map(|(g, m)| g * m.v_old).sum())
            .collect()
    }

    /// History current of every member for step `dt`.
    ///
    /// The trapezoidal history of one member depends on the old voltages of
    /// all members, so the products are formed for the whole group before any
    /// member's source value is produced.
    pub fn history_currents(&self, dt: f64) -> Vec<f64> {
        let products = match self.method {
            IntegrationMethod::Trapezoidal => self.old_voltage_products(),
            _ => vec![0.0; self.members.len()],
        };
        self.members
            .iter()
            .zip(products)
            .map(|(m, lp)| match self.method {
                IntegrationMethod::BackwardEuler => m.i_old,
                IntegrationMethod::Trapezoidal => m.i_old + 0.5 * dt * lp,
                IntegrationMethod::Gear => (4.0 / 3.0) * m.i_old - (1.0 / 3.0) * m.i_old_old,
            })
            .collect()
    }
}

impl Stampable for CoupledInductorGroup {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64) {
        let scale = self.method.inductor_scale() * dt;
        for (i, out) in self.members.iter().enumerate() {
            for (j, ctrl) in self.members.iter().enumerate() {
                mna.stamp_transconductance(
                    out.nodes[0],
                    out.nodes[1],
                    ctrl.nodes[0],
                    ctrl.nodes[1],
                    scale * self.gamma[i][j],
                );
            }
        }
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, _time: f64, dt: f64) {
        for (member, history) in self.members.iter().zip(self.history_currents(dt)) {
            mna.stamp_current_source(member.nodes[0], member.nodes[1], history);
        }
    }
}

impl HistoryUpdatable for CoupledInductorGroup {
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64) {
        for member in &mut self.members {
            member.voltage = mna.voltage_across(member.nodes[0], member.nodes[1]);
        }
        let trapezoidal = self.method == IntegrationMethod::Trapezoidal;
        let increments: Vec<f64> = self
            .gamma
            .iter()
            .map(|row| {
                dt * row
                    .iter()
                    .zip(&self.members)
                    .map(|(g, m)| g * if trapezoidal { m.voltage + m.v_old } else { m.voltage })
                    .sum::<f64>()
            })
            .collect();
        for (member, delta) in self.members.iter_mut().zip(increments) {
            member.current = self.method.inductor_current(delta, member.i_old, member.i_old_old);
        }
    }

    fn commit(&mut self) {
        for member in &mut self.members {
            member.i_old_old = member.i_old;
            member.i_old = member.current;
            member.v_old = member.voltage;
        }
    }
}

/// Inverse of a symmetric positive-definite matrix via Cholesky factorization.
/// Returns `None` if the matrix is not positive definite.
fn cholesky_inverse(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = a[i][j] - (0..j).map(|k| l[i][k] * l[j][k]).sum::<f64>();
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][i] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // Solve L L^T x = e_c column by column
    let mut inv = vec![vec![0.0; n]; n];
    for c in 0..n {
        let mut y = vec![0.0; n];
        for i in 0..n {
            let rhs = if i == c { 1.0 } else { 0.0 };
            y[i] = (rhs - (0..i).map(|k| l[i][k] * y[k]).sum::<f64>()) / l[i][i];
        }
        for i in (0..n).rev() {
            let x = (y[i] - ((i + 1)..n).map(|k| l[k][i] * inv[k][c]).sum::<f64>()) / l[i][i];
            inv[i][c] = x;
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn transformer(method: IntegrationMethod, k: f64) -> Result<CoupledInductorGroup> {
        let members = vec![
            CoupledMember::new(ComponentId(0), "L1".into(), [NodeId(1), NodeId(0)], 4e-3, 0.0),
            CoupledMember::new(ComponentId(1), "L2".into(), [NodeId(2), NodeId(0)], 1e-3, 0.0),
        ];
        CoupledInductorGroup::new(ComponentId(0), "K1".into(), members, &[(0, 1, k)], method)
    }

    #[test]
    fn test_mutual_matrix_symmetric() {
        let g = transformer(IntegrationMethod::BackwardEuler, 0.9).unwrap();
        let m = 0.9 * (4e-3f64 * 1e-3).sqrt();
        assert_relative_eq!(g.mutual_inductance(0, 1).unwrap(), m);
        assert_relative_eq!(g.mutual_inductance(1, 0).unwrap(), m);
        assert_eq!(g.mutual_inductance(0, 0), None);
    }

    #[test]
    fn test_gamma_inverts_inductance_matrix() {
        let g = transformer(IntegrationMethod::BackwardEuler, 0.5).unwrap();
        let m = 0.5 * 2e-3;
        let lambda = [[4e-3, m], [m, 1e-3]];
        let gamma = g.inverse_inductance();
        for i in 0..2 {
            for j in 0..2 {
                let v: f64 = (0..2).map(|k| lambda[i][k] * gamma[k][j]).sum();
                assert_relative_eq!(v, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_unity_coupling_rejected() {
        assert!(matches!(
            transformer(IntegrationMethod::BackwardEuler, 1.0),
            Err(PowersimError::NotPositiveDefinite { .. })
        ));
    }

    #[test]
    fn test_trapezoidal_history_uses_partner_voltage() {
        let mut g = transformer(IntegrationMethod::Trapezoidal, 0.5).unwrap();
        // Only the partner had a voltage in the last step
        let mut mna = MnaMatrix::new(3, 0);
        mna.x[1] = 2.0;
        g.update_history(&mna, 1e-6);
        g.commit();

        let dt = 1e-6;
        let history = g.history_currents(dt);
        let expected = g.members[0].i_old + 0.5 * dt * g.inverse_inductance()[0][1] * 2.0;
        assert_relative_eq!(history[0], expected, epsilon = 1e-15);
        assert!(history[0].abs() > 0.0);
    }

    #[test]
    fn test_uncoupled_group_matches_single_inductor() {
        use crate::components::Inductor;

        let dt = 1e-5;
        let member =
            CoupledMember::new(ComponentId(0), "L1".into(), [NodeId(1), NodeId(0)], 2e-3, 0.1);
        let mut group =
            CoupledInductorGroup::new(
                ComponentId(0),
                "K".into(),
                vec![member],
                &[],
                IntegrationMethod::Trapezoidal,
            )
            .unwrap();
        let mut single = Inductor::new(
            ComponentId(1),
            "L".into(),
            [NodeId(1), NodeId(0)],
            2e-3,
            0.1,
            IntegrationMethod::Trapezoidal,
        );

        let mut mna = MnaMatrix::new(2, 0);
        for v in [1.0, -0.5, 2.0] {
            mna.x[0] = v;
            group.update_history(&mna, dt);
            single.update_history(&mna, dt);
            assert_relative_eq!(group.members[0].current, single.current, epsilon = 1e-12);
            group.commit();
            single.commit();
        }

        let mut a = MnaMatrix::new(2, 0);
        let mut b = MnaMatrix::new(2, 0);
        group.stamp_conductance(&mut a, dt);
        group.stamp_excitation(&mut a, 0.0, dt);
        single.stamp_conductance(&mut b, dt);
        single.stamp_excitation(&mut b, 0.0, dt);
        assert_relative_eq!(a.get(0, 0), b.get(0, 0), epsilon = 1e-12);
        assert_relative_eq!(a.z[0], b.z[0], epsilon = 1e-12);
    }
}
