//! Circuit graph structure.

use std::collections::{HashMap, HashSet};

use super::netlist::{DeviceDef, Netlist};
use super::types::{BranchId, ComponentId, NodeId};
use crate::components::registry::{self, DeviceSpec, DeviceType};
use crate::components::{Component, CoupledInductorGroup, CoupledMember};
use crate::error::{PowersimError, Result};
use crate::solver::IntegrationMethod;

/// Index layout assigned to one netlist entry before construction.
struct Layout {
    device_type: &'static DeviceType,
    nodes: Vec<NodeId>,
    branch: Option<BranchId>,
}

/// Inductors joined by couplings, with `(member, member, k)` triples.
struct CouplingSet {
    name: String,
    members: Vec<usize>,
    couplings: Vec<(usize, usize, f64)>,
}

/// A complete circuit ready for simulation.
#[derive(Debug, Clone)]
pub struct Circuit {
    /// All components in the circuit, indexed by [`ComponentId`]
    pub components: Vec<Component>,

    /// Mapping from node names to node IDs
    pub node_map: HashMap<String, NodeId>,

    /// Reverse mapping from node IDs to names (for error messages)
    pub node_names: Vec<String>,

    /// Number of device terminals attached to each node
    pub terminal_counts: Vec<usize>,

    /// Number of nodes (including ground)
    pub num_nodes: usize,

    /// Number of branch current unknowns
    pub num_branches: usize,

    /// Device name to component; coupled inductors map to their group
    name_map: HashMap<String, ComponentId>,
}

fn is_ground(name: &str) -> bool {
    name == "0" || name.eq_ignore_ascii_case("gnd")
}

fn node_collision(component: &str, node: &str) -> PowersimError {
    PowersimError::invalid_component(
        component,
        format!("node '{}' collides with an internal node name", node),
    )
}

impl Circuit {
    /// Build a circuit from a netlist.
    ///
    /// Node and branch indices are assigned and control references are
    /// resolved here, so every constructed device has all the indices it
    /// stamps into. `method` is the default integration rule for reactive
    /// devices.
    pub fn from_netlist(netlist: &Netlist, method: IntegrationMethod) -> Result<Self> {
        let mut node_map = HashMap::new();
        let mut node_names = vec!["0".to_string()];
        let mut terminal_counts = vec![0usize];
        node_map.insert("0".to_string(), NodeId::GROUND);

        let mut num_branches = 0usize;
        let mut layouts = Vec::with_capacity(netlist.devices.len());
        let mut def_index: HashMap<&str, usize> = HashMap::new();
        let mut internal = HashSet::new();

        for (idx, def) in netlist.devices.iter().enumerate() {
            if def_index.insert(def.name.as_str(), idx).is_some() {
                return Err(PowersimError::DuplicateComponent { name: def.name.clone() });
            }
            let device_type =
                registry::lookup(&def.type_id).ok_or_else(|| PowersimError::UnknownDeviceType {
                    type_id: def.type_id.clone(),
                    name: def.name.clone(),
                })?;
            if def.nodes.len() != device_type.terminals {
                return Err(PowersimError::invalid_component(
                    &def.name,
                    format!(
                        "expected {} terminals, got {}",
                        device_type.terminals,
                        def.nodes.len()
                    ),
                ));
            }

            let mut nodes = Vec::with_capacity(device_type.terminals + device_type.internal_nodes);
            for node_name in &def.nodes {
                let key = if is_ground(node_name) { "0" } else { node_name.as_str() };
                if internal.contains(key) {
                    return Err(node_collision(&def.name, key));
                }
                let id = match node_map.get(key) {
                    Some(&id) => id,
                    None => {
                        let id = NodeId(node_names.len());
                        node_map.insert(key.to_string(), id);
                        node_names.push(key.to_string());
                        terminal_counts.push(0);
                        id
                    }
                };
                terminal_counts[id.0] += 1;
                nodes.push(id);
            }
            for k in 0..device_type.internal_nodes {
                let id = NodeId(node_names.len());
                let name = format!("{}#{}", def.name, k + 1);
                if node_map.contains_key(&name) {
                    return Err(node_collision(&def.name, &name));
                }
                node_map.insert(name.clone(), id);
                internal.insert(name.clone());
                node_names.push(name);
                terminal_counts.push(2);
                nodes.push(id);
            }

            let branch = device_type.has_branch.then(|| {
                num_branches += 1;
                BranchId(num_branches - 1)
            });
            layouts.push(Layout {
                device_type,
                nodes,
                branch,
            });
        }

        let coupling_sets = coupling_sets(netlist, &def_index)?;
        let mut set_of = vec![None; netlist.devices.len()];
        for (s, set) in coupling_sets.iter().enumerate() {
            for &m in &set.members {
                set_of[m] = Some(s);
            }
        }

        let mut components = Vec::with_capacity(netlist.devices.len());
        let mut name_map = HashMap::new();
        let mut built_sets = vec![false; coupling_sets.len()];

        for (idx, def) in netlist.devices.iter().enumerate() {
            let id = ComponentId(components.len());
            if let Some(s) = set_of[idx] {
                if built_sets[s] {
                    continue;
                }
                built_sets[s] = true;
                let set = &coupling_sets[s];
                let mut members = Vec::with_capacity(set.members.len());
                for &m in &set.members {
                    let member_def = &netlist.devices[m];
                    let spec =
                        device_spec(id, member_def, &layouts[m], &layouts, &def_index, method)?;
                    let member = match (layouts[m].device_type.factory)(&spec)? {
                        Component::Inductor(l) if l.saturation.is_none() => {
                            CoupledMember::new(id, l.name, l.nodes, l.inductance, l.current)
                        }
                        _ => {
                            return Err(PowersimError::invalid_component(
                                &member_def.name,
                                "only linear inductors can be coupled",
                            ))
                        }
                    };
                    name_map.insert(member_def.name.clone(), id);
                    members.push(member);
                }
                let group_method = member_method(&netlist.devices[set.members[0]], method)?;
                let group = CoupledInductorGroup::new(
                    id,
                    set.name.clone(),
                    members,
                    &set.couplings,
                    group_method,
                )?;
                name_map.insert(set.name.clone(), id);
                components.push(Component::CoupledInductors(group));
                continue;
            }

            let spec = device_spec(id, def, &layouts[idx], &layouts, &def_index, method)?;
            let component = (layouts[idx].device_type.factory)(&spec)?;
            name_map.insert(def.name.clone(), id);
            components.push(component);
        }

        log::debug!(
            "built circuit: {} components, {} nodes, {} branches",
            components.len(),
            node_names.len(),
            num_branches
        );

        Ok(Circuit {
            components,
            node_map,
            num_nodes: node_names.len(),
            node_names,
            terminal_counts,
            num_branches,
            name_map,
        })
    }

    /// Get the total size of the MNA solution vector.
    pub fn matrix_size(&self) -> usize {
        // Nodes (excluding ground) + branch currents
        (self.num_nodes - 1) + self.num_branches
    }

    /// Find a node ID by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        if is_ground(name) {
            return Some(NodeId::GROUND);
        }
        self.node_map.get(name).copied()
    }

    /// Get the name of a node.
    pub fn node_name(&self, node: NodeId) -> &str {
        &self.node_names[node.0]
    }

    /// Find a component by device name. Coupled inductors resolve to their group.
    pub fn find_component(&self, name: &str) -> Option<ComponentId> {
        self.name_map.get(name).copied()
    }

    /// Get a component by ID.
    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id.0]
    }

    /// Get a mutable component by ID.
    pub fn component_mut(&mut self, id: ComponentId) -> &mut Component {
        &mut self.components[id.0]
    }
}

fn member_method(def: &DeviceDef, default: IntegrationMethod) -> Result<IntegrationMethod> {
    match def.params.text("method") {
        Some(name) => name.parse(),
        None => Ok(default),
    }
}

fn device_spec<'a>(
    id: ComponentId,
    def: &'a DeviceDef,
    layout: &'a Layout,
    layouts: &[Layout],
    def_index: &HashMap<&str, usize>,
    method: IntegrationMethod,
) -> Result<DeviceSpec<'a>> {
    let control = if layout.device_type.needs_control {
        let reference = def.params.text("control").ok_or_else(|| {
            PowersimError::invalid_parameter(&def.name, "control", "required reference is missing")
        })?;
        let unresolved = |message: &str| PowersimError::UnresolvedReference {
            component: def.name.clone(),
            reference: reference.to_string(),
            message: message.to_string(),
        };
        let target = def_index.get(reference).ok_or_else(|| unresolved("no such device"))?;
        let branch = layouts[*target]
            .branch
            .ok_or_else(|| unresolved("device has no branch current unknown"))?;
        Some(branch)
    } else {
        None
    };

    Ok(DeviceSpec {
        id,
        name: &def.name,
        nodes: &layout.nodes,
        branch: layout.branch,
        control,
        params: &def.params,
        method,
    })
}

/// Group coupled inductors into connected sets.
fn coupling_sets(netlist: &Netlist, def_index: &HashMap<&str, usize>) -> Result<Vec<CouplingSet>> {
    let n = netlist.devices.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut pairs = Vec::with_capacity(netlist.couplings.len());
    for coupling in &netlist.couplings {
        let resolve = |target: &str| -> Result<usize> {
            let idx = *def_index.get(target).ok_or_else(|| PowersimError::UnresolvedReference {
                component: coupling.name.clone(),
                reference: target.to_string(),
                message: "no such device".to_string(),
            })?;
            if !netlist.devices[idx].type_id.eq_ignore_ascii_case("L") {
                return Err(PowersimError::UnresolvedReference {
                    component: coupling.name.clone(),
                    reference: target.to_string(),
                    message: "only inductors can be coupled".to_string(),
                });
            }
            Ok(idx)
        };
        let a = resolve(&coupling.first)?;
        let b = resolve(&coupling.second)?;
        if a == b || !coupling.k.is_finite() {
            return Err(PowersimError::invalid_component(
                &coupling.name,
                "coupling needs two distinct inductors and a finite factor",
            ));
        }
        let (ra, rb) = (root(&mut parent, a), root(&mut parent, b));
        parent[ra] = rb;
        pairs.push((a, b, coupling.k, coupling.name.as_str()));
    }

    let mut sets: Vec<CouplingSet> = Vec::new();
    let mut set_by_root: HashMap<usize, usize> = HashMap::new();
    for &(a, b, k, name) in &pairs {
        let r = root(&mut parent, a);
        let s = *set_by_root.entry(r).or_insert_with(|| {
            sets.push(CouplingSet {
                name: name.to_string(),
                members: Vec::new(),
                couplings: Vec::new(),
            });
            sets.len() - 1
        });
        let set = &mut sets[s];
        let mut position = |idx: usize| match set.members.iter().position(|&m| m == idx) {
            Some(p) => p,
            None => {
                set.members.push(idx);
                set.members.len() - 1
            }
        };
        let (i, j) = (position(a), position(b));
        set.couplings.push((i, j, k));
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Params;

    fn divider() -> Netlist {
        Netlist::new()
            .device("V", "V1", &["in", "0"], Params::new().with("v", 10.0))
            .device("R", "R1", &["in", "out"], Params::new().with("r", 1e3))
            .device("R", "R2", &["out", "GND"], Params::new().with("r", 1e3))
    }

    #[test]
    fn test_indices_assigned() {
        let circuit = Circuit::from_netlist(&divider(), IntegrationMethod::Trapezoidal).unwrap();
        assert_eq!(circuit.num_nodes, 3);
        assert_eq!(circuit.num_branches, 1);
        assert_eq!(circuit.matrix_size(), 3);
        assert_eq!(circuit.find_node("gnd"), Some(NodeId::GROUND));
        assert_eq!(circuit.terminal_counts[0], 2);
        assert_eq!(circuit.find_component("R2"), Some(ComponentId(2)));
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let dup = divider().device("R", "R1", &["a", "0"], Params::new().with("r", 1.0));
        assert!(matches!(
            Circuit::from_netlist(&dup, IntegrationMethod::Trapezoidal),
            Err(PowersimError::DuplicateComponent { .. })
        ));

        let unknown = divider().device("Q", "Q1", &["a", "b"], Params::new());
        assert!(matches!(
            Circuit::from_netlist(&unknown, IntegrationMethod::Trapezoidal),
            Err(PowersimError::UnknownDeviceType { .. })
        ));
    }

    #[test]
    fn test_control_reference_resolution() {
        // Forward reference to a later source is allowed
        let ok = Netlist::new()
            .device(
                "H",
                "H1",
                &["a", "0"],
                Params::new().with("gain", 2.0).with_str("control", "V1"),
            )
            .device("R", "R1", &["a", "0"], Params::new().with("r", 1.0))
            .device("V", "V1", &["b", "0"], Params::new().with("v", 1.0))
            .device("R", "R2", &["b", "0"], Params::new().with("r", 1.0));
        assert!(Circuit::from_netlist(&ok, IntegrationMethod::Trapezoidal).is_ok());

        let no_branch = Netlist::new()
            .device("R", "R1", &["a", "0"], Params::new().with("r", 1.0))
            .device(
                "H",
                "H1",
                &["a", "0"],
                Params::new().with("gain", 2.0).with_str("control", "R1"),
            );
        assert!(matches!(
            Circuit::from_netlist(&no_branch, IntegrationMethod::Trapezoidal),
            Err(PowersimError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_coupled_inductors_grouped() {
        let netlist = Netlist::new()
            .device("V", "V1", &["p", "0"], Params::new().with("v", 1.0))
            .device("L", "L1", &["p", "0"], Params::new().with("l", 1e-3))
            .device("L", "L2", &["s", "0"], Params::new().with("l", 4e-3))
            .device("R", "RL", &["s", "0"], Params::new().with("r", 10.0))
            .couple("K1", "L1", "L2", 0.95);
        let circuit = Circuit::from_netlist(&netlist, IntegrationMethod::BackwardEuler).unwrap();
        assert_eq!(circuit.components.len(), 3);
        let group = circuit.find_component("L2").unwrap();
        assert_eq!(circuit.find_component("L1"), Some(group));
        assert_eq!(circuit.find_component("K1"), Some(group));
        match circuit.component(group) {
            Component::CoupledInductors(g) => assert_eq!(g.members.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_machine_allocates_internal_nodes() {
        let netlist = Netlist::new().device(
            "DCM",
            "M1",
            &["a", "0"],
            Params::new().with("ra", 1.0).with("la", 1e-3).with("psi", 0.5).with("j", 0.01),
        );
        let circuit = Circuit::from_netlist(&netlist, IntegrationMethod::BackwardEuler).unwrap();
        assert_eq!(circuit.num_nodes, 4);
        assert_eq!(circuit.num_branches, 1);
        let internal = circuit.find_node("M1#2").unwrap();
        assert_eq!(circuit.node_name(internal), "M1#2");
    }

    #[test]
    fn test_internal_node_name_collision_rejected() {
        let machine =
            Params::new().with("ra", 1.0).with("la", 1e-3).with("psi", 0.5).with("j", 0.01);
        let user_first = Netlist::new()
            .device("R", "R1", &["M1#1", "0"], Params::new().with("r", 1.0))
            .device("DCM", "M1", &["a", "0"], machine.clone());
        assert!(matches!(
            Circuit::from_netlist(&user_first, IntegrationMethod::BackwardEuler),
            Err(PowersimError::InvalidComponent { .. })
        ));

        let machine_first = Netlist::new()
            .device("DCM", "M1", &["a", "0"], machine)
            .device("R", "R1", &["M1#2", "0"], Params::new().with("r", 1.0));
        assert!(matches!(
            Circuit::from_netlist(&machine_first, IntegrationMethod::BackwardEuler),
            Err(PowersimError::InvalidComponent { .. })
        ));
    }
}
