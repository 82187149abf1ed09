//! Places, transitions, arcs, markings, and the net's frozen incidence
//! structure used by the ODE right-hand side.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use crate::error::StructureError;

#[cfg(feature = "serde")]
pub mod json;

/// A place: a node holding a real-valued token count.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    /// The place's unique name.
    pub name: String,
    /// The initial token count. Must be nonnegative.
    pub initial: f64,
    /// An optional upper bound on the token count. If present, must be
    /// nonnegative and at least `initial`.
    pub capacity: Option<f64>,
    /// Optional layout x-coordinate, carried through for visual tools.
    pub x: Option<f64>,
    /// Optional layout y-coordinate, carried through for visual tools.
    pub y: Option<f64>,
    /// Optional human-readable display label, distinct from `name`.
    pub label: Option<String>,
}

impl Place {
    /// Creates a place with only a name and initial token count set.
    pub fn new(name: impl Into<String>, initial: f64) -> Self {
        Place {
            name: name.into(),
            initial,
            capacity: None,
            x: None,
            y: None,
            label: None,
        }
    }

    /// Sets the place's capacity.
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the place's display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// The default role tag for a transition that was not given one explicitly.
pub const DEFAULT_ROLE: &str = "default";

/// A transition: a node with a firing rate, consuming tokens from its input
/// places and producing tokens into its output places proportional to arc
/// weights.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// The transition's unique name.
    pub name: String,
    /// An opaque role tag, defaulting to [`DEFAULT_ROLE`].
    pub role: String,
    /// Optional layout x-coordinate.
    pub x: Option<f64>,
    /// Optional layout y-coordinate.
    pub y: Option<f64>,
}

impl Transition {
    /// Creates a transition with the default role.
    pub fn new(name: impl Into<String>) -> Self {
        Transition {
            name: name.into(),
            role: DEFAULT_ROLE.to_string(),
            x: None,
            y: None,
        }
    }

    /// Sets the transition's role tag.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// A directed edge between a place and a transition (in either direction).
///
/// Named `Arc` to match the Petri-net vocabulary; not to be confused with
/// `std::sync::Arc`, which this crate always spells out fully where needed.
#[derive(Clone, Debug, PartialEq)]
pub struct Arc {
    /// The name of the arc's source (a place or a transition).
    pub source: String,
    /// The name of the arc's target (a place or a transition).
    pub target: String,
    /// The arc's weight. Must be strictly positive.
    pub weight: f64,
    /// Whether this is an inhibitor arc. Inhibitor arcs affect enabling only
    /// in discrete reachability semantics; the ODE semantics in [`crate::ode`]
    /// ignore them, but the flag round-trips through the JSON model.
    pub inhibit: bool,
}

impl Arc {
    /// Creates an ordinary (non-inhibitor) arc of the given weight.
    pub fn new(source: impl Into<String>, target: impl Into<String>, weight: f64) -> Self {
        Arc {
            source: source.into(),
            target: target.into(),
            weight,
            inhibit: false,
        }
    }

    /// Marks this arc as an inhibitor arc.
    pub fn inhibitor(mut self) -> Self {
        self.inhibit = true;
        self
    }
}

/// A mapping from place name to its token count: the canonical simulation
/// state.
pub type Marking = HashMap<String, f64>;

/// A mapping from transition name to its rate constant. Transitions absent
/// from the map default to a rate of `1.0`.
pub type RateMap = HashMap<String, f64>;

enum Endpoint {
    Place,
    Transition,
}

/// A Petri net: places, transitions, and the arcs between them.
///
/// Places and transitions are kept in insertion order (via [`IndexMap`]) so
/// that iteration order is reproducible without being meaningful on its own;
/// operations that must be deterministic across unordered collections (the
/// ODE variable indexing, parameter gather/scatter, grid-search layout) sort
/// by name explicitly rather than relying on map iteration order.
#[derive(Clone, Debug, Default)]
pub struct Net {
    places: IndexMap<String, Place>,
    transitions: IndexMap<String, Transition>,
    arcs: Vec<Arc>,
}

impl Net {
    /// Creates an empty net.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a place to the net.
    pub fn add_place(&mut self, place: Place) -> Result<(), StructureError> {
        if self.places.contains_key(&place.name) {
            return Err(StructureError::DuplicatePlace(place.name));
        }
        if let Some(capacity) = place.capacity {
            if capacity < place.initial {
                return Err(StructureError::CapacityViolated {
                    place: place.name,
                    capacity,
                    initial: place.initial,
                });
            }
        }
        self.places.insert(place.name.clone(), place);
        Ok(())
    }

    /// Adds a transition to the net.
    pub fn add_transition(&mut self, transition: Transition) -> Result<(), StructureError> {
        if self.transitions.contains_key(&transition.name) {
            return Err(StructureError::DuplicateTransition(transition.name));
        }
        self.transitions.insert(transition.name.clone(), transition);
        Ok(())
    }

    fn endpoint_kind(&self, name: &str) -> Option<Endpoint> {
        if self.places.contains_key(name) {
            Some(Endpoint::Place)
        } else if self.transitions.contains_key(name) {
            Some(Endpoint::Transition)
        } else {
            None
        }
    }

    /// Adds an arc to the net, preserving insertion order.
    pub fn add_arc(&mut self, arc: Arc) -> Result<(), StructureError> {
        if arc.weight <= 0.0 {
            return Err(StructureError::NonPositiveWeight(arc.weight));
        }
        let source_kind = self
            .endpoint_kind(&arc.source)
            .ok_or_else(|| StructureError::UnknownEndpoint(arc.source.clone()))?;
        let target_kind = self
            .endpoint_kind(&arc.target)
            .ok_or_else(|| StructureError::UnknownEndpoint(arc.target.clone()))?;
        match (source_kind, target_kind) {
            (Endpoint::Place, Endpoint::Transition) | (Endpoint::Transition, Endpoint::Place) => {}
            _ => {
                return Err(StructureError::InvalidArcDirection(
                    arc.source.clone(),
                    arc.target.clone(),
                ));
            }
        }
        self.arcs.push(arc);
        Ok(())
    }

    /// Returns the place with the given name, if any.
    pub fn place(&self, name: &str) -> Option<&Place> {
        self.places.get(name)
    }

    /// Returns the transition with the given name, if any.
    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.get(name)
    }

    /// Iterates over places in insertion order.
    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.places.values()
    }

    /// Iterates over transitions in insertion order.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.values()
    }

    /// Returns all arcs, in insertion order.
    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    /// Number of places.
    pub fn num_places(&self) -> usize {
        self.places.len()
    }

    /// Number of transitions.
    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// The initial marking implied by each place's `initial` field.
    pub fn initial_marking(&self) -> Marking {
        self.places.values().map(|p| (p.name.clone(), p.initial)).collect()
    }

    /// Place names, sorted ascending. Used at every boundary (ODE variable
    /// indexing, parameter gather/scatter, grid-search layout) where
    /// iteration order must be deterministic.
    pub fn place_names_sorted(&self) -> Vec<&str> {
        self.places.keys().map(String::as_str).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Transition names, sorted ascending.
    pub fn transition_names_sorted(&self) -> Vec<&str> {
        self.transitions.keys().map(String::as_str).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Precomputes the net's incidence structure: places and transitions are
    /// assigned dense integer indices by sorted name, and each transition's
    /// input/output arcs (inhibitor arcs excluded) are resolved to
    /// `(place_index, weight)` pairs. This is the hot-path representation
    /// consumed by [`crate::ode`].
    pub(crate) fn freeze(&self) -> Incidence {
        let place_index: IndexMap<String, usize> = self
            .place_names_sorted()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        let transition_index: IndexMap<String, usize> = self
            .transition_names_sorted()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        let mut inputs = vec![Vec::new(); transition_index.len()];
        let mut outputs = vec![Vec::new(); transition_index.len()];
        for arc in &self.arcs {
            if arc.inhibit {
                continue;
            }
            if let (Some(&p), Some(&t)) =
                (place_index.get(&arc.source), transition_index.get(&arc.target))
            {
                inputs[t].push((p, arc.weight));
            } else if let (Some(&t), Some(&p)) =
                (transition_index.get(&arc.source), place_index.get(&arc.target))
            {
                outputs[t].push((p, arc.weight));
            }
        }

        Incidence {
            place_index,
            transition_index,
            transition_inputs: inputs,
            transition_outputs: outputs,
        }
    }
}

/// The net's frozen incidence structure: names resolved to dense indices.
#[derive(Clone, Debug)]
pub(crate) struct Incidence {
    pub place_index: IndexMap<String, usize>,
    pub transition_index: IndexMap<String, usize>,
    /// Per transition (indexed in `transition_index` order): the places that
    /// feed it and their arc weights.
    pub transition_inputs: Vec<Vec<(usize, f64)>>,
    /// Per transition: the places it feeds and their arc weights.
    pub transition_outputs: Vec<Vec<(usize, f64)>>,
}

impl Incidence {
    pub fn num_places(&self) -> usize {
        self.place_index.len()
    }

    pub fn num_transitions(&self) -> usize {
        self.transition_index.len()
    }

    /// Resolves a rate map (by transition name, defaulting to `1.0`) into a
    /// dense vector in `transition_index` order.
    pub fn dense_rates(&self, rates: &RateMap) -> Vec<f64> {
        self.transition_index.keys().map(|name| rates.get(name).copied().unwrap_or(1.0)).collect()
    }

    /// Resolves a marking (by place name, defaulting to `0.0`) into a dense
    /// vector in `place_index` order.
    pub fn dense_marking(&self, marking: &Marking) -> nalgebra::DVector<f64> {
        nalgebra::DVector::from_iterator(
            self.num_places(),
            self.place_index.keys().map(|name| marking.get(name).copied().unwrap_or(0.0)),
        )
    }

    /// Converts a dense state vector back into a named marking.
    pub fn named_marking(&self, x: &nalgebra::DVector<f64>) -> Marking {
        self.place_index.iter().map(|(name, &i)| (name.clone(), x[i])).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decay_net() -> Net {
        let mut net = Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_transition(Transition::new("decay")).unwrap();
        net.add_arc(Arc::new("A", "decay", 1.0)).unwrap();
        net
    }

    #[test]
    fn rejects_duplicate_place() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 1.0)).unwrap();
        assert_eq!(
            net.add_place(Place::new("A", 2.0)),
            Err(StructureError::DuplicatePlace("A".to_string()))
        );
    }

    #[test]
    fn rejects_place_place_arc() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 1.0)).unwrap();
        net.add_place(Place::new("B", 1.0)).unwrap();
        assert!(matches!(
            net.add_arc(Arc::new("A", "B", 1.0)),
            Err(StructureError::InvalidArcDirection(_, _))
        ));
    }

    #[test]
    fn rejects_nonpositive_weight() {
        let mut net = decay_net();
        assert_eq!(
            net.add_arc(Arc::new("A", "decay", 0.0)),
            Err(StructureError::NonPositiveWeight(0.0))
        );
    }

    #[test]
    fn rejects_capacity_below_initial() {
        let mut net = Net::new();
        assert!(matches!(
            net.add_place(Place::new("A", 10.0).with_capacity(5.0)),
            Err(StructureError::CapacityViolated { .. })
        ));
    }

    #[test]
    fn freeze_assigns_sorted_indices() {
        let mut net = Net::new();
        net.add_place(Place::new("zeta", 1.0)).unwrap();
        net.add_place(Place::new("alpha", 2.0)).unwrap();
        let incidence = net.freeze();
        assert_eq!(incidence.place_index.get("alpha"), Some(&0));
        assert_eq!(incidence.place_index.get("zeta"), Some(&1));
    }

    #[test]
    fn freeze_ignores_inhibitor_arcs_for_incidence() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 1.0)).unwrap();
        net.add_place(Place::new("B", 1.0)).unwrap();
        net.add_transition(Transition::new("t")).unwrap();
        net.add_arc(Arc::new("A", "t", 1.0)).unwrap();
        net.add_arc(Arc::new("B", "t", 1.0).inhibitor()).unwrap();
        let incidence = net.freeze();
        assert_eq!(incidence.transition_inputs[0].len(), 1);
    }
}
