//! pflow.xyz-compatible JSON wire format for [`Net`].
//!
//! Bit-compatible with the format used by the pflow.xyz visual editor:
//! places and transitions are objects keyed by name, arcs are a flat list.
//! Gated behind the `serde` feature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StructureError;

use super::{Arc, Net, Place, Transition};

#[derive(Serialize, Deserialize)]
struct PlaceDoc {
    offset: usize,
    initial: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TransitionDoc {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ArcDoc {
    source: String,
    target: String,
    weight: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    inhibit: bool,
}

/// The on-the-wire document shape: places and transitions keyed by name, in
/// whatever order `serde_json` chooses to emit map entries.
#[derive(Serialize, Deserialize)]
struct NetDoc {
    places: BTreeMap<String, PlaceDoc>,
    transitions: BTreeMap<String, TransitionDoc>,
    arcs: Vec<ArcDoc>,
}

/// An error loading a [`Net`] from its JSON representation.
#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    /// The document was not valid JSON, or did not match the expected shape.
    #[error("malformed net JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document was well-formed JSON but violated a net structural
    /// invariant once loaded (duplicate name, bad arc, etc).
    #[error(transparent)]
    Structure(#[from] StructureError),
}

impl Net {
    /// Serializes this net to the pflow.xyz-compatible JSON format.
    ///
    /// Place `offset` fields reflect the net's sorted-name indexing (see
    /// [`Net::place_names_sorted`]), not insertion order, so that a
    /// round-tripped net's offsets are stable regardless of build order.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let sorted_names = self.place_names_sorted();
        let offsets: BTreeMap<&str, usize> =
            sorted_names.into_iter().enumerate().map(|(i, name)| (name, i)).collect();

        let places = self
            .places()
            .map(|p| {
                (
                    p.name.clone(),
                    PlaceDoc {
                        offset: offsets[p.name.as_str()],
                        initial: p.initial,
                        capacity: p.capacity,
                        x: p.x,
                        y: p.y,
                        label: p.label.clone(),
                    },
                )
            })
            .collect();

        let transitions = self
            .transitions()
            .map(|t| {
                (
                    t.name.clone(),
                    TransitionDoc { role: t.role.clone(), x: t.x, y: t.y, label: None },
                )
            })
            .collect();

        let arcs = self
            .arcs()
            .iter()
            .map(|a| ArcDoc {
                source: a.source.clone(),
                target: a.target.clone(),
                weight: a.weight,
                inhibit: a.inhibit,
            })
            .collect();

        serde_json::to_string_pretty(&NetDoc { places, transitions, arcs })
    }

    /// Parses a net from the pflow.xyz-compatible JSON format, re-validating
    /// every structural invariant as if the net had been built incrementally
    /// through [`Net::add_place`]/[`Net::add_transition`]/[`Net::add_arc`].
    ///
    /// The document's `offset` fields are accepted but not trusted: offsets
    /// are recomputed by sorted name at [`Net::freeze`] time, so a document
    /// with stale or inconsistent offsets still loads correctly.
    pub fn from_json(data: &str) -> Result<Net, JsonError> {
        let doc: NetDoc = serde_json::from_str(data)?;
        let mut net = Net::new();

        for (name, p) in doc.places {
            let mut place = Place::new(name, p.initial);
            place.capacity = p.capacity;
            place.x = p.x;
            place.y = p.y;
            place.label = p.label;
            net.add_place(place)?;
        }

        for (name, t) in doc.transitions {
            let mut transition = Transition::new(name).with_role(t.role);
            transition.x = t.x;
            transition.y = t.y;
            net.add_transition(transition)?;
        }

        for a in doc.arcs {
            let mut arc = Arc::new(a.source, a.target, a.weight);
            arc.inhibit = a.inhibit;
            net.add_arc(arc)?;
        }

        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Arc, Place, Transition};

    fn decay_net() -> Net {
        let mut net = Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_transition(Transition::new("decay")).unwrap();
        net.add_arc(Arc::new("A", "decay", 1.0)).unwrap();
        net
    }

    #[test]
    fn round_trips_through_json() {
        let net = decay_net();
        let json = net.to_json().unwrap();
        let loaded = Net::from_json(&json).unwrap();
        assert_eq!(loaded.num_places(), 1);
        assert_eq!(loaded.num_transitions(), 1);
        assert_eq!(loaded.place("A").unwrap().initial, 100.0);
        assert_eq!(loaded.arcs().len(), 1);
    }

    #[test]
    fn preserves_inhibit_flag() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 1.0)).unwrap();
        net.add_place(Place::new("B", 1.0)).unwrap();
        net.add_transition(Transition::new("t")).unwrap();
        net.add_arc(Arc::new("A", "t", 1.0)).unwrap();
        net.add_arc(Arc::new("B", "t", 1.0).inhibitor()).unwrap();

        let loaded = Net::from_json(&net.to_json().unwrap()).unwrap();
        assert!(loaded.arcs().iter().any(|a| a.inhibit));
    }

    #[test]
    fn rejects_structurally_invalid_document() {
        let bad = r#"{
            "places": {"A": {"offset": 0, "initial": 1.0}},
            "transitions": {},
            "arcs": [{"source": "A", "target": "nope", "weight": 1.0}]
        }"#;
        assert!(matches!(Net::from_json(bad), Err(JsonError::Structure(_))));
    }
}
