//! Static structural diagnostics for a [`Net`], evaluated against its
//! marking at `t0` only.
//!
//! Diagnostics accumulate into a single list of named findings rather than
//! returning on the first failure, so a caller sees every structural problem
//! a net has in one pass.

use derive_more::{Deref, From};

use crate::net::Net;

/// How serious a [`Finding`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; no action needed.
    Info,
    /// Worth a second look, but not necessarily wrong.
    Warning,
    /// Very likely a mistake in the net.
    Error,
}

/// One structural diagnostic about a net.
#[derive(Clone, Debug)]
pub struct Finding {
    /// How serious this finding is.
    pub severity: Severity,
    /// A short category tag (`"structure"`, `"connectivity"`,
    /// `"deadlock"`, `"boundedness"`, `"conservation"`).
    pub category: &'static str,
    /// A human-readable description.
    pub message: String,
    /// The place/transition names this finding is about.
    pub locations: Vec<String>,
    /// An optional suggested fix.
    pub suggestion: Option<String>,
}

impl Finding {
    fn new(severity: Severity, category: &'static str, message: impl Into<String>) -> Self {
        Finding { severity, category, message: message.into(), locations: Vec::new(), suggestion: None }
    }

    fn at(mut self, location: impl Into<String>) -> Self {
        self.locations.push(location.into());
        self
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// The diagnostics [`validate`] returns, in the order the checks ran.
///
/// A thin `Deref<Target = [Finding]>` wrapper rather than a bare `Vec`, so
/// that callers can iterate and index it directly while leaving room for
/// summary methods (severity counts, filtering) without breaking callers.
#[derive(Clone, Debug, Default, Deref, From)]
pub struct Findings(Vec<Finding>);

impl Findings {
    /// Returns the findings at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.0.iter().filter(move |f| f.severity >= severity)
    }

    /// `true` if any finding is [`Severity::Error`].
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|f| f.severity == Severity::Error)
    }
}

/// Runs every static structural check against `net`, using its declared
/// initial marking for the checks that need one (deadlock, boundedness).
/// Never fails; returns whatever diagnostics apply, possibly empty.
pub fn validate(net: &Net) -> Findings {
    let mut findings = Vec::new();
    check_structure(net, &mut findings);
    check_connectivity(net, &mut findings);
    check_deadlock(net, &mut findings);
    check_boundedness(net, &mut findings);
    check_conservation(net, &mut findings);
    Findings::from(findings)
}

fn check_structure(net: &Net, out: &mut Vec<Finding>) {
    if net.num_places() == 0 {
        out.push(Finding::new(Severity::Warning, "structure", "net has no places"));
    }
    if net.num_transitions() == 0 {
        out.push(Finding::new(Severity::Warning, "structure", "net has no transitions"));
    }
    if net.arcs().is_empty() {
        out.push(Finding::new(Severity::Warning, "structure", "net has no arcs"));
    }
    for place in net.places() {
        if place.initial < 0.0 {
            out.push(
                Finding::new(
                    Severity::Error,
                    "structure",
                    format!("place `{}` has a negative initial token count ({})", place.name, place.initial),
                )
                .at(place.name.clone()),
            );
        }
        if let Some(capacity) = place.capacity {
            if capacity < place.initial {
                out.push(
                    Finding::new(
                        Severity::Error,
                        "structure",
                        format!(
                            "place `{}` capacity {} is less than its initial tokens {}",
                            place.name, capacity, place.initial
                        ),
                    )
                    .at(place.name.clone()),
                );
            }
        }
    }
    for arc in net.arcs() {
        if arc.weight <= 0.0 {
            out.push(
                Finding::new(
                    Severity::Error,
                    "structure",
                    format!("arc `{}` -> `{}` has non-positive weight {}", arc.source, arc.target, arc.weight),
                )
                .at(arc.source.clone())
                .at(arc.target.clone()),
            );
        }
    }
}

fn check_connectivity(net: &Net, out: &mut Vec<Finding>) {
    for place in net.places() {
        let incoming = net.arcs().iter().filter(|a| a.target == place.name).count();
        let outgoing = net.arcs().iter().filter(|a| a.source == place.name).count();
        if incoming == 0 && outgoing == 0 {
            out.push(
                Finding::new(Severity::Warning, "connectivity", format!("place `{}` is disconnected", place.name))
                    .at(place.name.clone())
                    .suggest("connect it with an arc, or remove it"),
            );
        }
    }
    for transition in net.transitions() {
        let inputs = net.arcs().iter().filter(|a| a.target == transition.name && !a.inhibit).count();
        let outputs = net.arcs().iter().filter(|a| a.source == transition.name).count();
        if inputs == 0 && outputs == 0 {
            out.push(
                Finding::new(
                    Severity::Warning,
                    "connectivity",
                    format!("transition `{}` is disconnected", transition.name),
                )
                .at(transition.name.clone()),
            );
            continue;
        }
        if inputs == 0 {
            out.push(
                Finding::new(
                    Severity::Info,
                    "connectivity",
                    format!("transition `{}` has no inputs; it fires as a pure source", transition.name),
                )
                .at(transition.name.clone()),
            );
        }
        if outputs == 0 {
            out.push(
                Finding::new(
                    Severity::Info,
                    "connectivity",
                    format!("transition `{}` has no outputs; it fires as a pure sink", transition.name),
                )
                .at(transition.name.clone()),
            );
        }
    }
}

fn check_deadlock(net: &Net, out: &mut Vec<Finding>) {
    let initial = net.initial_marking();
    for transition in net.transitions() {
        for arc in net.arcs() {
            if arc.target == transition.name && !arc.inhibit {
                let tokens = initial.get(&arc.source).copied().unwrap_or(0.0);
                if tokens < arc.weight {
                    out.push(
                        Finding::new(
                            Severity::Error,
                            "deadlock",
                            format!(
                                "transition `{}` cannot fire at t0: place `{}` has {} tokens, needs {}",
                                transition.name, arc.source, tokens, arc.weight
                            ),
                        )
                        .at(transition.name.clone())
                        .at(arc.source.clone()),
                    );
                }
            }
        }
    }
}

fn check_boundedness(net: &Net, out: &mut Vec<Finding>) {
    for place in net.places() {
        let incoming = net.arcs().iter().filter(|a| a.target == place.name).count();
        let outgoing = net.arcs().iter().filter(|a| a.source == place.name).count();

        if outgoing == 0 && incoming > 0 {
            out.push(
                Finding::new(Severity::Info, "boundedness", format!("place `{}` is a sink (no outgoing arcs)", place.name))
                    .at(place.name.clone()),
            );
        } else if incoming == 0 && outgoing > 0 {
            out.push(
                Finding::new(Severity::Info, "boundedness", format!("place `{}` is a source (no incoming arcs)", place.name))
                    .at(place.name.clone()),
            );
        }

        if incoming > outgoing && place.capacity.is_none() {
            out.push(
                Finding::new(
                    Severity::Warning,
                    "boundedness",
                    format!(
                        "place `{}` has more incoming ({}) than outgoing ({}) arcs and no capacity; potentially unbounded",
                        place.name, incoming, outgoing
                    ),
                )
                .at(place.name.clone())
                .suggest("set a capacity if this place should be bounded"),
            );
        }
    }
}

fn check_conservation(net: &Net, out: &mut Vec<Finding>) {
    let mut all_conserve = true;
    for transition in net.transitions() {
        let input_weight: f64 = net
            .arcs()
            .iter()
            .filter(|a| a.target == transition.name && !a.inhibit)
            .map(|a| a.weight)
            .sum();
        let output_weight: f64 =
            net.arcs().iter().filter(|a| a.source == transition.name).map(|a| a.weight).sum();
        if (input_weight - output_weight).abs() > 1e-9 {
            all_conserve = false;
            out.push(
                Finding::new(
                    Severity::Warning,
                    "conservation",
                    format!(
                        "transition `{}` does not conserve tokens: {} in, {} out",
                        transition.name, input_weight, output_weight
                    ),
                )
                .at(transition.name.clone()),
            );
        }
    }
    if all_conserve && net.num_transitions() > 0 {
        out.push(Finding::new(Severity::Info, "conservation", "net conserves tokens across every transition"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Arc as NetArc, Place, Transition};

    #[test]
    fn flags_deadlocked_transition() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 0.0)).unwrap();
        net.add_transition(Transition::new("t")).unwrap();
        net.add_arc(NetArc::new("A", "t", 1.0)).unwrap();
        let findings = validate(&net);
        assert!(findings.iter().any(|f| f.category == "deadlock" && f.severity == Severity::Error));
    }

    #[test]
    fn flags_disconnected_place() {
        let mut net = Net::new();
        net.add_place(Place::new("lonely", 1.0)).unwrap();
        net.add_transition(Transition::new("t")).unwrap();
        let findings = validate(&net);
        assert!(findings.iter().any(|f| f.category == "connectivity" && f.locations.contains(&"lonely".to_string())));
    }

    #[test]
    fn balanced_net_is_reported_as_conserving() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 1.0)).unwrap();
        net.add_place(Place::new("B", 0.0)).unwrap();
        net.add_transition(Transition::new("convert")).unwrap();
        net.add_arc(NetArc::new("A", "convert", 1.0)).unwrap();
        net.add_arc(NetArc::new("convert", "B", 1.0)).unwrap();
        let findings = validate(&net);
        assert!(
            findings
                .iter()
                .any(|f| f.category == "conservation" && f.severity == Severity::Info)
        );
    }

    #[test]
    fn unbalanced_net_is_flagged() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 2.0)).unwrap();
        net.add_place(Place::new("B", 0.0)).unwrap();
        net.add_place(Place::new("C", 0.0)).unwrap();
        net.add_transition(Transition::new("split")).unwrap();
        net.add_arc(NetArc::new("A", "split", 1.0)).unwrap();
        net.add_arc(NetArc::new("split", "B", 1.0)).unwrap();
        net.add_arc(NetArc::new("split", "C", 1.0)).unwrap();
        let findings = validate(&net);
        assert!(findings.iter().any(|f| f.category == "conservation" && f.severity == Severity::Warning));
    }
}
