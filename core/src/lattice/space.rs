//! Explored part of the lattice.
//!
//! Only checked nodes are stored, in a flat map keyed by the packed
//! transformation index. The state of any other node is inferred on demand
//! from the checked anonymous / non-anonymous frontiers, so propagation is a
//! set insertion and does not depend on the order in which nodes of one
//! batch are recorded.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::lattice::{Lattice, Transformation};
use crate::metric::InformationLoss;

/// Anonymity state of a lattice node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anonymity {
    /// Satisfies every model.
    Anonymous,
    /// Violates at least one model.
    NotAnonymous,
    /// Inferred anonymous under asserted (practical) monotonicity.
    ProbablyAnonymous,
    /// Inferred non-anonymous under asserted (practical) monotonicity.
    ProbablyNotAnonymous,
    /// Never reached by the search.
    Unknown,
}

impl Anonymity {
    /// Etichetta testuale.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::NotAnonymous => "not-anonymous",
            Self::ProbablyAnonymous => "probably-anonymous",
            Self::ProbablyNotAnonymous => "probably-not-anonymous",
            Self::Unknown => "unknown",
        }
    }

    /// `true` for `Anonymous` and `ProbablyAnonymous`.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous | Self::ProbablyAnonymous)
    }
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Information-loss bounds of a node; a point for checked nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossRange {
    /// Lower bound.
    pub min: InformationLoss,
    /// Upper bound.
    pub max: InformationLoss,
}

impl LossRange {
    /// Degenerate range.
    #[must_use]
    pub const fn point(value: InformationLoss) -> Self {
        Self {
            min: value,
            max: value,
        }
    }
}

/// State of a node as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeState {
    /// Anonymity (checked or inferred).
    pub anonymity: Anonymity,
    /// `true` if the node was evaluated against the data.
    pub checked: bool,
    /// Information loss, present for checked nodes.
    pub loss: Option<InformationLoss>,
}

impl NodeState {
    const UNKNOWN: Self = Self {
        anonymity: Anonymity::Unknown,
        checked: false,
        loss: None,
    };
}

/// How far anonymity can be propagated along the lattice order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Every model is monotonic: inferred states are exact.
    Formal,
    /// Monotonicity is asserted by the caller: inferred states are `Probably*`.
    Practical,
    /// No inference.
    None,
}

/// Checked nodes plus the frontiers used for inference.
#[derive(Debug, Clone)]
pub struct SolutionSpace {
    lattice: Lattice,
    propagation: Propagation,
    nodes: HashMap<u64, NodeState>,
    anonymous: Vec<Transformation>,
    not_anonymous: Vec<Transformation>,
}

impl SolutionSpace {
    /// Empty space over `lattice`.
    #[must_use]
    pub fn new(lattice: Lattice, propagation: Propagation) -> Self {
        Self {
            lattice,
            propagation,
            nodes: HashMap::new(),
            anonymous: Vec::new(),
            not_anonymous: Vec::new(),
        }
    }

    /// Underlying lattice.
    #[must_use]
    pub const fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Propagation mode.
    #[must_use]
    pub const fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// Records the outcome of a check and propagates it.
    pub fn record(&mut self, t: &Transformation, anonymous: bool, loss: InformationLoss) {
        let Some(key) = self.lattice.index(t) else {
            return;
        };
        if self.nodes.contains_key(&key) {
            return;
        }
        let anonymity = if anonymous {
            Anonymity::Anonymous
        } else {
            Anonymity::NotAnonymous
        };
        self.nodes.insert(
            key,
            NodeState {
                anonymity,
                checked: true,
                loss: Some(loss),
            },
        );
        if self.propagation == Propagation::None {
            return;
        }
        // le frontiere restano minimali: un nodo già coperto non serve
        if anonymous {
            if !self.anonymous.iter().any(|a| a.is_generalized_by(t)) {
                self.anonymous.retain(|a| !t.is_generalized_by(a));
                self.anonymous.push(t.clone());
            }
        } else if !self.not_anonymous.iter().any(|n| t.is_generalized_by(n)) {
            self.not_anonymous.retain(|n| !n.is_generalized_by(t));
            self.not_anonymous.push(t.clone());
        }
    }

    /// `true` if `t` was evaluated against the data.
    #[must_use]
    pub fn is_checked(&self, t: &Transformation) -> bool {
        self.lattice
            .index(t)
            .is_some_and(|key| self.nodes.contains_key(&key))
    }

    /// Anonymity inferred from the frontiers, ignoring checked state.
    #[must_use]
    pub fn inferred(&self, t: &Transformation) -> Option<Anonymity> {
        let (yes, no) = match self.propagation {
            Propagation::None => return None,
            Propagation::Formal => (Anonymity::Anonymous, Anonymity::NotAnonymous),
            Propagation::Practical => (
                Anonymity::ProbablyAnonymous,
                Anonymity::ProbablyNotAnonymous,
            ),
        };
        if self.anonymous.iter().any(|a| a.is_generalized_by(t)) {
            Some(yes)
        } else if self.not_anonymous.iter().any(|n| t.is_generalized_by(n)) {
            Some(no)
        } else {
            None
        }
    }

    /// Checked or inferred state of `t`.
    #[must_use]
    pub fn state(&self, t: &Transformation) -> NodeState {
        if let Some(state) = self.lattice.index(t).and_then(|key| self.nodes.get(&key)) {
            return *state;
        }
        self.inferred(t).map_or(NodeState::UNKNOWN, |anonymity| NodeState {
            anonymity,
            checked: false,
            loss: None,
        })
    }

    /// Number of checked nodes.
    #[must_use]
    pub fn checked_count(&self) -> usize {
        self.nodes.len()
    }

    /// Checked nodes in lexicographic order.
    #[must_use]
    pub fn checked_nodes(&self) -> Vec<(Transformation, NodeState)> {
        let mut out: Vec<_> = self
            .nodes
            .iter()
            .map(|(key, state)| (self.lattice.transformation(*key), *state))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Checked anonymous node with minimal loss; ties go to the
    /// lexicographically smallest transformation.
    #[must_use]
    pub fn optimum(&self) -> Option<(Transformation, InformationLoss)> {
        self.checked_nodes()
            .into_iter()
            .filter(|(_, s)| s.anonymity == Anonymity::Anonymous)
            .filter_map(|(t, s)| s.loss.map(|l| (t, l)))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
    }

    /// Smallest loss among checked nodes `≥ t` (upper bound for `t`'s loss
    /// under a monotonic metric).
    #[must_use]
    pub fn checked_upper_bound(&self, t: &Transformation) -> Option<InformationLoss> {
        self.nodes
            .iter()
            .filter_map(|(key, state)| state.loss.map(|l| (*key, l)))
            .filter(|(key, _)| t.is_generalized_by(&self.lattice.transformation(*key)))
            .map(|(_, l)| l)
            .min()
    }
}
