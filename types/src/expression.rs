use crate::signal::SignalId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Aggregate computed over a sliding window of samples.
///
/// `Last*` variants cover `[now − W, now)`, `PrevLast*` variants the window
/// before that, `[now − 2W, now − W)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    LastWindowMin,
    LastWindowMax,
    LastWindowAvg,
    PrevLastWindowMin,
    PrevLastWindowMax,
    PrevLastWindowAvg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Smaller,
    SmallerEqual,
    Equal,
    NotEqual,
    Bigger,
    BiggerEqual,
    And,
    Or,
}

impl BinaryOperator {
    /// True for operators producing a boolean result.
    pub fn is_logical(self) -> bool {
        use BinaryOperator::*;
        matches!(
            self,
            Smaller | SmallerEqual | Equal | NotEqual | Bigger | BiggerEqual | And | Or
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeofenceTest {
    Inside,
    Outside,
}

/// Expression in the form a parsed scheme carries it: a tree with owned
/// children. The rule compiler flattens this into [`ExpressionNode`]s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExpressionTree {
    Float(f64),
    Bool(bool),
    Signal(SignalId),
    Window {
        signal_id: SignalId,
        function: WindowFunction,
        window_ms: u64,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<ExpressionTree>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<ExpressionTree>,
        right: Box<ExpressionTree>,
    },
    Geofence {
        test: GeofenceTest,
        latitude_signal: SignalId,
        longitude_signal: SignalId,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
    },
    /// Tests whether a named trouble code is active, or whether any code is
    /// active when `code` is `None`.
    DtcPresent { code: Option<String> },
}

impl ExpressionTree {
    /// Height of the tree; a leaf has depth 1.
    pub fn depth(&self) -> u32 {
        match self {
            ExpressionTree::Unary { operand, .. } => 1 + operand.depth(),
            ExpressionTree::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            _ => 1,
        }
    }

    /// Collects every signal id the expression reads.
    pub fn referenced_signals(&self, out: &mut BTreeSet<SignalId>) {
        match self {
            ExpressionTree::Signal(id) => {
                out.insert(*id);
            }
            ExpressionTree::Window { signal_id, .. } => {
                out.insert(*signal_id);
            }
            ExpressionTree::Geofence {
                latitude_signal,
                longitude_signal,
                ..
            } => {
                out.insert(*latitude_signal);
                out.insert(*longitude_signal);
            }
            ExpressionTree::Unary { operand, .. } => operand.referenced_signals(out),
            ExpressionTree::Binary { left, right, .. } => {
                left.referenced_signals(out);
                right.referenced_signals(out);
            }
            _ => {}
        }
    }

    /// Largest window any window-function node of this expression requests.
    pub fn max_window_ms(&self) -> u64 {
        match self {
            ExpressionTree::Window { window_ms, .. } => *window_ms,
            ExpressionTree::Unary { operand, .. } => operand.max_window_ms(),
            ExpressionTree::Binary { left, right, .. } => {
                left.max_window_ms().max(right.max_window_ms())
            }
            _ => 0,
        }
    }
}

/// One node of a compiled expression.
///
/// Children are referenced by index into the condition's flat node array;
/// the array is produced by a pre-order traversal and is acyclic by
/// construction.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionNode {
    Float(f64),
    Bool(bool),
    Signal(SignalId),
    Window {
        signal_id: SignalId,
        function: WindowFunction,
        window_ms: u64,
    },
    Unary {
        op: UnaryOperator,
        operand: usize,
    },
    Binary {
        op: BinaryOperator,
        left: usize,
        right: usize,
    },
    Geofence {
        test: GeofenceTest,
        latitude_signal: SignalId,
        longitude_signal: SignalId,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
    },
    DtcPresent { code: Option<String> },
}
