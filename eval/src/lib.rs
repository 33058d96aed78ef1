//! Interpreter for compiled scheme trigger expressions.
//!
//! Evaluation is pure: it reads the history store and the trouble-code
//! snapshot, never mutates them, and the same inputs always produce the
//! same result. Errors are values; the engine maps a root-level error to
//! "not triggering" for that tick.

use fleetd_store::SignalHistoryStore;
use fleetd_types::{
    BinaryOperator, ExpressionNode, GeofenceTest, SignalId, Timestamp, UnaryOperator,
    WindowFunction,
};
use thiserror::Error;

/// Guard against cyclic child indices in a malformed node array. The
/// compiler rejects trees deeper than its configured limit long before
/// this; the evaluator only needs protection from non-tree input.
const MAX_EVAL_DEPTH: u32 = 32;

/// Mean earth radius, meters.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Result value of one expression node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EvalValue {
    Bool(bool),
    Double(f64),
}

impl EvalValue {
    fn as_bool(self) -> Result<bool, EvalError> {
        match self {
            EvalValue::Bool(b) => Ok(b),
            EvalValue::Double(_) => Err(EvalError::TypeMismatch),
        }
    }

    fn as_double(self) -> Result<f64, EvalError> {
        match self {
            EvalValue::Double(d) => Ok(d),
            EvalValue::Bool(_) => Err(EvalError::TypeMismatch),
        }
    }
}

/// Why an expression could not produce a value this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EvalError {
    /// A referenced signal has no sample, or a window is empty.
    #[error("no data for a referenced signal or window")]
    NoData,
    #[error("division by zero")]
    DivisionByZero,
    /// A boolean met an arithmetic operator or vice versa.
    #[error("operand type mismatch")]
    TypeMismatch,
    /// Child index out of bounds or the node array is not a tree.
    #[error("malformed expression")]
    InvalidExpression,
}

/// Everything one evaluation may look at.
pub struct EvalContext<'a> {
    pub now_ms: Timestamp,
    /// The owning condition's capture window; window functions use it.
    pub window_ms: u64,
    pub store: &'a SignalHistoryStore,
}

/// Evaluates the node at `root` within `nodes`.
pub fn evaluate(
    nodes: &[ExpressionNode],
    root: usize,
    ctx: &EvalContext<'_>,
) -> Result<EvalValue, EvalError> {
    eval_node(nodes, root, ctx, 0)
}

fn eval_node(
    nodes: &[ExpressionNode],
    index: usize,
    ctx: &EvalContext<'_>,
    depth: u32,
) -> Result<EvalValue, EvalError> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(EvalError::InvalidExpression);
    }
    let node = nodes.get(index).ok_or(EvalError::InvalidExpression)?;

    match node {
        ExpressionNode::Float(value) => Ok(EvalValue::Double(*value)),
        ExpressionNode::Bool(value) => Ok(EvalValue::Bool(*value)),
        ExpressionNode::Signal(signal_id) => latest_value(ctx, *signal_id),
        ExpressionNode::Window {
            signal_id,
            function,
            ..
        } => window_value(ctx, *signal_id, *function),
        ExpressionNode::Unary { op, operand } => {
            let value = eval_node(nodes, *operand, ctx, depth + 1)?;
            match op {
                UnaryOperator::Not => Ok(EvalValue::Bool(!value.as_bool()?)),
                UnaryOperator::Negate => Ok(EvalValue::Double(-value.as_double()?)),
            }
        }
        ExpressionNode::Binary { op, left, right } => {
            eval_binary(nodes, *op, *left, *right, ctx, depth)
        }
        ExpressionNode::Geofence {
            test,
            latitude_signal,
            longitude_signal,
            latitude,
            longitude,
            radius_meters,
        } => {
            let lat = latest_value(ctx, *latitude_signal)?.as_double()?;
            let lon = latest_value(ctx, *longitude_signal)?.as_double()?;
            let distance = haversine_meters(lat, lon, *latitude, *longitude);
            let inside = distance <= *radius_meters;
            Ok(EvalValue::Bool(match test {
                GeofenceTest::Inside => inside,
                GeofenceTest::Outside => !inside,
            }))
        }
        ExpressionNode::DtcPresent { code } => {
            let snapshot = ctx.store.active_dtcs().ok_or(EvalError::NoData)?;
            let present = match code {
                Some(code) => snapshot.has_code(code),
                None => snapshot.has_any(),
            };
            Ok(EvalValue::Bool(present))
        }
    }
}

fn eval_binary(
    nodes: &[ExpressionNode],
    op: BinaryOperator,
    left: usize,
    right: usize,
    ctx: &EvalContext<'_>,
    depth: u32,
) -> Result<EvalValue, EvalError> {
    use BinaryOperator::*;

    // Logical operators short-circuit left to right; this is an
    // optimization only, the right operand has no side effects.
    if matches!(op, And | Or) {
        let lhs = eval_node(nodes, left, ctx, depth + 1)?.as_bool()?;
        let result = match (op, lhs) {
            (And, false) => false,
            (Or, true) => true,
            _ => eval_node(nodes, right, ctx, depth + 1)?.as_bool()?,
        };
        return Ok(EvalValue::Bool(result));
    }

    let lhs = eval_node(nodes, left, ctx, depth + 1)?;
    let rhs = eval_node(nodes, right, ctx, depth + 1)?;

    // Equality is defined for a same-typed pair; everything else needs
    // doubles. IEEE-754 semantics apply, so comparisons on NaN are false.
    match op {
        Equal | NotEqual => {
            let equal = match (lhs, rhs) {
                (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
                (EvalValue::Double(a), EvalValue::Double(b)) => a == b,
                _ => return Err(EvalError::TypeMismatch),
            };
            Ok(EvalValue::Bool(if op == Equal { equal } else { !equal }))
        }
        Smaller => Ok(EvalValue::Bool(lhs.as_double()? < rhs.as_double()?)),
        SmallerEqual => Ok(EvalValue::Bool(lhs.as_double()? <= rhs.as_double()?)),
        Bigger => Ok(EvalValue::Bool(lhs.as_double()? > rhs.as_double()?)),
        BiggerEqual => Ok(EvalValue::Bool(lhs.as_double()? >= rhs.as_double()?)),
        Add => Ok(EvalValue::Double(lhs.as_double()? + rhs.as_double()?)),
        Subtract => Ok(EvalValue::Double(lhs.as_double()? - rhs.as_double()?)),
        Multiply => Ok(EvalValue::Double(lhs.as_double()? * rhs.as_double()?)),
        Divide => {
            let divisor = rhs.as_double()?;
            if divisor == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(EvalValue::Double(lhs.as_double()? / divisor))
            }
        }
        And | Or => unreachable!("handled above"),
    }
}

fn latest_value(ctx: &EvalContext<'_>, signal_id: SignalId) -> Result<EvalValue, EvalError> {
    ctx.store
        .latest(signal_id)
        .map(|(_, value)| EvalValue::Double(value))
        .ok_or(EvalError::NoData)
}

fn window_value(
    ctx: &EvalContext<'_>,
    signal_id: SignalId,
    function: WindowFunction,
) -> Result<EvalValue, EvalError> {
    use WindowFunction::*;

    let now = ctx.now_ms as i64;
    let window = ctx.window_ms as i64;
    let (start, end) = match function {
        LastWindowMin | LastWindowMax | LastWindowAvg => (now - window, now),
        PrevLastWindowMin | PrevLastWindowMax | PrevLastWindowAvg => {
            (now - 2 * window, now - window)
        }
    };

    let mut count = 0u64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for (_, value) in ctx.store.samples_in_range(signal_id, start, end) {
        count += 1;
        min = min.min(value);
        max = max.max(value);
        sum += value;
    }
    if count == 0 {
        return Err(EvalError::NoData);
    }

    let result = match function {
        LastWindowMin | PrevLastWindowMin => min,
        LastWindowMax | PrevLastWindowMax => max,
        LastWindowAvg | PrevLastWindowAvg => sum / count as f64,
    };
    Ok(EvalValue::Double(result))
}

/// Great-circle distance between two (degree) coordinates, in meters.
fn haversine_meters(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let d_lat = (lat_b - lat_a).to_radians();
    let d_lon = (lon_b - lon_a).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat_a.to_radians().cos() * lat_b.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

#[cfg(test)]
mod tests;
