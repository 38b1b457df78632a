//! Symbolic scalar expressions
//!
//! A deliberately small expression language: enough to write continuous-time
//! dynamics and sensor equations, and to differentiate them exactly. The smart
//! constructors fold constants and the `0`/`1` identities as the tree is
//! built, which keeps derivatives compact without a separate simplifier.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// A free variable an expression can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Var {
    /// Component `i` of the full state vector.
    State(usize),
    /// Component `j` of the error-state correction (state injection only).
    ErrState(usize),
    /// Extra per-observation parameter `k` (measurement functions only).
    Param(usize),
    /// Elapsed time of the current prediction step.
    Dt,
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::State(i) => write!(f, "x[{i}]"),
            Var::ErrState(j) => write!(f, "dx[{j}]"),
            Var::Param(k) => write!(f, "p[{k}]"),
            Var::Dt => write!(f, "dt"),
        }
    }
}

/// Elementary unary functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Func {
    Sqrt,
    Exp,
    Ln,
    Sin,
    Cos,
    Tan,
}

impl Func {
    /// Evaluates the function on a plain `f64`.
    pub fn apply_f64(self, v: f64) -> f64 {
        match self {
            Func::Sqrt => v.sqrt(),
            Func::Exp => v.exp(),
            Func::Ln => v.ln(),
            Func::Sin => v.sin(),
            Func::Cos => v.cos(),
            Func::Tan => v.tan(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Func::Sqrt => "sqrt",
            Func::Exp => "exp",
            Func::Ln => "ln",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
        }
    }
}

/// A scalar symbolic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Var(Var),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Powi(Box<Expr>, i32),
    Unary(Func, Box<Expr>),
    Atan2(Box<Expr>, Box<Expr>),
}

impl Expr {
    // ------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------

    #[inline]
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    #[inline]
    pub fn zero() -> Self {
        Expr::Const(0.0)
    }

    #[inline]
    pub fn one() -> Self {
        Expr::Const(1.0)
    }

    #[inline]
    pub fn state(index: usize) -> Self {
        Expr::Var(Var::State(index))
    }

    #[inline]
    pub fn err_state(index: usize) -> Self {
        Expr::Var(Var::ErrState(index))
    }

    #[inline]
    pub fn param(index: usize) -> Self {
        Expr::Var(Var::Param(index))
    }

    #[inline]
    pub fn dt() -> Self {
        Expr::Var(Var::Dt)
    }

    /// Returns the value if this is a constant leaf.
    #[inline]
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// `true` if the expression is the literal `0`.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0.0)
    }

    /// `true` if the expression is the literal `1`.
    #[inline]
    pub fn is_one(&self) -> bool {
        self.as_const() == Some(1.0)
    }

    // ------------------------------------------------------------------
    // Folding constructors
    // ------------------------------------------------------------------

    pub fn add(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::Const(x + y),
            (Some(x), _) if x == 0.0 => b,
            (_, Some(y)) if y == 0.0 => a,
            _ => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::Const(x - y),
            (Some(x), _) if x == 0.0 => Expr::neg(b),
            (_, Some(y)) if y == 0.0 => a,
            _ => Expr::Sub(Box::new(a), Box::new(b)),
        }
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::Const(x * y),
            (Some(x), _) if x == 0.0 => Expr::zero(),
            (_, Some(y)) if y == 0.0 => Expr::zero(),
            (Some(x), _) if x == 1.0 => b,
            (_, Some(y)) if y == 1.0 => a,
            (Some(x), _) if x == -1.0 => Expr::neg(b),
            (_, Some(y)) if y == -1.0 => Expr::neg(a),
            _ => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    pub fn div(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) if y != 0.0 => Expr::Const(x / y),
            (Some(x), _) if x == 0.0 => Expr::zero(),
            (_, Some(y)) if y == 1.0 => a,
            _ => Expr::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn neg(a: Expr) -> Expr {
        match a {
            Expr::Const(x) => Expr::Const(-x),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn powi(self, n: i32) -> Expr {
        match (n, self.as_const()) {
            (0, _) => Expr::one(),
            (1, _) => self,
            (_, Some(x)) => Expr::Const(x.powi(n)),
            _ => Expr::Powi(Box::new(self), n),
        }
    }

    pub fn apply(self, func: Func) -> Expr {
        match self.as_const() {
            Some(x) => Expr::Const(func.apply_f64(x)),
            None => Expr::Unary(func, Box::new(self)),
        }
    }

    pub fn sqrt(self) -> Expr {
        self.apply(Func::Sqrt)
    }

    pub fn exp(self) -> Expr {
        self.apply(Func::Exp)
    }

    pub fn ln(self) -> Expr {
        self.apply(Func::Ln)
    }

    pub fn sin(self) -> Expr {
        self.apply(Func::Sin)
    }

    pub fn cos(self) -> Expr {
        self.apply(Func::Cos)
    }

    pub fn tan(self) -> Expr {
        self.apply(Func::Tan)
    }

    /// Four-quadrant arctangent of `self / x`.
    pub fn atan2(self, x: Expr) -> Expr {
        match (self.as_const(), x.as_const()) {
            (Some(a), Some(b)) => Expr::Const(a.atan2(b)),
            _ => Expr::Atan2(Box::new(self), Box::new(x)),
        }
    }

    // ------------------------------------------------------------------
    // Calculus
    // ------------------------------------------------------------------

    /// Exact partial derivative with respect to `var`.
    pub fn diff(&self, var: Var) -> Expr {
        match self {
            Expr::Const(_) => Expr::zero(),
            Expr::Var(v) => {
                if *v == var {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Add(a, b) => Expr::add(a.diff(var), b.diff(var)),
            Expr::Sub(a, b) => Expr::sub(a.diff(var), b.diff(var)),
            Expr::Mul(a, b) => Expr::add(
                Expr::mul(a.diff(var), (**b).clone()),
                Expr::mul((**a).clone(), b.diff(var)),
            ),
            Expr::Div(a, b) => {
                // (a'b - ab') / b²
                let num = Expr::sub(
                    Expr::mul(a.diff(var), (**b).clone()),
                    Expr::mul((**a).clone(), b.diff(var)),
                );
                Expr::div(num, (**b).clone().powi(2))
            }
            Expr::Neg(a) => Expr::neg(a.diff(var)),
            Expr::Powi(a, n) => {
                let da = a.diff(var);
                if da.is_zero() {
                    return Expr::zero();
                }
                Expr::mul(
                    Expr::mul(Expr::Const(f64::from(*n)), (**a).clone().powi(n - 1)),
                    da,
                )
            }
            Expr::Unary(func, a) => {
                let da = a.diff(var);
                if da.is_zero() {
                    return Expr::zero();
                }
                let a = (**a).clone();
                let outer = match func {
                    Func::Sqrt => Expr::div(Expr::one(), Expr::mul(Expr::Const(2.0), a.sqrt())),
                    Func::Exp => a.exp(),
                    Func::Ln => Expr::div(Expr::one(), a),
                    Func::Sin => a.cos(),
                    Func::Cos => Expr::neg(a.sin()),
                    Func::Tan => Expr::add(Expr::one(), a.tan().powi(2)),
                };
                Expr::mul(outer, da)
            }
            Expr::Atan2(y, x) => {
                // (x y' - y x') / (x² + y²)
                let num = Expr::sub(
                    Expr::mul((**x).clone(), y.diff(var)),
                    Expr::mul((**y).clone(), x.diff(var)),
                );
                if num.is_zero() {
                    return Expr::zero();
                }
                let den = Expr::add((**x).clone().powi(2), (**y).clone().powi(2));
                Expr::div(num, den)
            }
        }
    }

    /// Replaces every occurrence of `var` with `with`, re-folding constants.
    pub fn substitute(&self, var: Var, with: &Expr) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(*c),
            Expr::Var(v) => {
                if *v == var {
                    with.clone()
                } else {
                    Expr::Var(*v)
                }
            }
            Expr::Add(a, b) => Expr::add(a.substitute(var, with), b.substitute(var, with)),
            Expr::Sub(a, b) => Expr::sub(a.substitute(var, with), b.substitute(var, with)),
            Expr::Mul(a, b) => Expr::mul(a.substitute(var, with), b.substitute(var, with)),
            Expr::Div(a, b) => Expr::div(a.substitute(var, with), b.substitute(var, with)),
            Expr::Neg(a) => Expr::neg(a.substitute(var, with)),
            Expr::Powi(a, n) => a.substitute(var, with).powi(*n),
            Expr::Unary(func, a) => a.substitute(var, with).apply(*func),
            Expr::Atan2(y, x) => y.substitute(var, with).atan2(x.substitute(var, with)),
        }
    }

    /// Collects the free variables.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<Var>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(v) => {
                out.insert(*v);
            }
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Atan2(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expr::Neg(a) | Expr::Powi(a, _) | Expr::Unary(_, a) => a.collect_variables(out),
        }
    }

    /// Visits every constant leaf.
    pub fn constants(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_constants(&mut out);
        out
    }

    fn collect_constants(&self, out: &mut Vec<f64>) {
        match self {
            Expr::Const(c) => out.push(*c),
            Expr::Var(_) => {}
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Atan2(a, b) => {
                a.collect_constants(out);
                b.collect_constants(out);
            }
            Expr::Neg(a) | Expr::Powi(a, _) | Expr::Unary(_, a) => a.collect_constants(out),
        }
    }

    /// Reference tree-walking evaluator.
    ///
    /// The runtime never calls this; compiled programs are used instead.
    pub fn eval<F: Fn(Var) -> f64>(&self, lookup: &F) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Var(v) => lookup(*v),
            Expr::Add(a, b) => a.eval(lookup) + b.eval(lookup),
            Expr::Sub(a, b) => a.eval(lookup) - b.eval(lookup),
            Expr::Mul(a, b) => a.eval(lookup) * b.eval(lookup),
            Expr::Div(a, b) => a.eval(lookup) / b.eval(lookup),
            Expr::Neg(a) => -a.eval(lookup),
            Expr::Powi(a, n) => a.eval(lookup).powi(*n),
            Expr::Unary(func, a) => func.apply_f64(a.eval(lookup)),
            Expr::Atan2(y, x) => y.eval(lookup).atan2(x.eval(lookup)),
        }
    }
}

/// Row-major Jacobian `∂exprs[i]/∂vars[j]`.
pub fn jacobian(exprs: &[Expr], vars: &[Var]) -> Vec<Vec<Expr>> {
    exprs
        .iter()
        .map(|e| vars.iter().map(|v| e.diff(*v)).collect())
        .collect()
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Add(a, b) => write!(f, "({a} + {b})"),
            Expr::Sub(a, b) => write!(f, "({a} - {b})"),
            Expr::Mul(a, b) => write!(f, "({a} * {b})"),
            Expr::Div(a, b) => write!(f, "({a} / {b})"),
            Expr::Neg(a) => write!(f, "-{a}"),
            Expr::Powi(a, n) => write!(f, "{a}^{n}"),
            Expr::Unary(func, a) => write!(f, "{}({a})", func.name()),
            Expr::Atan2(y, x) => write!(f, "atan2({y}, {x})"),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::Var(var)
    }
}

// ============================================================================
// Operator overloading
// ============================================================================

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $ctor:path) => {
        impl $trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $ctor(self, rhs)
            }
        }

        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $ctor(self.clone(), rhs.clone())
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $ctor(self, Expr::Const(rhs))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $ctor(Expr::Const(self), rhs)
            }
        }
    };
}

impl_binop!(Add, add, Expr::add);
impl_binop!(Sub, sub, Expr::sub);
impl_binop!(Mul, mul, Expr::mul);
impl_binop!(Div, div, Expr::div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::neg(self)
    }
}
