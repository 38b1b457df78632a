//! Straight-line numeric programs
//!
//! A [`Program`] is the emitted form of a vector or matrix of expressions: a
//! flat list of operations in SSA order, a deduplicated constant pool and one
//! output slot per entry. Identical subexpressions (after canonicalizing
//! commutative operands) are emitted once, so a Jacobian that repeats
//! `sin(x[2])` in every row evaluates it a single time.

use std::collections::{BTreeSet, HashMap};

use nalgebra::{DMatrix, DVector, RealField};
use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::symbolic::expr::{Expr, Func, Var};
use crate::{Error, Result};

/// One instruction. Operands refer to earlier slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Const(usize),
    Input(Var),
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Powi(usize, i32),
    Unary(Func, usize),
    Atan2(usize, usize),
}

impl Op {
    fn operands(&self) -> [Option<usize>; 2] {
        match *self {
            Op::Const(_) | Op::Input(_) => [None, None],
            Op::Neg(a) | Op::Powi(a, _) | Op::Unary(_, a) => [Some(a), None],
            Op::Add(a, b) | Op::Sub(a, b) | Op::Mul(a, b) | Op::Div(a, b) | Op::Atan2(a, b) => {
                [Some(a), Some(b)]
            }
        }
    }
}

/// Values bound to the free variables during evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a, T> {
    pub state: &'a [T],
    pub err_state: &'a [T],
    pub params: &'a [T],
    pub dt: T,
}

impl<'a, T: RealField + Float + Copy> Inputs<'a, T> {
    /// Inputs for an expression of the state only.
    pub fn state(state: &'a [T]) -> Self {
        Self {
            state,
            err_state: &[],
            params: &[],
            dt: T::zero(),
        }
    }

    pub fn with_dt(mut self, dt: T) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_params(mut self, params: &'a [T]) -> Self {
        self.params = params;
        self
    }

    pub fn with_err_state(mut self, err_state: &'a [T]) -> Self {
        self.err_state = err_state;
        self
    }

    // Unbound variables read as NaN; the runtime's finiteness checks catch them.
    fn lookup(&self, var: Var) -> T {
        let slot = match var {
            Var::State(i) => self.state.get(i),
            Var::ErrState(j) => self.err_state.get(j),
            Var::Param(k) => self.params.get(k),
            Var::Dt => return self.dt,
        };
        slot.copied().unwrap_or_else(T::nan)
    }
}

/// Emitted evaluator for a `rows × cols` block of expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    rows: usize,
    cols: usize,
    constants: Vec<f64>,
    ops: Vec<Op>,
    /// Slot of each output, row-major.
    outputs: Vec<usize>,
}

impl Program {
    /// Emits a column vector program.
    pub fn vector(exprs: &[Expr]) -> Self {
        let mut builder = ProgramBuilder::default();
        let outputs = exprs.iter().map(|e| builder.emit(e)).collect();
        builder.finish(exprs.len(), 1, outputs)
    }

    /// Emits a matrix program from row-major entries.
    pub fn matrix(entries: &[Vec<Expr>], cols: usize) -> Self {
        let mut builder = ProgramBuilder::default();
        let outputs = entries
            .iter()
            .flat_map(|row| row.iter())
            .map(|e| builder.emit(e))
            .collect();
        builder.finish(entries.len(), cols, outputs)
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of instructions after deduplication.
    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Free variables read by the program.
    pub fn inputs(&self) -> BTreeSet<Var> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Input(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Structural check run on programs loaded from disk.
    pub fn validate(&self) -> Result<()> {
        if self.outputs.len() != self.rows * self.cols {
            return Err(Error::Compilation(format!(
                "program declares {}x{} outputs but lists {}",
                self.rows,
                self.cols,
                self.outputs.len()
            )));
        }
        for (slot, op) in self.ops.iter().enumerate() {
            if let Op::Const(c) = op {
                if *c >= self.constants.len() {
                    return Err(Error::Compilation(format!(
                        "slot {slot} references missing constant {c}"
                    )));
                }
            }
            if op.operands().iter().flatten().any(|&operand| operand >= slot) {
                return Err(Error::Compilation(format!(
                    "slot {slot} reads a slot that is not yet computed"
                )));
            }
        }
        if self.outputs.iter().any(|&o| o >= self.ops.len()) {
            return Err(Error::Compilation("program output points past the tape".into()));
        }
        if self.constants.iter().any(|c| !c.is_finite()) {
            return Err(Error::Compilation("program holds a non-finite constant".into()));
        }
        Ok(())
    }

    fn run<T: RealField + Float + Copy>(&self, inputs: &Inputs<'_, T>) -> Vec<T> {
        let mut slots: Vec<T> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            let value = match *op {
                Op::Const(c) => nalgebra::convert::<f64, T>(self.constants[c]),
                Op::Input(var) => inputs.lookup(var),
                Op::Add(a, b) => slots[a] + slots[b],
                Op::Sub(a, b) => slots[a] - slots[b],
                Op::Mul(a, b) => slots[a] * slots[b],
                Op::Div(a, b) => slots[a] / slots[b],
                Op::Neg(a) => -slots[a],
                Op::Powi(a, n) => Float::powi(slots[a], n),
                Op::Unary(func, a) => {
                    let v = slots[a];
                    match func {
                        Func::Sqrt => Float::sqrt(v),
                        Func::Exp => Float::exp(v),
                        Func::Ln => Float::ln(v),
                        Func::Sin => Float::sin(v),
                        Func::Cos => Float::cos(v),
                        Func::Tan => Float::tan(v),
                    }
                }
                Op::Atan2(y, x) => Float::atan2(slots[y], slots[x]),
            };
            slots.push(value);
        }
        self.outputs.iter().map(|&o| slots[o]).collect()
    }

    /// Evaluates a column-vector program.
    pub fn eval_vector<T: RealField + Float + Copy>(&self, inputs: &Inputs<'_, T>) -> DVector<T> {
        DVector::from_vec(self.run(inputs))
    }

    /// Evaluates a matrix program.
    pub fn eval_matrix<T: RealField + Float + Copy>(&self, inputs: &Inputs<'_, T>) -> DMatrix<T> {
        DMatrix::from_row_iterator(self.rows, self.cols, self.run(inputs))
    }
}

// ============================================================================
// Emission
// ============================================================================

#[derive(Default)]
struct ProgramBuilder {
    constants: Vec<f64>,
    constant_index: HashMap<u64, usize>,
    ops: Vec<Op>,
    memo: HashMap<Op, usize>,
}

impl ProgramBuilder {
    fn constant(&mut self, value: f64) -> usize {
        // -0.0 and 0.0 are the same constant
        let value = if value == 0.0 { 0.0 } else { value };
        let next = self.constants.len();
        let index = *self.constant_index.entry(value.to_bits()).or_insert(next);
        if index == next {
            self.constants.push(value);
        }
        self.push(Op::Const(index))
    }

    fn push(&mut self, op: Op) -> usize {
        if let Some(&slot) = self.memo.get(&op) {
            return slot;
        }
        let slot = self.ops.len();
        self.ops.push(op);
        self.memo.insert(op, slot);
        slot
    }

    fn emit(&mut self, expr: &Expr) -> usize {
        match expr {
            Expr::Const(c) => self.constant(*c),
            Expr::Var(v) => self.push(Op::Input(*v)),
            Expr::Add(a, b) => {
                let (a, b) = (self.emit(a), self.emit(b));
                self.push(Op::Add(a.min(b), a.max(b)))
            }
            Expr::Mul(a, b) => {
                let (a, b) = (self.emit(a), self.emit(b));
                self.push(Op::Mul(a.min(b), a.max(b)))
            }
            Expr::Sub(a, b) => {
                let (a, b) = (self.emit(a), self.emit(b));
                self.push(Op::Sub(a, b))
            }
            Expr::Div(a, b) => {
                let (a, b) = (self.emit(a), self.emit(b));
                self.push(Op::Div(a, b))
            }
            Expr::Neg(a) => {
                let a = self.emit(a);
                self.push(Op::Neg(a))
            }
            Expr::Powi(a, n) => {
                let a = self.emit(a);
                self.push(Op::Powi(a, *n))
            }
            Expr::Unary(func, a) => {
                let a = self.emit(a);
                self.push(Op::Unary(*func, a))
            }
            Expr::Atan2(y, x) => {
                let (y, x) = (self.emit(y), self.emit(x));
                self.push(Op::Atan2(y, x))
            }
        }
    }

    fn finish(self, rows: usize, cols: usize, outputs: Vec<usize>) -> Program {
        Program {
            rows,
            cols,
            constants: self.constants,
            ops: self.ops,
            outputs,
        }
    }
}
