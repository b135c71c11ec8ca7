//! Bounded quasi-Newton minimization.
//!
//! Wraps `argmin`'s L-BFGS with a More-Thuente line search. Bounds are handled
//! by a smooth change of variables: each bounded parameter is driven by an
//! unconstrained angle through `x = lo + (hi − lo)·(sin θ + 1)/2`, so every
//! point the solver tries lies inside the box and a minimum on a face is an
//! ordinary stationary point in θ. The map also puts parameters of very
//! different magnitude (`ucvsq ~ 1e2`, `Γ ~ 1e-2`) on a common scale.
//!
//! The best point ever evaluated is tracked independently of the solver state,
//! so a solver failure degrades to "best known point" instead of an error.

use std::cell::{Cell, RefCell};
use std::fmt;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use crate::error::AppError;

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    /// Iteration cap.
    pub max_iter: u64,
    /// Gradient norm tolerance.
    pub tol_grad: f64,
    /// Cost change tolerance.
    pub tol_cost: f64,
    /// L-BFGS history length.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol_grad: 1e-12,
            tol_cost: 1e-13,
            m: 10,
        }
    }
}

/// Outcome of a minimization. Always carries a usable point.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub parameters: Vec<f64>,
    pub fval: f64,
    pub n_iter: u64,
    pub n_fev: usize,
    pub converged: bool,
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6e}, n_iter={}, n_fev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.converged
        )
    }
}

/// Scalar objective over a parameter vector.
///
/// Implementations must return a value for every input inside the bounds;
/// non-finite values are treated as "very bad" rather than as failures.
pub trait ObjectiveFunction {
    fn eval(&self, params: &[f64]) -> f64;
}

/// Stand-in cost for non-finite objective values.
const NON_FINITE_COST: f64 = f64::MAX / 4.0;

/// Central-difference step in angle coordinates.
const GRAD_STEP: f64 = 1e-6;

/// Fraction of the span a seed on a face is moved inward. `dx/dθ` vanishes
/// on the faces, so a seed exactly there would have a zero gradient.
const FACE_OFFSET: f64 = 1e-4;

fn finite_cost(v: f64) -> f64 {
    if v.is_finite() { v } else { NON_FINITE_COST }
}

/// Map between bounded parameters and unconstrained angles.
///
/// Parameters with an empty (or invalid) span are held at their lower bound
/// and have no angle.
struct SineBox {
    lower: Vec<f64>,
    span: Vec<f64>,
    free: Vec<usize>,
}

impl SineBox {
    fn new(bounds: &[(f64, f64)]) -> Self {
        let lower: Vec<f64> = bounds.iter().map(|&(lo, _)| lo).collect();
        let span: Vec<f64> = bounds
            .iter()
            .map(|&(lo, hi)| {
                let s = hi - lo;
                if s.is_finite() && s > 0.0 { s } else { 0.0 }
            })
            .collect();
        let free = (0..span.len()).filter(|&i| span[i] > 0.0).collect();
        Self { lower, span, free }
    }

    /// Project `params` onto the box.
    fn clamp(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .zip(self.lower.iter().zip(&self.span))
            .map(|(&x, (&lo, &span))| {
                if x.is_finite() {
                    lo + (x - lo).clamp(0.0, span)
                } else {
                    lo
                }
            })
            .collect()
    }

    fn to_angles(&self, params: &[f64]) -> Vec<f64> {
        self.free
            .iter()
            .map(|&i| {
                let u = ((params[i] - self.lower[i]) / self.span[i]).clamp(FACE_OFFSET, 1.0 - FACE_OFFSET);
                (2.0 * u - 1.0).asin()
            })
            .collect()
    }

    fn to_params(&self, angles: &[f64]) -> Vec<f64> {
        let mut params = self.lower.clone();
        for (&i, &theta) in self.free.iter().zip(angles) {
            let u = if theta.is_finite() { 0.5 * (theta.sin() + 1.0) } else { 0.0 };
            params[i] = self.lower[i] + self.span[i] * u;
        }
        params
    }
}

/// Lowest cost seen so far, in parameter space.
#[derive(Default)]
struct BestPoint {
    best: RefCell<Option<(f64, Vec<f64>)>>,
    evaluations: Cell<usize>,
}

impl BestPoint {
    fn record(&self, cost: f64, params: &[f64]) {
        self.evaluations.set(self.evaluations.get() + 1);
        let mut best = self.best.borrow_mut();
        let improved = match best.as_ref() {
            Some((c, _)) => cost < *c,
            None => true,
        };
        if improved {
            *best = Some((cost, params.to_vec()));
        }
    }
}

/// Wrapper to make an [`ObjectiveFunction`] compatible with argmin.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    map: &'a SineBox,
    tracker: &'a BestPoint,
}

impl ArgminProblem<'_> {
    fn cost_at(&self, angles: &[f64]) -> f64 {
        finite_cost(self.objective.eval(&self.map.to_params(angles)))
    }
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, angles: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let params = self.map.to_params(angles);
        let cost = finite_cost(self.objective.eval(&params));
        self.tracker.record(cost, &params);
        Ok(cost)
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, angles: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut g = vec![0.0; angles.len()];
        let mut shifted = angles.clone();

        for i in 0..angles.len() {
            let theta = angles[i];
            shifted[i] = theta + GRAD_STEP;
            let f_up = self.cost_at(&shifted);
            shifted[i] = theta - GRAD_STEP;
            let f_down = self.cost_at(&shifted);
            shifted[i] = theta;

            g[i] = (f_up - f_down) / (2.0 * GRAD_STEP);
        }

        Ok(g)
    }
}

/// L-BFGS with box constraints.
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` inside `bounds`, starting from `init_params`.
    ///
    /// A seed outside the box is projected onto it. Only malformed input
    /// (length mismatch, negative tolerances) is an error. Solver failures
    /// are logged and the best evaluated point is returned with
    /// `converged = false`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult, AppError> {
        if init_params.len() != bounds.len() {
            return Err(AppError::config(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let map = SineBox::new(bounds);
        let tracker = BestPoint::default();
        let start = map.clamp(init_params);
        tracker.record(finite_cost(objective.eval(&start)), &start);

        let (n_iter, converged, message) = if map.free.is_empty() {
            (0, true, "all parameters fixed by their bounds".to_string())
        } else {
            self.run_solver(objective, &map, &tracker, map.to_angles(&start))?
        };

        let n_fev = tracker.evaluations.get();
        let (fval, parameters) = match tracker.best.take() {
            Some(best) => best,
            None => (f64::NAN, start),
        };

        let result = OptimizationResult {
            parameters,
            fval,
            n_iter,
            n_fev,
            converged,
            message,
        };
        log::debug!("{result}");
        Ok(result)
    }

    fn run_solver(
        &self,
        objective: &dyn ObjectiveFunction,
        map: &SineBox,
        tracker: &BestPoint,
        init_angles: Vec<f64>,
    ) -> Result<(u64, bool, String), AppError> {
        let problem = ArgminProblem { objective, map, tracker };

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol_grad)
            .map_err(|e| AppError::config(format!("invalid optimizer tolerance (grad): {e}")))?
            .with_tolerance_cost(self.config.tol_cost)
            .map_err(|e| AppError::config(format!("invalid optimizer tolerance (cost): {e}")))?;

        let run = Executor::new(problem, solver)
            .configure(|state| state.param(init_angles).max_iters(self.config.max_iter))
            .run();

        Ok(match run {
            Ok(res) => {
                let state = res.state();
                let termination = state.get_termination_status();
                let converged = matches!(
                    termination,
                    TerminationStatus::Terminated(TerminationReason::SolverConverged)
                        | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
                );
                (state.get_iter(), converged, termination.to_string())
            }
            Err(e) => {
                log::warn!("optimizer stopped early, keeping best evaluated point: {e}");
                (0, false, e.to_string())
            }
        })
    }
}
