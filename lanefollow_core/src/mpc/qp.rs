//! Convex QP interface and the OSQP backend.
//!
//!   minimise ½ zᵀ P z + qᵀ z   subject to   l ≤ A z ≤ u
//!
//! The controller builds dense matrices; the backend converts them to CSC.

use crate::config::SolverSettings;
use crate::error::SolveError;
use crate::types::{DMat, DVec};
use osqp::{CscMatrix, Problem, Settings, Status};
use std::time::Instant;
use tracing::trace;

/// One QP instance. `l`/`u` use ±∞ for one-sided rows.
#[derive(Clone, Debug)]
pub struct QpProblem {
    pub p: DMat,
    pub q: DVec,
    pub a: DMat,
    pub l: DVec,
    pub u: DVec,
    /// Primal starting point
    pub warm_start: Option<DVec>,
}

impl QpProblem {
    pub fn num_variables(&self) -> usize {
        self.q.len()
    }
}

/// Anything that can solve a [`QpProblem`].
pub trait QpSolver {
    fn solve(&mut self, problem: &QpProblem) -> Result<DVec, SolveError>;
}

/// OSQP (ADMM) backend.
pub struct OsqpSolver {
    settings: SolverSettings,
}

impl OsqpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    fn osqp_settings(&self) -> Settings {
        Settings::default()
            .verbose(false)
            .polish(true)
            .eps_abs(self.settings.eps_abs)
            .eps_rel(self.settings.eps_rel)
            .max_iter(self.settings.max_iterations)
            .time_limit(Some(self.settings.budget()))
            .warm_start(true)
    }
}

fn to_csc(m: &DMat) -> CscMatrix<'static> {
    CscMatrix::from_column_iter_dense(m.nrows(), m.ncols(), m.iter().copied())
}

impl QpSolver for OsqpSolver {
    fn solve(&mut self, problem: &QpProblem) -> Result<DVec, SolveError> {
        let start = Instant::now();
        let p = to_csc(&problem.p).into_upper_tri();
        let a = to_csc(&problem.a);

        let mut osqp = Problem::new(
            p,
            problem.q.as_slice(),
            a,
            problem.l.as_slice(),
            problem.u.as_slice(),
            &self.osqp_settings(),
        )
        .map_err(|e| SolveError::Setup(format!("{e:?}")))?;

        if let Some(x0) = &problem.warm_start {
            if x0.len() == problem.num_variables() {
                osqp.warm_start_x(x0.as_slice());
            }
        }

        let result = match osqp.solve() {
            Status::Solved(sol) | Status::SolvedInaccurate(sol) => {
                Ok(DVec::from_column_slice(sol.x()))
            }
            Status::MaxIterationsReached(_) => Err(SolveError::MaxIterations {
                iterations: self.settings.max_iterations,
            }),
            Status::TimeLimitReached(_) => Err(SolveError::Timeout {
                elapsed: start.elapsed(),
                budget: self.settings.budget(),
            }),
            Status::PrimalInfeasible(_)
            | Status::PrimalInfeasibleInaccurate(_)
            | Status::DualInfeasible(_)
            | Status::DualInfeasibleInaccurate(_) => Err(SolveError::Infeasible),
            Status::NonConvex(_) => Err(SolveError::Other("problem is non-convex".into())),
            _ => Err(SolveError::Other("unexpected solver status".into())),
        };

        let elapsed = start.elapsed();
        trace!(elapsed_us = elapsed.as_micros() as u64, "qp solved");
        // Setup and polishing sit outside OSQP's own time limit.
        if result.is_ok() && elapsed > self.settings.budget() {
            return Err(SolveError::Timeout {
                elapsed,
                budget: self.settings.budget(),
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    fn settings() -> SolverSettings {
        SolverSettings {
            time_budget: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn solves_box_constrained_problem() {
        // min (z0 − 3)² + (z1 + 1)²  s.t. 0 ≤ z0 ≤ 2, −5 ≤ z1 ≤ 5
        let problem = QpProblem {
            p: DMat::identity(2, 2) * 2.0,
            q: DVec::from_vec(vec![-6.0, 2.0]),
            a: DMat::identity(2, 2),
            l: DVec::from_vec(vec![0.0, -5.0]),
            u: DVec::from_vec(vec![2.0, 5.0]),
            warm_start: None,
        };
        let z = OsqpSolver::new(settings()).solve(&problem).unwrap();
        assert_abs_diff_eq!(z[0], 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(z[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn one_sided_rows_accept_infinite_bounds() {
        // min z²  s.t. z ≥ 1
        let problem = QpProblem {
            p: DMat::identity(1, 1) * 2.0,
            q: DVec::zeros(1),
            a: DMat::identity(1, 1),
            l: DVec::from_element(1, 1.0),
            u: DVec::from_element(1, f64::INFINITY),
            warm_start: Some(DVec::from_element(1, 1.0)),
        };
        let z = OsqpSolver::new(settings()).solve(&problem).unwrap();
        assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn exhausted_budget_reports_timeout() {
        // min ‖z − 1‖²  s.t. −10 ≤ z ≤ 10, 40 variables
        let n = 40;
        let problem = QpProblem {
            p: DMat::identity(n, n) * 2.0,
            q: DVec::from_element(n, -2.0),
            a: DMat::identity(n, n),
            l: DVec::from_element(n, -10.0),
            u: DVec::from_element(n, 10.0),
            warm_start: None,
        };
        let tiny = SolverSettings {
            time_budget: 1e-9,
            ..Default::default()
        };
        match OsqpSolver::new(tiny).solve(&problem) {
            Err(SolveError::Timeout { budget, .. }) => {
                assert_eq!(budget, Duration::from_secs_f64(1e-9));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn contradictory_bounds_are_infeasible() {
        // z ≥ 1 and z ≤ −1 through two rows
        let problem = QpProblem {
            p: DMat::identity(1, 1),
            q: DVec::zeros(1),
            a: DMat::from_row_slice(2, 1, &[1.0, 1.0]),
            l: DVec::from_vec(vec![1.0, f64::NEG_INFINITY]),
            u: DVec::from_vec(vec![f64::INFINITY, -1.0]),
            warm_start: None,
        };
        assert_eq!(
            OsqpSolver::new(settings()).solve(&problem),
            Err(SolveError::Infeasible)
        );
    }
}
