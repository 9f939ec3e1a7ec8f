// UTA-GMS Infrastructure - System Adapters
// Implements: Solver (external engine process)

pub mod subprocess_solver;

pub use subprocess_solver::{SolverCommandConfig, SolverInvocation, SubprocessSolver};
