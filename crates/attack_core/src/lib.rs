pub mod config;
pub mod equilibrium;
pub mod error;
pub mod integrator;
pub mod model;
/// The `attack_core` crate is the numerical engine behind Attack-a-litics.
/// It integrates the four-variable cyber conflict model, linearizes it and
/// classifies the resulting equilibrium.
///
/// Key components:
/// - **Traits**: `DynamicalSystem` (vector field + analytic Jacobian), `AdaptiveStepper` (one attempted step).
/// - **Solvers**: RK45, RK23, DOP853, Radau IIA, BDF and an LSODA-style stiffness switcher.
/// - **Integrator**: adaptive step control on a fixed reporting grid with divergence and budget checks.
/// - **Stability**: eigenvalues of the Jacobian and the equilibrium type they imply.
/// - **Simulation**: request validation and the result payload served over HTTP.
pub mod simulation;
pub mod solvers;
pub mod stability;
pub mod traits;

pub use config::{EngineConfig, Tolerances};
pub use error::{SimResult, SimulationError};
pub use integrator::CancelToken;
pub use simulation::{simulate, simulate_with_config, SimulationRequest, SimulationResult};
