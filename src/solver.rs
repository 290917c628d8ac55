use crate::{
    datatypes::{Element, Material, Mesh, MeshSource, Solution, Study, Vertex},
    error::FemError,
    mesher, post_processor,
    regions::{self, RIVET_EPSILON},
};
use argmin_observer_slog::SlogLogger;
use indicatif::ProgressBar;
use nalgebra::{matrix, DMatrix, DVector, SMatrix};
use nalgebra_sparse::CsrMatrix;
use slog::{info, warn, Logger};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const DOF: usize = 2;
pub const DEFAULT_CG_TOLERANCE: f64 = 1e-5;

/// Elements flatter than this, relative to their longest edge, are degenerate
const AREA_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Residual target, relative to the norm of the force vector
    pub tolerance: f64,
    /// Iteration cap; ten times the number of DOFs when unset
    pub max_iterations: Option<u64>,
    pub show_progress: bool,
    /// Log every conjugate gradient iteration to the terminal
    pub trace_iterations: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            tolerance: DEFAULT_CG_TOLERANCE,
            max_iterations: None,
            show_progress: false,
            trace_iterations: false,
        }
    }
}

impl SolverSettings {
    fn progress_bar(&self, len: u64) -> ProgressBar {
        if self.show_progress {
            ProgressBar::new(len)
        } else {
            ProgressBar::hidden()
        }
    }
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let x = DVector::from_column_slice(x);
        let ax: DVector<f64> = self.a * &x;
        Ok(ax.as_slice().to_vec())
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    initial_mag: f64,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(initial_residual: f64, target_residual: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            initial_mag: initial_residual.log10(),
            final_mag: target_residual.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = state.get_cost();
        if !cost.is_finite() || cost <= 0.0 {
            return Ok(());
        }

        let span = self.initial_mag - self.final_mag;
        if span <= 0.0 {
            return Ok(());
        }
        let fraction = ((self.initial_mag - cost.log10()) / span).clamp(0.0, 1.0);
        self.bar.set_position((1000.0 * fraction) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square, symmetric positive definite matrix
/// * `b` - The right hand side
/// * `settings` - Tolerance, iteration cap and observers
///
/// # Returns
/// A DVector that represents `x` from the system
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<DVector<f64>, FemError> {
    let b_norm = b.norm();
    let target_residual = settings.tolerance * b_norm;
    let max_iters = settings
        .max_iterations
        .unwrap_or(10 * b.nrows() as u64)
        .max(1);

    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b.as_slice().to_vec());
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };

    // residual norm <= t at this cost, whether argmin reports the norm or its square
    let target_cost = target_residual.min(target_residual * target_residual);

    let mut executor = Executor::new(operator, solver).configure(|state| {
        state
            .param(initial_guess)
            .max_iters(max_iters)
            .target_cost(target_cost)
    });
    if settings.show_progress {
        executor = executor.add_observer(
            ConjugateGradientObserverBar::new(b_norm, target_residual),
            ObserverMode::Always,
        );
    }
    if settings.trace_iterations {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }

    let res = match executor.run() {
        Ok(r) => r,
        Err(err) => {
            return Err(FemError::Convergence(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let best_param = match res.state().get_best_param() {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(FemError::Convergence(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    if best_param.iter().any(|u| !u.is_finite()) {
        return Err(FemError::Convergence(
            "Conjugate Gradient produced non-finite displacements".to_owned(),
        ));
    }

    let residual = (a * &best_param - b).norm();
    if residual > target_residual {
        return Err(FemError::Convergence(format!(
            "Residual {:.3e} above target {:.3e} after {} iterations",
            residual,
            target_residual,
            res.state().get_iter()
        )));
    }

    Ok(best_param)
}

/// Calculates the signed area of the element
///
/// Positive when the nodes run counter-clockwise.
pub fn compute_element_area(element: &Element, nodes: &[Vertex]) -> f64 {
    let v0 = &nodes[element.nodes[0]];
    let v1 = &nodes[element.nodes[1]];
    let v2 = &nodes[element.nodes[2]];

    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Signed area of an element that is known to be well formed
///
/// # Errors
/// `FemError::Geometry` when a node index is out of range or the triangle is
/// (numerically) collinear
pub fn checked_element_area(element: &Element, nodes: &[Vertex]) -> Result<f64, FemError> {
    if let Some(n) = element.nodes.iter().find(|n| **n >= nodes.len()) {
        return Err(FemError::Geometry(format!(
            "Element {:?} references missing node {n}",
            element.nodes
        )));
    }

    let area = compute_element_area(element, nodes);

    let [v0, v1, v2] = element.nodes.map(|i| nodes[i]);
    let longest = v0.distance(&v1).max(v1.distance(&v2)).max(v2.distance(&v0));
    if !(area.abs() > AREA_TOLERANCE * longest * longest) {
        return Err(FemError::Geometry(format!(
            "Element {:?} is degenerate (area {area:e})",
            element.nodes
        )));
    }

    Ok(area)
}

/// Calculates the strain-displacement matrix of the element
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - The mesh nodes
/// * `element_area` - The signed area of the element
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn compute_strain_displacement_matrix(
    element: &Element,
    nodes: &[Vertex],
    element_area: f64,
) -> SMatrix<f64, 3, 6> {
    let v0 = &nodes[element.nodes[0]];
    let v1 = &nodes[element.nodes[1]];
    let v2 = &nodes[element.nodes[2]];

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut strain_displacement_mat: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    strain_displacement_mat /= 2.0 * element_area;

    strain_displacement_mat
}

/// Calculates the plane stress elasticity matrix
///
/// # Returns
/// A 3x3 stress-strain matrix
pub fn compute_stress_strain_matrix(material: &Material) -> SMatrix<f64, 3, 3> {
    let poisson_ratio = material.poisson_ratio;

    let mut stress_strain_mat: SMatrix<f64, 3, 3> = matrix![
        1.0, poisson_ratio, 0.0;
        poisson_ratio, 1.0, 0.0;
        0.0, 0.0, (1.0 - poisson_ratio)/2.0;
    ];

    stress_strain_mat *= material.youngs_modulus / (1.0 - f64::powi(poisson_ratio, 2));

    stress_strain_mat
}

/// Computes the stiffness matrix for a given element
///
/// # Arguments
/// * `element` - The element to target
/// * `nodes` - The mesh nodes
/// * `stress_strain_mat` - Elasticity matrix of the material
/// * `part_thickness` - The thickness of the part
///
/// # Returns
/// A 6x6 stiffness matrix for the element
pub fn compute_element_stiffness_matrix(
    element: &Element,
    nodes: &[Vertex],
    stress_strain_mat: &SMatrix<f64, 3, 3>,
    part_thickness: f64,
) -> Result<SMatrix<f64, 6, 6>, FemError> {
    let element_area = checked_element_area(element, nodes)?;
    let strain_displacement_mat = compute_strain_displacement_matrix(element, nodes, element_area);

    Ok((strain_displacement_mat.transpose() * stress_strain_mat)
        * strain_displacement_mat
        * element_area.abs()
        * part_thickness)
}

/// Adds one element stiffness matrix into the total stiffness matrix
pub fn scatter_element_matrix(
    total_stiffness_matrix: &mut DMatrix<f64>,
    element: &Element,
    stiffness_mat: &SMatrix<f64, 6, 6>,
) {
    for (local_row, node_row) in element.nodes.iter().enumerate() {
        for (local_col, node_col) in element.nodes.iter().enumerate() {
            for i in 0..DOF {
                for j in 0..DOF {
                    total_stiffness_matrix[(DOF * node_row + i, DOF * node_col + j)] +=
                        stiffness_mat[(DOF * local_row + i, DOF * local_col + j)];
                }
            }
        }
    }
}

/// Builds the total stiffness matrix of a mesh
///
/// # Arguments
/// * `mesh` - Nodes and elements
/// * `material` - Material of the whole part
/// * `part_thickness` - The thickness of the part
/// * `settings` - Controls progress display
///
/// # Returns
/// A dense `2N x 2N` matrix
pub fn build_total_stiffness_matrix(
    mesh: &Mesh,
    material: &Material,
    part_thickness: f64,
    settings: &SolverSettings,
) -> Result<DMatrix<f64>, FemError> {
    let stress_strain_mat = compute_stress_strain_matrix(material);
    let mut total_stiffness_matrix: DMatrix<f64> =
        DMatrix::zeros(DOF * mesh.nodes.len(), DOF * mesh.nodes.len());

    let bar = settings.progress_bar(mesh.elements.len() as u64);
    for element in &mesh.elements {
        let stiffness_mat = compute_element_stiffness_matrix(
            element,
            &mesh.nodes,
            &stress_strain_mat,
            part_thickness,
        )?;
        scatter_element_matrix(&mut total_stiffness_matrix, element, &stiffness_mat);
        bar.inc(1);
    }
    bar.finish();

    Ok(total_stiffness_matrix)
}

/// Pins nodes in place
///
/// Rows and columns of every pinned DOF are zeroed with a unit diagonal and
/// the matching force entries are cleared, so the matrix keeps its size and
/// the pinned displacements solve to zero.
pub fn add_supports(
    total_stiffness_matrix: &mut DMatrix<f64>,
    forces: &mut DVector<f64>,
    pinned_nodes: &[usize],
) {
    for node in pinned_nodes {
        for axis in 0..DOF {
            let dof = DOF * node + axis;
            total_stiffness_matrix.row_mut(dof).fill(0.0);
            total_stiffness_matrix.column_mut(dof).fill(0.0);
            total_stiffness_matrix[(dof, dof)] = 1.0;
            forces[dof] = 0.0;
        }
    }
}

/// Solves `K u = F` for the nodal displacements
///
/// A zero force vector returns the exact zero solution.
pub fn solve(
    total_stiffness_matrix: &DMatrix<f64>,
    forces: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<DVector<f64>, FemError> {
    if total_stiffness_matrix.nrows() != forces.len()
        || total_stiffness_matrix.ncols() != forces.len()
    {
        return Err(FemError::Validation(format!(
            "Stiffness matrix is {}x{} but force vector has {} entries",
            total_stiffness_matrix.nrows(),
            total_stiffness_matrix.ncols(),
            forces.len()
        )));
    }

    if forces.iter().all(|f| *f == 0.0) {
        return Ok(DVector::zeros(forces.len()));
    }

    let sparse = CsrMatrix::from(total_stiffness_matrix);
    run_conjugate_gradient(&sparse, forces, settings)
}

/// Splits the flat solution into per-node displacements and moved nodes
pub fn displace_nodes(nodes: &[Vertex], displacements: &DVector<f64>) -> (Vec<Vertex>, Vec<[f64; 2]>) {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let (ux, uy) = (displacements[DOF * i], displacements[DOF * i + 1]);
            (Vertex::new(node.x + ux, node.y + uy), [ux, uy])
        })
        .unzip()
}

/// Runs the whole analysis for a study
///
/// # Arguments
/// * `study` - Geometry, material, load and mesh source
/// * `settings` - Conjugate gradient settings
/// * `log` - Logger for progress messages
pub fn run(study: &Study, settings: &SolverSettings, log: &Logger) -> Result<Solution, FemError> {
    study.validate()?;

    let circles = study.geometry.circles();

    let mesh = match &study.mesh_source {
        MeshSource::Generated => {
            info!(log, "generating mesh"; "step" => study.mesh_step);
            mesher::run(&study.geometry, study.mesh_step)?
        }
        MeshSource::External(mesh) => {
            mesher::validate_mesh(mesh)?;
            mesh.clone()
        }
    };
    info!(log, "loaded mesh"; "nodes" => mesh.nodes.len(), "elements" => mesh.elements.len());

    let rivet_nodes = regions::rivet_nodes(&circles, &mesh.nodes, RIVET_EPSILON);
    let force_nodes = regions::force_nodes(
        &study.geometry.force_point,
        &mesh.nodes,
        study.mesh_step / 2.0,
    );
    if rivet_nodes.is_empty() {
        warn!(log, "no rivet nodes found; the part is unsupported");
    }
    if force_nodes.is_empty() {
        warn!(log, "no nodes inside the force region"; "x" => study.geometry.force_point.x, "y" => study.geometry.force_point.y);
    }
    info!(log, "classified nodes"; "rivet" => rivet_nodes.len(), "force" => force_nodes.len());

    let polar_forces = regions::force_vector(mesh.nodes.len(), &force_nodes, &study.force);
    let mut forces = regions::cartesian_forces(&polar_forces);

    info!(log, "building total stiffness matrix...");
    let mut total_stiffness_matrix =
        build_total_stiffness_matrix(&mesh, &study.material, study.part_thickness, settings)?;
    add_supports(&mut total_stiffness_matrix, &mut forces, &rivet_nodes);

    let start = std::time::Instant::now();
    info!(log, "solving..."; "dofs" => forces.len());
    let displacements = solve(&total_stiffness_matrix, &forces, settings)?;
    info!(log, "solved system"; "seconds" => format!("{:.3}", start.elapsed().as_secs_f32()));

    let results = post_processor::compute_stresses_and_strains(
        &mesh.elements,
        &mesh.nodes,
        &study.material,
        &displacements,
    )?;
    let (displaced_nodes, displacements) = displace_nodes(&mesh.nodes, &displacements);

    Ok(Solution {
        nodes: mesh.nodes,
        displaced_nodes,
        displacements,
        elements: mesh.elements,
        rivet_nodes,
        force_nodes,
        forces,
        stresses: results.stresses,
        strains: results.strains,
        equivalent_stresses: results.equivalent_stresses,
        equivalent_strains: results.equivalent_strains,
    })
}
