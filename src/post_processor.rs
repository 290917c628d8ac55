use std::{io::Write, path::Path};

use nalgebra::{DVector, SMatrix, Vector3};

use crate::{
    datatypes::{Element, Material, Solution, Vertex},
    error::FemError,
    solver::{
        checked_element_area, compute_strain_displacement_matrix, compute_stress_strain_matrix,
        DOF,
    },
};

/// Per-element results, aligned with the element list
#[derive(Debug, Clone, Default)]
pub struct ElementResults {
    pub stresses: Vec<Vector3<f64>>,
    pub strains: Vec<Vector3<f64>>,
    pub equivalent_stresses: Vec<f64>,
    pub equivalent_strains: Vec<f64>,
}

pub fn equivalent_strain(strain: &Vector3<f64>) -> f64 {
    (f64::sqrt(2.0) / 3.0)
        * f64::sqrt(strain[0].powi(2) + strain[1].powi(2) + 1.5 * strain[2].powi(2))
}

pub fn equivalent_stress(stress: &Vector3<f64>) -> f64 {
    (1.0 / f64::sqrt(2.0))
        * f64::sqrt(stress[0].powi(2) + stress[1].powi(2) + 6.0 * stress[2].powi(2))
}

/// Recovers strain and stress in every element
///
/// # Arguments
/// * `elements` - The mesh elements
/// * `nodes` - The undeformed nodes
/// * `material` - Material of the part
/// * `displacements` - Flat solver output, two entries per node
pub fn compute_stresses_and_strains(
    elements: &[Element],
    nodes: &[Vertex],
    material: &Material,
    displacements: &DVector<f64>,
) -> Result<ElementResults, FemError> {
    if displacements.len() != DOF * nodes.len() {
        return Err(FemError::Validation(format!(
            "Expected {} displacement values, got {}",
            DOF * nodes.len(),
            displacements.len()
        )));
    }

    let stress_strain_mat = compute_stress_strain_matrix(material);
    let mut results = ElementResults::default();

    for element in elements {
        let area = checked_element_area(element, nodes)?;
        let strain_displacement_mat = compute_strain_displacement_matrix(element, nodes, area);

        let nodal_displacements: SMatrix<f64, { DOF * 3 }, 1> =
            SMatrix::from_fn(|i, _| displacements[DOF * element.nodes[i / DOF] + i % DOF]);

        let strain: Vector3<f64> = strain_displacement_mat * nodal_displacements;
        let stress: Vector3<f64> = stress_strain_mat * strain;

        results.equivalent_strains.push(equivalent_strain(&strain));
        results.equivalent_stresses.push(equivalent_stress(&stress));
        results.strains.push(strain);
        results.stresses.push(stress);
    }

    Ok(results)
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `solution` - A finished run
/// * `nodes_output` - Path of the output nodes csv
/// * `elements_output` - Path of the output elements csv
pub fn csv_output(
    solution: &Solution,
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<(), FemError> {
    let create = |path: &Path| {
        std::fs::File::create(path)
            .map(std::io::BufWriter::new)
            .map_err(|err| {
                FemError::Output(format!("Failed to create {}: {err}", path.display()))
            })
    };
    let write_err = |err: std::io::Error| FemError::Output(format!("Failed to write results: {err}"));

    let mut nodes_file = create(nodes_output)?;
    let mut elements_file = create(elements_output)?;

    // Write nodes
    writeln!(
        nodes_file,
        "x,y,ux,uy,x_displaced,y_displaced,fx,fy,rivet,force"
    )
    .map_err(write_err)?;
    for (i, node) in solution.nodes.iter().enumerate() {
        writeln!(
            nodes_file,
            "{x},{y},{ux},{uy},{xd},{yd},{fx},{fy},{rivet},{force}",
            x = node.x,
            y = node.y,
            ux = solution.displacements[i][0],
            uy = solution.displacements[i][1],
            xd = solution.displaced_nodes[i].x,
            yd = solution.displaced_nodes[i].y,
            fx = solution.forces[DOF * i],
            fy = solution.forces[DOF * i + 1],
            rivet = solution.rivet_nodes.binary_search(&i).is_ok() as u8,
            force = solution.force_nodes.contains(&i) as u8,
        )
        .map_err(write_err)?;
    }

    // Write elements
    writeln!(
        elements_file,
        "n0,n1,n2,stress_x,stress_y,stress_xy,strain_x,strain_y,strain_xy,stress_eq,strain_eq"
    )
    .map_err(write_err)?;
    for (i, element) in solution.elements.iter().enumerate() {
        let stress = &solution.stresses[i];
        let strain = &solution.strains[i];
        writeln!(
            elements_file,
            "{},{},{},{},{},{},{},{},{},{},{}",
            element.nodes[0],
            element.nodes[1],
            element.nodes[2],
            stress[0],
            stress[1],
            stress[2],
            strain[0],
            strain[1],
            strain[2],
            solution.equivalent_stresses[i],
            solution.equivalent_strains[i],
        )
        .map_err(write_err)?;
    }

    nodes_file.flush().map_err(write_err)?;
    elements_file.flush().map_err(write_err)?;

    Ok(())
}
