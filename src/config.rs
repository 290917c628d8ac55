use json::JsonValue;

use crate::{
    datatypes::{AppliedForce, Geometry, Material, MeshSource, Study, MESH_STEPS},
    error::FemError,
    mesher,
    solver::SolverSettings,
};

/// A parsed study file
#[derive(Debug, Clone, PartialEq)]
pub struct StudyConfig {
    pub material_name: String,
    pub study: Study,
    pub settings: SolverSettings,
}

fn required_f64(json: &JsonValue, section: &str, field: &str) -> Result<f64, FemError> {
    json[section][field].as_f64().ok_or_else(|| {
        FemError::Input(format!(
            "Study file missing numeric field {section}.{field}"
        ))
    })
}

/// Parses study parameters from the study json
///
/// # Arguments
/// * `contents` - The study file contents
///
/// # Returns
/// The study on the bracket geometry, with any external mesh loaded
pub fn parse_study(contents: &str) -> Result<StudyConfig, FemError> {
    let study_json = match json::parse(contents) {
        Ok(j) => j,
        Err(err) => {
            return Err(FemError::Input(format!(
                "Error in study file json: {err}"
            )))
        }
    };

    for section in ["material", "force", "mesh"] {
        if !study_json.has_key(section) {
            return Err(FemError::Input(format!(
                "Study file missing {section} section"
            )));
        }
    }

    let material_name = study_json["material"]["name"]
        .as_str()
        .unwrap_or("unnamed")
        .to_owned();
    let material = Material::new(
        required_f64(&study_json, "material", "young")?,
        required_f64(&study_json, "material", "poisson")?,
    )?;

    let part_thickness = study_json["thickness"]
        .as_f64()
        .ok_or_else(|| FemError::Input("Study file missing numeric field thickness".to_owned()))?;

    let force = AppliedForce::new(
        required_f64(&study_json, "force", "magnitude")?,
        required_f64(&study_json, "force", "angle")?,
    )?;

    let requested_step = required_f64(&study_json, "mesh", "step")?;
    let mesh_step = match MESH_STEPS
        .iter()
        .find(|s| (*s - requested_step).abs() < 1e-12)
    {
        Some(s) => *s,
        None => {
            return Err(FemError::Validation(format!(
                "Mesh step {requested_step} is not one of {MESH_STEPS:?}"
            )))
        }
    };

    let mesh_source = match (
        study_json["mesh"]["nodes"].as_str(),
        study_json["mesh"]["elements"].as_str(),
    ) {
        (Some(nodes), Some(elements)) => {
            MeshSource::External(mesher::load_external_mesh(nodes, elements)?)
        }
        (None, None) => MeshSource::Generated,
        _ => {
            return Err(FemError::Input(
                "Study file must give both mesh.nodes and mesh.elements, or neither".to_owned(),
            ))
        }
    };

    let mut settings = SolverSettings::default();
    if study_json.has_key("solver") {
        if let Some(tolerance) = study_json["solver"]["tolerance"].as_f64() {
            if !(tolerance > 0.0) {
                return Err(FemError::Validation(format!(
                    "Solver tolerance must be positive, got {tolerance}"
                )));
            }
            settings.tolerance = tolerance;
        }
        let max_iterations = &study_json["solver"]["max_iterations"];
        if !max_iterations.is_null() {
            match max_iterations.as_f64() {
                Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => {
                    settings.max_iterations = Some(n as u64)
                }
                _ => {
                    return Err(FemError::Input(format!(
                        "Study field solver.max_iterations must be a non-negative integer, got {max_iterations}"
                    )))
                }
            }
        }
    }

    let study = Study {
        geometry: Geometry::bracket(),
        material,
        part_thickness,
        force,
        mesh_step,
        mesh_source,
    };
    study.validate()?;

    Ok(StudyConfig {
        material_name,
        study,
        settings,
    })
}

/// Reads and parses a study file
pub fn load_study_file(study_file: &str) -> Result<StudyConfig, FemError> {
    let contents = match std::fs::read_to_string(study_file) {
        Ok(f) => f,
        Err(err) => {
            return Err(FemError::Input(format!(
                "Unable to open study file {study_file}: {err}"
            )))
        }
    };

    parse_study(&contents)
}
