//! Reconstruction scenarios for the synthetic telescope.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// RECO-001: GX2F fit of tracks from one vertex
    TelescopeFit,

    /// RECO-002: fit, then find the vertex z on the density grid
    SingleVertex,

    /// RECO-003: two vertices, found one after the other by removing tracks
    TwoVertices,

    /// RECO-004: fit, seed, then linearize every track at the seed
    Linearize,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::TelescopeFit,
            ScenarioId::SingleVertex,
            ScenarioId::TwoVertices,
            ScenarioId::Linearize,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::TelescopeFit => "telescope_fit",
            ScenarioId::SingleVertex => "single_vertex",
            ScenarioId::TwoVertices => "two_vertices",
            ScenarioId::Linearize => "linearize",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::TelescopeFit => "Fit straight tracks through 10 planes, check chi2/ndf and angles",
            ScenarioId::SingleVertex => "Fit tracks from one vertex, find z and width on the density grid",
            ScenarioId::TwoVertices => "Two vertices 20mm apart, find both by removing the first one's tracks",
            ScenarioId::Linearize => "Linearize fitted tracks at the seeded vertex, check impact pulls",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "telescope_fit" | "telescopefit" | "fit" | "reco-001" => Ok(ScenarioId::TelescopeFit),
            "single_vertex" | "singlevertex" | "reco-002" => Ok(ScenarioId::SingleVertex),
            "two_vertices" | "twovertices" | "reco-003" => Ok(ScenarioId::TwoVertices),
            "linearize" | "reco-004" => Ok(ScenarioId::Linearize),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// Event composition and pass criteria shared by all scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Tracks generated per vertex (default: 20)
    pub tracks_per_vertex: usize,

    /// Vertex z is drawn uniformly in ±this range in mm (default: 10)
    pub vertex_z_range: f64,

    /// z distance between the two vertices of `two_vertices` in mm (default: 20)
    pub vertex_separation: f64,

    /// Gauss-Newton iterations per fit (default: 5)
    pub n_iterations: usize,

    /// Largest accepted mean chi2/ndf (default: 3.0)
    pub max_chi2_per_ndf: f64,

    /// Largest accepted |z_found - z_true| in mm (default: 0.5)
    pub z_tolerance: f64,

    /// Largest accepted |d0| / sigma(d0) after linearization (default: 6.0)
    pub max_impact_pull: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            tracks_per_vertex: 20,
            vertex_z_range: 10.0,
            vertex_separation: 20.0,
            n_iterations: 5,
            max_chi2_per_ndf: 3.0,
            z_tolerance: 0.5,
            max_impact_pull: 6.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            let parsed: ScenarioId = scenario.name().parse().unwrap();
            assert_eq!(parsed, scenario);
            assert_eq!(scenario.to_string(), scenario.name());
            assert!(!scenario.description().is_empty());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("RECO-003".parse::<ScenarioId>(), Ok(ScenarioId::TwoVertices));
        assert_eq!("fit".parse::<ScenarioId>(), Ok(ScenarioId::TelescopeFit));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
