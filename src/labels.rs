use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterLabel {
    pub name: &'static str,
    pub description: &'static str,
}

/// Number of clusters the label table covers; the loaded model must match.
pub const N_CLUSTERS: usize = 4;

static LABELS: [ClusterLabel; N_CLUSTERS] = [
    ClusterLabel {
        name: "Desarrollo Alto 🟢",
        description: "Departamento con indicadores socioeconómicos altos",
    },
    ClusterLabel {
        name: "Desarrollo Medio-Alto 🔵",
        description: "Departamento con indicadores socioeconómicos medio-altos",
    },
    ClusterLabel {
        name: "Desarrollo Medio-Bajo 🟠",
        description: "Departamento con indicadores socioeconómicos medio-bajos",
    },
    ClusterLabel {
        name: "Desarrollo Bajo 🔴",
        description: "Departamento con indicadores socioeconómicos bajos",
    },
];

pub fn describe(cluster_id: usize) -> Option<&'static ClusterLabel> {
    LABELS.get(cluster_id)
}
