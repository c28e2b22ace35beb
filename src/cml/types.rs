use serde::{Deserialize, Serialize};

// --- CML API types ---

#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmlLab {
    pub id: String,
    #[serde(default)]
    pub lab_title: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// The bits of a lab the retriever needs
#[derive(Debug, Clone, PartialEq)]
pub struct LabSummary {
    pub id: String,
    pub title: String,
    pub state: Option<String>,
}

impl From<CmlLab> for LabSummary {
    fn from(lab: CmlLab) -> Self {
        Self {
            id: lab.id,
            title: lab.lab_title,
            state: lab.state,
        }
    }
}
