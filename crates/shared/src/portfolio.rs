use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub about: About,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub skills: Skills,
    #[serde(default)]
    pub social: Vec<SocialLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct About {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skills {
    #[serde(default)]
    pub backend: Vec<String>,
    #[serde(default)]
    pub frontend: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocialLink {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub link: String,
}

/// Public owner card served by `GET /api/owner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub name: String,
    pub tagline: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub social: Vec<OwnerSocialLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerSocialLink {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("failed to read portfolio file {path}: {message}")]
    Read { path: String, message: String },
    #[error("portfolio file {path} is not valid json: {message}")]
    Parse { path: String, message: String },
}

impl Portfolio {
    pub fn load(path: &Path) -> Result<Self, PortfolioError> {
        let raw = std::fs::read_to_string(path).map_err(|err| PortfolioError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|err| PortfolioError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    pub fn owner_info(&self) -> OwnerInfo {
        OwnerInfo {
            name: self.about.name.clone(),
            tagline: self.about.tagline.clone(),
            social: self
                .social
                .iter()
                .map(|link| OwnerSocialLink {
                    name: link.name.clone(),
                    url: link.url.clone(),
                })
                .collect(),
        }
    }
}
