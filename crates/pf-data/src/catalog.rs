use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pf_types::{Result, StoreError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A named portfolio persisted as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub initial_capital: f64,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub modified_date: String,
}

impl PortfolioDefinition {
    pub fn new(name: &str, initial_capital: f64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            initial_capital,
            instruments: Vec::new(),
            weights: BTreeMap::new(),
            parameters: BTreeMap::new(),
            created_date: String::new(),
            modified_date: String::new(),
        }
    }
}

/// Catalog of portfolio documents, one file per portfolio.
///
/// Defaults to `$HOME/.portfolio/portfolios`; the directory is injectable
/// for tests and alternate layouts.
pub struct PortfolioCatalog {
    dir: PathBuf,
}

fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl PortfolioCatalog {
    pub fn open_default() -> Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::open(home.join(".portfolio").join("portfolios"))
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn write(&self, definition: &PortfolioDefinition) -> Result<()> {
        let json = serde_json::to_string_pretty(definition)?;
        fs::write(self.file_path(&definition.name), json)?;
        Ok(())
    }

    pub fn create(&self, definition: &PortfolioDefinition) -> Result<()> {
        if definition.name.is_empty() {
            return Err(StoreError::InvalidPortfolio("name cannot be empty".into()).into());
        }
        if definition.initial_capital <= 0.0 {
            return Err(
                StoreError::InvalidPortfolio("initial capital must be positive".into()).into(),
            );
        }
        if self.file_path(&definition.name).exists() {
            return Err(StoreError::PortfolioExists {
                name: definition.name.clone(),
            }
            .into());
        }

        let mut definition = definition.clone();
        definition.created_date = now_stamp();
        definition.modified_date = definition.created_date.clone();
        self.write(&definition)?;
        info!(name = %definition.name, "portfolio created");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<PortfolioDefinition> {
        let path = self.file_path(name);
        if !path.exists() {
            return Err(StoreError::PortfolioNotFound {
                name: name.to_string(),
            }
            .into());
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn update(&self, definition: &PortfolioDefinition) -> Result<()> {
        if !self.file_path(&definition.name).exists() {
            return Err(StoreError::PortfolioNotFound {
                name: definition.name.clone(),
            }
            .into());
        }
        let mut definition = definition.clone();
        definition.modified_date = now_stamp();
        self.write(&definition)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);
        if !path.exists() {
            return Err(StoreError::PortfolioNotFound {
                name: name.to_string(),
            }
            .into());
        }
        fs::remove_file(path)?;
        info!(name, "portfolio deleted");
        Ok(())
    }

    /// Add an instrument with an explicit weight. When the weight sum grows
    /// past 1, every weight is rescaled by the sum so the map stays
    /// normalized.
    pub fn add_instrument(&self, portfolio: &str, instrument_id: &str, weight: f64) -> Result<()> {
        if weight <= 0.0 || weight > 1.0 {
            return Err(
                StoreError::InvalidPortfolio("weight must be between 0 and 1".into()).into(),
            );
        }

        let mut definition = self.get(portfolio)?;
        if definition.instruments.iter().any(|id| id == instrument_id) {
            return Err(StoreError::InvalidPortfolio(format!(
                "instrument '{instrument_id}' already in portfolio"
            ))
            .into());
        }

        definition.instruments.push(instrument_id.to_string());
        definition
            .weights
            .insert(instrument_id.to_string(), weight);

        let total: f64 = definition.weights.values().sum();
        if total > 1.0 {
            for w in definition.weights.values_mut() {
                *w /= total;
            }
        }

        self.update(&definition)
    }

    pub fn remove_instrument(&self, portfolio: &str, instrument_id: &str) -> Result<()> {
        let mut definition = self.get(portfolio)?;
        let before = definition.instruments.len();
        definition.instruments.retain(|id| id != instrument_id);
        if definition.instruments.len() == before {
            return Err(StoreError::InvalidPortfolio(format!(
                "instrument '{instrument_id}' not in portfolio"
            ))
            .into());
        }
        definition.weights.remove(instrument_id);
        self.update(&definition)
    }
}
