use crate::protection::OverrideTable;
use crate::robot::RobotDefinition;
use crate::types::ModelInfo;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Robot definitions keyed by id.
#[derive(Debug, Default, Clone)]
pub struct RobotCatalog {
    pub robots: BTreeMap<String, RobotDefinition>,
}

impl RobotCatalog {
    pub fn insert(&mut self, def: RobotDefinition) {
        self.robots.insert(def.id.clone(), def);
    }

    pub fn get(&self, id: &str) -> Option<&RobotDefinition> {
        self.robots.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RobotDefinition> {
        self.robots.values()
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading {what}: {}", path.display()))?;
    let val: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    serde_yaml::from_value(val).with_context(|| format!("decoding {what}: {}", path.display()))
}

pub fn load_robot_file(path: impl AsRef<Path>) -> anyhow::Result<RobotDefinition> {
    load_yaml(path.as_ref(), "robot definition")
}

pub fn load_robots_dir(dir: impl AsRef<Path>) -> anyhow::Result<RobotCatalog> {
    let mut catalog = RobotCatalog::default();
    for p in yaml_files(dir.as_ref())? {
        let def = load_robot_file(&p)?;
        tracing::debug!(robot = %def.id, path = %p.display(), "robot definition loaded");
        catalog.insert(def);
    }
    Ok(catalog)
}

/// A YAML list of extra [`ModelInfo`] entries.
pub fn load_models_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<ModelInfo>> {
    load_yaml(path.as_ref(), "model table")
}

/// A YAML map of `brand/model[/variant]` → partial thresholds.
pub fn load_overrides_file(path: impl AsRef<Path>) -> anyhow::Result<OverrideTable> {
    let raw: OverrideTable = load_yaml(path.as_ref(), "protection overrides")?;
    let mut table = OverrideTable::default();
    for (k, v) in raw.entries {
        table.insert(k, v);
    }
    Ok(table)
}

fn yaml_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("listing directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Brand, OverrideProvider, ModelRegistry};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "motor-registry-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_robots_dir_sorted_and_filtered() {
        let dir = scratch_dir("robots");
        fs::write(dir.join("b.yaml"), "id: beta\n").unwrap();
        fs::write(dir.join("a.yml"), "id: alpha\nname: Alpha\n").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let catalog = load_robots_dir(&dir).unwrap();
        let ids: Vec<_> = catalog.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        assert_eq!(catalog.get("alpha").unwrap().display_name(), "Alpha");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bad_yaml_has_path_context() {
        let dir = scratch_dir("bad");
        let p = dir.join("broken.yaml");
        fs::write(&p, "id: [unterminated").unwrap();
        let err = load_robot_file(&p).unwrap_err();
        assert!(format!("{err:#}").contains("broken.yaml"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_overrides_and_models_files() {
        let dir = scratch_dir("tables");
        let ov = dir.join("overrides.yaml");
        fs::write(&ov, "Feetech/STS3215:\n  temp_critical: 62\n").unwrap();
        let table = load_overrides_file(&ov).unwrap();
        let reg = ModelRegistry::builtin();
        let sts = reg.lookup(Brand::Feetech, "sts3215", None).unwrap();
        assert_eq!(table.overrides_for(sts).unwrap().temp_critical, Some(62.0));

        let models = dir.join("models.yaml");
        fs::write(
            &models,
            "- brand: feetech\n  model: sts3095\n  model_numbers: [3095]\n  resolution: 4096\n",
        )
        .unwrap();
        let extra = load_models_file(&models).unwrap();
        let mut reg = reg;
        reg.extend(extra).unwrap();
        let m = reg.by_model_number(Brand::Feetech, 3095, None).unwrap();
        assert_eq!(m.model, "sts3095");
        assert!(m.is_base());
        let _ = fs::remove_dir_all(&dir);
    }
}
