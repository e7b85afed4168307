//! Scenario file discovery and parsing.

use crate::model::Scenario;
use crate::validator::validate_scenario;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A parsed, validated scenario and the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedScenario {
    pub path: PathBuf,
    pub scenario: Scenario,
}

impl LoadedScenario {
    /// Directory relative data paths resolve against.
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Loads scenarios from `.yaml`, `.yml` and `.json` files.
#[derive(Debug, Default)]
pub struct ScenarioLoader {
    pub paths: Vec<PathBuf>,
}

impl ScenarioLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Load and validate a single scenario file.
    pub fn load_scenario<P: AsRef<Path>>(&self, path: P) -> Result<LoadedScenario> {
        let path = path.as_ref();
        info!("Loading test scenario from {}", path.display());

        let content = fs::read_to_string(path)
            .context(format!("Failed to read test file: {}", path.display()))?;

        let mut scenario = if is_json(path) {
            Scenario::from_json(&content)
                .context(format!("Failed to parse JSON from {}", path.display()))?
        } else {
            Scenario::from_yaml(&content)
                .context(format!("Failed to parse YAML from {}", path.display()))?
        };

        validate_scenario(&mut scenario)
            .context(format!("Invalid scenario in {}", path.display()))?;

        debug!("Successfully loaded test scenario: {}", scenario.name);
        Ok(LoadedScenario {
            path: path.to_path_buf(),
            scenario,
        })
    }

    /// Load every scenario file directly inside `dir`, in file name order.
    /// Files that fail to load are skipped with a warning.
    pub fn load_scenarios_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<LoadedScenario>> {
        let dir = dir.as_ref();
        info!("Loading test scenarios from directory: {}", dir.display());

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).context(format!("Failed to read directory: {}", dir.display()))? {
            let path = entry?.path();
            if path.is_file() && is_scenario_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut scenarios = Vec::new();
        for path in files {
            match self.load_scenario(&path) {
                Ok(scenario) => scenarios.push(scenario),
                Err(err) => warn!("Failed to load scenario from {}: {:#}", path.display(), err),
            }
        }

        info!("Loaded {} test scenarios from {}", scenarios.len(), dir.display());
        Ok(scenarios)
    }

    /// Load every configured path. Files must load; directories are
    /// scanned leniently.
    pub fn load_all(&self) -> Result<Vec<LoadedScenario>> {
        let mut all = Vec::new();
        for path in &self.paths {
            if path.is_dir() {
                all.extend(self.load_scenarios_from_dir(path)?);
            } else {
                all.push(self.load_scenario(path)?);
            }
        }
        info!("Loaded {} test scenarios in total", all.len());
        Ok(all)
    }
}

/// Return `true` for `.yaml`, `.yml` and `.json` files.
fn is_scenario_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = "name: yaml-test\nsteps:\n  - name: s\n    request:\n      url: /t\n";
    const JSON: &str = r#"{"name": "json-test", "tests": {"g": {"steps": [{"name": "s", "http": {"url": "/t"}}]}}}"#;

    #[test]
    fn test_scenario_file_detection() {
        assert!(is_scenario_file(Path::new("test.yaml")));
        assert!(is_scenario_file(Path::new("dir/nested/foo.yml")));
        assert!(is_scenario_file(Path::new("test.json")));
        assert!(!is_scenario_file(Path::new("readme.md")));
        assert!(!is_scenario_file(Path::new("data.csv")));
        assert!(!is_scenario_file(Path::new("no_ext")));
    }

    #[test]
    fn test_load_from_dir_with_mixed_formats() {
        let dir = tempdir_with_files(&[
            ("a.yaml", YAML),
            ("b.json", JSON),
            ("c.yaml", "name: broken\n"),
            ("d.md", "# Not a scenario\n"),
        ]);

        let loader = ScenarioLoader::new();
        let scenarios = loader.load_scenarios_from_dir(dir.path()).unwrap();

        let names: Vec<&str> = scenarios.iter().map(|s| s.scenario.name.as_str()).collect();
        assert_eq!(names, vec!["yaml-test", "json-test"]);
        assert_eq!(
            scenarios[1].scenario.tests["g"].steps[0]
                .http
                .as_ref()
                .unwrap()
                .method
                .as_deref(),
            Some("GET")
        );
        assert_eq!(scenarios[0].base_dir(), dir.path());
    }

    #[test]
    fn test_load_invalid_file_reports_path() {
        let dir = tempdir_with_files(&[("bad.yaml", "name: broken\n")]);
        let err = ScenarioLoader::new()
            .load_scenario(dir.path().join("bad.yaml"))
            .unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("Invalid scenario"));
        assert!(text.contains("either steps or tests"));
    }

    #[test]
    fn test_load_all_mixes_files_and_dirs() {
        let dir = tempdir_with_files(&[("a.yaml", YAML), ("b.json", JSON)]);
        let mut loader = ScenarioLoader::new();
        loader.add_path(dir.path()).add_path(dir.path().join("a.yaml"));
        assert_eq!(loader.load_all().unwrap().len(), 3);
    }

    fn tempdir_with_files(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }
}
