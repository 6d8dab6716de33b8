//! Run environment for calibration runs.
//!
//! A run is described by a JSON (or TOML) document with an `input` table holding the
//! engine settings and an `output` table telling where results go. `seed` and `replicate`
//! are lifted out of `input` before the rest is deserialised into the caller's settings
//! type. Any other top-level table is ignored.

mod error;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub use error::EnvError;

#[derive(Debug, Default, Deserialize)]
struct RunDescription {
    #[serde(default)]
    input: Map<String, Value>,
    #[serde(default)]
    output: Option<OutputTable>,
}

/// Either a flat `{spec, dir}` target or a set of named profiles.
#[derive(Debug, Default, Deserialize)]
struct OutputTable {
    spec: Option<String>,
    dir: Option<PathBuf>,
    #[serde(default)]
    profile: BTreeMap<String, OutputTable>,
}

impl OutputTable {
    /// Directory of a `filesystem` target; the `default` profile wins, then the first by name.
    fn directory(&self) -> Option<PathBuf> {
        match self.spec.as_deref() {
            Some("filesystem") => self.dir.clone(),
            Some(_) => None,
            None => self
                .profile
                .get("default")
                .or_else(|| self.profile.values().next())
                .and_then(OutputTable::directory),
        }
    }
}

pub struct Environment<I = ()> {
    raw_input: Map<String, Value>,
    pub input: Option<I>,
    pub seed: u64,
    pub replicate: u64,
    output_dir: Option<PathBuf>,
}

impl Environment {
    pub fn from_value(data: Value) -> Result<Self, EnvError> {
        let RunDescription { mut input, output } = serde_json::from_value(data)?;
        let seed = take_count(&mut input, "seed")?;
        let replicate = take_count(&mut input, "replicate")?;
        Ok(Environment {
            raw_input: input,
            input: None,
            seed,
            replicate,
            output_dir: output.as_ref().and_then(OutputTable::directory),
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, EnvError> {
        Self::from_value(toml::from_str(raw)?)
    }

    pub fn from_stdin() -> Result<Self, EnvError> {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Err(EnvError::MissingInput);
        }
        Self::from_value(serde_json::from_str(&raw)?)
    }

    /// Reads a run description from disk; the extension picks the format.
    pub fn from_path(path: &Path) -> Result<Self, EnvError> {
        let raw = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_value(serde_json::from_str(&raw)?),
            Some("toml") => Self::from_toml_str(&raw),
            _ => Err(EnvError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn with_input_type<I: DeserializeOwned>(self) -> Result<Environment<I>, EnvError> {
        let input = I::deserialize(Value::Object(self.raw_input.clone()))?;
        Ok(Environment {
            raw_input: self.raw_input,
            input: Some(input),
            seed: self.seed,
            replicate: self.replicate,
            output_dir: self.output_dir,
        })
    }
}

impl<I: DeserializeOwned> Environment<I> {
    /// Loads from `path` when given, otherwise from stdin.
    pub fn load(path: Option<&Path>) -> Result<Self, EnvError> {
        let env = match path {
            Some(path) => Environment::from_path(path)?,
            None => Environment::from_stdin()?,
        };
        env.with_input_type::<I>()
    }
}

impl<I> Environment<I> {
    /// The `input` table without `seed` and `replicate`.
    pub fn raw_input(&self) -> &Map<String, Value> {
        &self.raw_input
    }

    /// Hex SHA-256 of the input table with `seed` and `replicate` folded back in.
    /// Keys are sorted, so equal inputs hash equally regardless of source order.
    pub fn input_digest(&self) -> String {
        let mut canonical = self.raw_input.clone();
        canonical.insert("seed".to_string(), Value::from(self.seed));
        canonical.insert("replicate".to_string(), Value::from(self.replicate));
        let bytes = Value::Object(canonical).to_string();
        hex::encode(Sha256::digest(bytes.as_bytes()))
    }

    /// `None` means results go to stdout.
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Writes `data` to `filename` in the output directory. On stdout the content is preceded
    /// by a `# <filename>` line and written under a single stdout lock, so concurrent writers
    /// never interleave.
    pub fn write(&self, filename: &str, data: &[u8]) -> Result<(), EnvError> {
        match self.output_dir() {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(filename);
                fs::write(&path, data)?;
                info!("wrote {} bytes to {}", data.len(), path.display());
            }
            None => {
                let mut out = io::stdout().lock();
                writeln!(out, "# {filename}")?;
                out.write_all(data)?;
                out.flush()?;
            }
        }
        Ok(())
    }

    pub fn write_csv(
        &self,
        filename: &str,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> Result<(), EnvError> {
        let table = render_csv(headers, rows)?;
        self.write(filename, &table)?;
        debug!("{filename}: {} csv records", rows.len());
        Ok(())
    }
}

/// Removes `key` from the input table; absent means 0.
fn take_count(input: &mut Map<String, Value>, key: &'static str) -> Result<u64, EnvError> {
    match input.remove(key) {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .ok_or(EnvError::InvalidCount { key, value }),
    }
}

fn render_csv(headers: &[&str], rows: &[Vec<String>]) -> Result<Vec<u8>, EnvError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.into_inner().map_err(|e| EnvError::Io(e.into_error()))
}

#[cfg(test)]
mod test {
    use std::thread;

    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(tag = "engine", rename_all = "snake_case")]
    enum Engine {
        QuarantineFraction { grid: Vec<f64>, trials: usize },
        FinalSize { grid: Vec<f64> },
    }

    fn calibration_run(output: Value) -> Value {
        json!({
            "input": {
                "seed": 2024,
                "replicate": 3,
                "engine": "quarantine_fraction",
                "grid": [0.5, 1.5],
                "trials": 40
            },
            "model": { "name": "outbreak" },
            "output": output
        })
    }

    #[test]
    fn test_seed_and_replicate_leave_engine_input() {
        let ctx = Environment::from_value(calibration_run(Value::Null)).unwrap();
        assert_eq!((ctx.seed, ctx.replicate), (2024, 3));
        let mut keys: Vec<&str> = ctx.raw_input().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["engine", "grid", "trials"]);

        let typed = ctx.with_input_type::<Engine>().unwrap();
        assert_eq!(
            typed.input,
            Some(Engine::QuarantineFraction {
                grid: vec![0.5, 1.5],
                trials: 40
            })
        );
        assert_eq!(typed.seed, 2024);
    }

    #[test]
    fn test_unknown_engine_fails_typed_load() {
        let data = json!({ "input": { "engine": "mcmc", "grid": [1.0] } });
        let result = Environment::from_value(data).unwrap().with_input_type::<Engine>();
        assert!(matches!(result, Err(EnvError::Json(_))));
    }

    #[test]
    fn test_seed_must_be_a_count() {
        let data = json!({ "input": { "seed": -4, "engine": "final_size", "grid": [0.2] } });
        assert!(matches!(
            Environment::from_value(data),
            Err(EnvError::InvalidCount { key: "seed", .. })
        ));
    }

    #[test]
    fn test_missing_tables_default_to_stdout_and_zero_seed() {
        let ctx = Environment::from_value(json!({})).unwrap();
        assert_eq!((ctx.seed, ctx.replicate), (0, 0));
        assert!(ctx.raw_input().is_empty());
        assert_eq!(ctx.output_dir(), None);

        let stdout = calibration_run(json!({ "spec": "stdout", "dir": "/ignored" }));
        assert_eq!(Environment::from_value(stdout).unwrap().output_dir(), None);
    }

    #[test]
    fn test_profiled_output_prefers_default() {
        let profiles = calibration_run(json!({
            "profile": {
                "archive": { "spec": "filesystem", "dir": "/data/archive" },
                "default": { "spec": "filesystem", "dir": "/data/calibration" }
            }
        }));
        let ctx = Environment::from_value(profiles).unwrap();
        assert_eq!(ctx.output_dir(), Some(Path::new("/data/calibration")));

        let single = calibration_run(json!({
            "profile": { "sweep": { "spec": "filesystem", "dir": "/data/sweep" } }
        }));
        let ctx = Environment::from_value(single).unwrap();
        assert_eq!(ctx.output_dir(), Some(Path::new("/data/sweep")));
    }

    #[test]
    fn test_from_toml() {
        let raw = r#"
            [input]
            seed = 7
            engine = "final_size"
            grid = [0.1, 0.3]

            [output]
            spec = "filesystem"
            dir = "/tmp/final-sizes"
        "#;
        let ctx = Environment::from_toml_str(raw)
            .unwrap()
            .with_input_type::<Engine>()
            .unwrap();
        assert_eq!(ctx.seed, 7);
        assert_eq!(ctx.input, Some(Engine::FinalSize { grid: vec![0.1, 0.3] }));
        assert_eq!(ctx.output_dir(), Some(Path::new("/tmp/final-sizes")));
    }

    #[test]
    fn test_from_path_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("run.json");
        fs::write(&json_path, calibration_run(Value::Null).to_string()).unwrap();
        let ctx = Environment::from_path(&json_path).unwrap();
        assert_eq!(ctx.seed, 2024);

        let yaml_path = dir.path().join("run.yaml");
        fs::write(&yaml_path, "input: {}").unwrap();
        assert!(matches!(
            Environment::from_path(&yaml_path),
            Err(EnvError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_input_digest_ignores_key_order() {
        let a = Environment::from_value(json!({ "input": { "seed": 1, "a": 1, "b": [1, 2] } }))
            .unwrap();
        let b = Environment::from_value(json!({ "input": { "b": [1, 2], "a": 1, "seed": 1 } }))
            .unwrap();
        let c = Environment::from_value(json!({ "input": { "seed": 2, "a": 1, "b": [1, 2] } }))
            .unwrap();
        assert_eq!(a.input_digest(), b.input_digest());
        assert_ne!(a.input_digest(), c.input_digest());
        assert_eq!(a.input_digest().len(), 64);
    }

    #[test]
    fn test_write_csv_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("chains");
        let ctx = Environment::from_value(calibration_run(json!({
            "spec": "filesystem",
            "dir": nested.to_str().unwrap()
        })))
        .unwrap();
        let rows = vec![
            vec!["0.5".to_string(), "0.1".to_string()],
            vec!["1.5".to_string(), "0.4".to_string()],
        ];
        ctx.write_csv("samples_0.5.csv", &["R0", "k"], &rows).unwrap();
        ctx.write("run.json", b"{}").unwrap();
        let written = fs::read_to_string(nested.join("samples_0.5.csv")).unwrap();
        assert_eq!(written, "R0,k\n0.5,0.1\n1.5,0.4\n");
        assert_eq!(fs::read(nested.join("run.json")).unwrap(), b"{}");
    }

    #[test]
    fn test_render_csv_keeps_large_tables_whole() {
        let rows: Vec<Vec<String>> = (0..2_000)
            .map(|i| vec![i.to_string(), format!("{}", i as f64 / 7.0)])
            .collect();
        let table = render_csv(&["trial", "final_size"], &rows).unwrap();
        let table = String::from_utf8(table).unwrap();
        assert!(table.len() > 16 * 1024);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2_001);
        assert_eq!(lines[0], "trial,final_size");
        assert_eq!(lines[2_000], format!("1999,{}", 1999.0 / 7.0));
    }

    #[test]
    fn test_concurrent_stdout_tables() {
        let ctx = Environment::from_value(json!({})).unwrap();
        let rows: Vec<Vec<String>> = (0..500).map(|i| vec![i.to_string()]).collect();
        thread::scope(|scope| {
            for chunk in 0..4 {
                let (ctx, rows) = (&ctx, &rows);
                scope.spawn(move || {
                    ctx.write_csv(&format!("samples_{chunk}.csv"), &["trial"], rows)
                        .unwrap();
                });
            }
        });
    }
}
