use std::path::Path;

use runenv::Environment;

use crate::{
    calibration::{CHAIN_COLUMNS, CalibrationChain, FinalSizeTable},
    error::OutbreakError,
};

/// Where calibration engines persist their results once a grid sweep finishes.
pub trait ResultSink: Sync {
    fn save_chain(&self, path: &str, chain: &CalibrationChain) -> Result<(), OutbreakError>;

    fn save_final_sizes(&self, path: &str, table: &FinalSizeTable) -> Result<(), OutbreakError>;
}

/// Fills the first `{}` of `template` with `key`. Templates without a placeholder get
/// `_<key>` appended to the file stem.
pub fn render_path(template: &str, key: f64) -> String {
    if template.contains("{}") {
        return template.replacen("{}", &key.to_string(), 1);
    }
    let path = Path::new(template);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => path
            .with_file_name(format!(
                "{}_{key}.{}",
                stem.to_string_lossy(),
                ext.to_string_lossy()
            ))
            .to_string_lossy()
            .into_owned(),
        _ => format!("{template}_{key}"),
    }
}

impl<I: Sync> ResultSink for Environment<I> {
    fn save_chain(&self, path: &str, chain: &CalibrationChain) -> Result<(), OutbreakError> {
        let table = chain.to_matrix();
        let rows: Vec<Vec<String>> = table
            .row_iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        self.write_csv(path, &CHAIN_COLUMNS, &rows)?;
        Ok(())
    }

    fn save_final_sizes(&self, path: &str, table: &FinalSizeTable) -> Result<(), OutbreakError> {
        let mut rows = Vec::with_capacity(table.len());
        for (i, f_home) in table.f_home().iter().enumerate() {
            for (j, spread) in table.max_community_spread().iter().enumerate() {
                for trial in 0..table.trials() {
                    rows.push(vec![
                        f_home.to_string(),
                        spread.to_string(),
                        trial.to_string(),
                        table.get(i, j, trial).to_string(),
                    ]);
                }
            }
        }
        self.write_csv(
            path,
            &["f_home", "max_community_spread", "trial", "final_size"],
            &rows,
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::fs;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::calibration::ChainSample;

    /// Keeps everything it is asked to persist.
    #[derive(Default)]
    pub struct MemorySink {
        pub chains: Mutex<Vec<(String, CalibrationChain)>>,
        pub tables: Mutex<Vec<(String, FinalSizeTable)>>,
    }

    impl ResultSink for MemorySink {
        fn save_chain(&self, path: &str, chain: &CalibrationChain) -> Result<(), OutbreakError> {
            self.chains
                .lock()
                .unwrap()
                .push((path.to_string(), chain.clone()));
            Ok(())
        }

        fn save_final_sizes(
            &self,
            path: &str,
            table: &FinalSizeTable,
        ) -> Result<(), OutbreakError> {
            self.tables
                .lock()
                .unwrap()
                .push((path.to_string(), table.clone()));
            Ok(())
        }
    }

    fn filesystem(dir: &Path) -> Environment {
        Environment::from_value(json!({
            "output": { "spec": "filesystem", "dir": dir.to_str().unwrap() }
        }))
        .unwrap()
    }

    #[test]
    fn test_render_path() {
        assert_eq!(render_path("samples_{}.csv", 1.5), "samples_1.5.csv");
        assert_eq!(render_path("samples.csv", 2.0), "samples_2.csv");
        assert_eq!(render_path("out/samples.csv", 0.25), "out/samples_0.25.csv");
        assert_eq!(render_path("samples", 3.0), "samples_3");
    }

    #[test]
    fn test_environment_writes_chain_csv() {
        let dir = tempfile::tempdir().unwrap();
        let env = filesystem(dir.path());
        let mut chain = CalibrationChain::default();
        chain.push(ChainSample {
            r0: 1.5,
            k: 0.5,
            d: 7.25,
            n: 3,
            days_elapsed: 40.5,
            gamma_shape: 2.0,
        });
        env.save_chain("samples_1.5.csv", &chain).unwrap();
        let written = fs::read_to_string(dir.path().join("samples_1.5.csv")).unwrap();
        assert_eq!(
            written,
            "R0,k,D,n,days_elapsed,gamma_shape\n1.5,0.5,7.25,3,40.5,2\n"
        );
    }

    #[test]
    fn test_environment_writes_final_size_csv() {
        let dir = tempfile::tempdir().unwrap();
        let env = filesystem(dir.path());
        let mut table = FinalSizeTable::new(vec![0.2], vec![5, 10], 2);
        table.set(0, 1, 1, 0.5);
        env.save_final_sizes("final_0.2.csv", &table).unwrap();
        let written = fs::read_to_string(dir.path().join("final_0.2.csv")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "f_home,max_community_spread,trial,final_size");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "0.2,10,1,0.5");
    }
}
