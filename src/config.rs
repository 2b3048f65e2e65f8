use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "duel-judge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub judge: JudgeConfig,
    pub languages: Vec<LanguageConfig>,
    #[serde(default)]
    pub questions: Vec<QuestionConfig>,
}

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

/// Resource ceilings and parallelism knobs for the judging pipeline.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct JudgeConfig {
    /// Number of judge workers pulling from the queue
    #[serde(default = "default_workers")]
    pub workers: u8,
    /// Wall-clock limit for one test case execution, in milliseconds
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    /// Ceiling on captured program output, in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// How many test cases of one batch may execute in parallel
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_workers() -> u8 {
    2
}

fn default_time_limit_ms() -> u64 {
    2000
}

fn default_max_output_bytes() -> usize {
    65536
}

fn default_max_concurrency() -> usize {
    4
}

/// How to prepare and run candidate code for one language.
///
/// `%INPUT%` in the command templates is replaced with the path of the
/// written source file. `%CODE%` in the harness template is replaced with
/// the raw candidate code; languages without a harness run the code as-is.
#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub name: String,
    pub file_name: String,
    pub run_command: Vec<String>,
    /// Optional one-time preparation step (entry point / syntax check,
    /// or compilation). A non-zero exit fails the whole batch.
    #[serde(default)]
    pub check_command: Option<Vec<String>>,
    #[serde(default)]
    pub harness: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct QuestionConfig {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub cases: Vec<CaseConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CaseConfig {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let file = std::fs::File::open("data/example.json").unwrap();
        let reader = std::io::BufReader::new(file);
        let config: Config = serde_json::from_reader(reader).unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(config.judge.time_limit_ms, 2000);
        assert_eq!(config.languages[0].name, "python");
        assert!(config.questions[0].cases[0].is_sample);
    }

    #[test]
    fn test_judge_defaults() {
        let config: JudgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_output_bytes, 65536);
    }
}
